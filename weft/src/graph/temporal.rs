//! Temporal query rewriting and since-anchor resolution.
//!
//! [`apply_as_of`] injects validity-window predicates into a Cypher-like query
//! so it reads the graph as of a point in time. The rewriter is a clause
//! scanner, not in-place regex substitution: it tokenizes the query once,
//! tracking nesting and string literals, locates top-level clause boundaries,
//! and splices predicates per MATCH segment.
//!
//! [`resolve_since_anchor`] turns a user-supplied anchor (transaction id,
//! timestamp, git commit, or agent id) into an epoch-ms boundary.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::{GraphStore, StoreError, TxAnchorField};

/// Parameter name the injected predicates reference.
pub const AS_OF_PARAM: &str = "$asOfTs";

/// Top-level clause keywords that terminate a MATCH segment.
const CLAUSE_KEYWORDS: &[&str] = &[
    "MATCH", "WHERE", "WITH", "RETURN", "UNWIND", "CALL", "MERGE", "CREATE", "SET", "DELETE",
    "DETACH", "FOREACH", "ORDER", "SKIP", "LIMIT", "UNION",
];

static PATTERN_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*:").expect("pattern var regex"));

static HEX_COMMIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{7,40}$").expect("hex commit regex"));

/// One top-level clause: keyword plus the byte range of its body (keyword
/// inclusive, up to the next top-level clause).
#[derive(Debug)]
struct Clause {
    keyword: &'static str,
    start: usize,
    end: usize,
}

/// Splits `query` into top-level clauses, ignoring keywords inside
/// parentheses, brackets, braces, and string literals.
fn scan_clauses(query: &str) -> Vec<Clause> {
    let bytes = query.as_bytes();
    let mut clauses: Vec<Clause> = Vec::new();
    let mut depth = 0i32;
    let mut in_string: Option<u8> = None;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(quote) = in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' | b'`' => {
                in_string = Some(b);
                i += 1;
                continue;
            }
            b'(' | b'[' | b'{' => {
                depth += 1;
                i += 1;
                continue;
            }
            b')' | b']' | b'}' => {
                depth -= 1;
                i += 1;
                continue;
            }
            _ => {}
        }
        if depth == 0 && (i == 0 || !bytes[i - 1].is_ascii_alphanumeric() && bytes[i - 1] != b'_')
        {
            let rest = &query[i..];
            if let Some(keyword) = CLAUSE_KEYWORDS
                .iter()
                .copied()
                .find(|k| {
                    let hit = rest.len() >= k.len() && rest[..k.len()].eq_ignore_ascii_case(k);
                    // Must end at a word boundary.
                    hit && rest[k.len()..]
                        .chars()
                        .next()
                        .map_or(true, |c| !c.is_alphanumeric() && c != '_')
                })
            {
                if let Some(prev) = clauses.last_mut() {
                    prev.end = i;
                }
                clauses.push(Clause {
                    keyword,
                    start: i,
                    end: query.len(),
                });
                i += keyword.len();
                continue;
            }
        }
        i += 1;
    }
    clauses
}

/// Extracts labeled pattern variables from a MATCH clause body, in order,
/// without duplicates.
fn pattern_variables(clause_text: &str) -> Vec<String> {
    let mut vars: Vec<String> = Vec::new();
    for cap in PATTERN_VAR.captures_iter(clause_text) {
        let var = cap[1].to_string();
        if !vars.contains(&var) {
            vars.push(var);
        }
    }
    vars
}

fn validity_predicate(var: &str) -> String {
    format!(
        "{var}.validFrom <= {p} AND ({var}.validTo IS NULL OR {var}.validTo > {p})",
        var = var,
        p = AS_OF_PARAM
    )
}

/// Rewrites `query` so every labeled pattern variable in every MATCH /
/// OPTIONAL MATCH segment is constrained to rows valid at [`AS_OF_PARAM`].
///
/// A segment that already has a WHERE gets the predicates appended with AND;
/// otherwise a WHERE is inserted before the next top-level clause. Queries
/// with no labeled pattern variables come back unchanged.
pub fn apply_as_of(query: &str) -> String {
    let clauses = scan_clauses(query);
    if clauses.is_empty() {
        return query.to_string();
    }

    // Insertion plan: (byte offset, text). Built left to right, applied right
    // to left so earlier offsets stay valid.
    let mut insertions: Vec<(usize, String)> = Vec::new();

    let mut idx = 0usize;
    while idx < clauses.len() {
        let clause = &clauses[idx];
        if clause.keyword != "MATCH" {
            idx += 1;
            continue;
        }
        // OPTIONAL MATCH scans as MATCH: "OPTIONAL" is not a clause keyword,
        // so the preceding OPTIONAL ends up in the prior clause's body.
        let vars = pattern_variables(&query[clause.start..clause.end]);
        if vars.is_empty() {
            idx += 1;
            continue;
        }
        let predicates = vars
            .iter()
            .map(|v| validity_predicate(v))
            .collect::<Vec<_>>()
            .join(" AND ");

        let has_where = clauses
            .get(idx + 1)
            .map_or(false, |next| next.keyword == "WHERE");
        if has_where {
            let where_clause = &clauses[idx + 1];
            let body = &query[where_clause.start..where_clause.end];
            let insert_at = where_clause.start + body.trim_end().len();
            insertions.push((insert_at, format!(" AND {}", predicates)));
            idx += 2;
        } else {
            let body = &query[clause.start..clause.end];
            let insert_at = clause.start + body.trim_end().len();
            insertions.push((insert_at, format!(" WHERE {}", predicates)));
            idx += 1;
        }
    }

    if insertions.is_empty() {
        return query.to_string();
    }
    let mut out = query.to_string();
    for (at, text) in insertions.into_iter().rev() {
        out.insert_str(at, &text);
    }
    out
}

/// How a since-anchor was interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorMode {
    Transaction,
    Timestamp,
    Commit,
    Agent,
}

/// A resolved anchor: the epoch-ms boundary plus how it was derived.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAnchor {
    pub since_ts: i64,
    pub mode: AnchorMode,
    pub anchor_value: String,
}

/// Parses a point in time: epoch millis, RFC 3339, or a bare date.
pub fn parse_timestamp(input: &str) -> Option<i64> {
    if let Ok(n) = input.parse::<i64>() {
        return Some(n);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(input) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc().timestamp_millis());
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    }
    None
}

fn looks_like_tx_id(input: &str) -> bool {
    input.starts_with("tx-") || uuid::Uuid::parse_str(input).is_ok()
}

/// Resolves `input` to an epoch-ms boundary, trying in order: transaction id,
/// timestamp (numeric or ISO-8601), git commit hex, agent id. Non-timestamp
/// attempts look up the project's transaction anchors; the first hit wins.
/// Returns `None` when nothing matches.
pub async fn resolve_since_anchor(
    store: &dyn GraphStore,
    project_id: &str,
    input: &str,
) -> Result<Option<ResolvedAnchor>, StoreError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }

    if looks_like_tx_id(input) {
        if let Some(tx) = store.find_tx(project_id, TxAnchorField::Id, input).await? {
            return Ok(Some(ResolvedAnchor {
                since_ts: tx.timestamp,
                mode: AnchorMode::Transaction,
                anchor_value: input.to_string(),
            }));
        }
    }

    if let Some(ts) = parse_timestamp(input) {
        return Ok(Some(ResolvedAnchor {
            since_ts: ts,
            mode: AnchorMode::Timestamp,
            anchor_value: input.to_string(),
        }));
    }

    if HEX_COMMIT.is_match(input) {
        if let Some(tx) = store
            .find_tx(project_id, TxAnchorField::GitCommit, input)
            .await?
        {
            return Ok(Some(ResolvedAnchor {
                since_ts: tx.timestamp,
                mode: AnchorMode::Commit,
                anchor_value: input.to_string(),
            }));
        }
    }

    if let Some(tx) = store
        .find_tx(project_id, TxAnchorField::AgentId, input)
        .await?
    {
        return Ok(Some(ResolvedAnchor {
            since_ts: tx.timestamp,
            mode: AnchorMode::Agent,
            anchor_value: input.to_string(),
        }));
    }

    Ok(None)
}
