//! Runtime policy for Weft, resolved from the process environment with a
//! TOML fallback: **existing env > `~/.config/weft/config.toml` `[env]`**.
//!
//! Call [`load_and_apply`] once at startup to fill in missing variables from
//! the config file, then [`Policy::from_env`] wherever a typed view is needed.

mod toml_env;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("config path: {0}")]
    ConfigPath(String),
    #[error("read config: {0}")]
    ConfigRead(std::io::Error),
    #[error("parse config toml: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Applies `[env]` entries from `~/.config/<app_name>/config.toml` to the
/// process environment, skipping keys that are already set.
pub fn load_and_apply(app_name: &str) -> Result<(), LoadError> {
    let file_map = toml_env::load_env_map(app_name)?;
    for (key, value) in file_map {
        if std::env::var(&key).is_err() {
            std::env::set_var(&key, value);
        }
    }
    Ok(())
}

/// Environment variable names the policy reads.
pub mod keys {
    pub const WORKSPACE_ROOT: &str = "WEFT_WORKSPACE_ROOT";
    pub const ALLOW_PATH_FALLBACK: &str = "WEFT_ALLOW_PATH_FALLBACK";
    pub const WATCH_ENABLED: &str = "WEFT_WATCH";
    pub const WATCH_DEBOUNCE_MS: &str = "WEFT_WATCH_DEBOUNCE_MS";
    pub const IGNORE_PATTERNS: &str = "WEFT_IGNORE";
    pub const VECTOR_STORE_ADDR: &str = "WEFT_VECTOR_ADDR";
    pub const SUMMARIZER_URL: &str = "WEFT_SUMMARIZER_URL";
    pub const EMBEDDING_URL: &str = "WEFT_EMBEDDING_URL";
    pub const DEFAULT_AGENT_ID: &str = "WEFT_AGENT_ID";
}

/// Directories excluded from every build, on top of [`Policy::ignore_patterns`].
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "node_modules",
    "dist",
    ".next",
    "target",
    "__tests__",
    "coverage",
    ".git",
];

/// Typed runtime policy. All fields have serviceable defaults so a bare
/// process comes up without any configuration.
#[derive(Clone, Debug)]
pub struct Policy {
    /// Fallback workspace root for sessions that never set one.
    pub workspace_fallback_root: PathBuf,
    /// Whether a tool may substitute the fallback root when the requested
    /// workspace path does not exist in this runtime.
    pub allow_path_fallback: bool,
    /// Whether `graph_set_workspace` starts a session watcher.
    pub watcher_enabled: bool,
    pub watcher_debounce_ms: u64,
    /// Path components the watcher and build exclude, beyond the defaults.
    pub ignore_patterns: Vec<String>,
    pub vector_store_addr: Option<String>,
    pub summarizer_url: Option<String>,
    pub embedding_endpoint: Option<String>,
    /// Agent id attributed to calls that carry none.
    pub default_agent_id: String,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            workspace_fallback_root: PathBuf::from("."),
            allow_path_fallback: false,
            watcher_enabled: true,
            watcher_debounce_ms: 400,
            ignore_patterns: Vec::new(),
            vector_store_addr: None,
            summarizer_url: None,
            embedding_endpoint: None,
            default_agent_id: "agent-anonymous".to_string(),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl Policy {
    /// Reads the policy from the process environment. Unset keys fall back
    /// to [`Policy::default`].
    pub fn from_env() -> Self {
        let defaults = Policy::default();
        Self {
            workspace_fallback_root: std::env::var(keys::WORKSPACE_ROOT)
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_fallback_root),
            allow_path_fallback: env_bool(keys::ALLOW_PATH_FALLBACK, defaults.allow_path_fallback),
            watcher_enabled: env_bool(keys::WATCH_ENABLED, defaults.watcher_enabled),
            watcher_debounce_ms: std::env::var(keys::WATCH_DEBOUNCE_MS)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.watcher_debounce_ms),
            ignore_patterns: std::env::var(keys::IGNORE_PATTERNS)
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.ignore_patterns),
            vector_store_addr: std::env::var(keys::VECTOR_STORE_ADDR).ok(),
            summarizer_url: std::env::var(keys::SUMMARIZER_URL).ok(),
            embedding_endpoint: std::env::var(keys::EMBEDDING_URL).ok(),
            default_agent_id: std::env::var(keys::DEFAULT_AGENT_ID)
                .unwrap_or(defaults.default_agent_id),
        }
    }

    /// All ignore patterns: built-in defaults plus configured extras.
    pub fn effective_ignore_patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = DEFAULT_IGNORE_PATTERNS
            .iter()
            .map(|s| s.to_string())
            .collect();
        for extra in &self.ignore_patterns {
            if !patterns.contains(extra) {
                patterns.push(extra.clone());
            }
        }
        patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Existing env wins over the config file.
    #[test]
    fn existing_env_wins() {
        std::env::set_var("WEFT_CONFIG_TEST_EXISTING", "from_env");
        let _ = load_and_apply("weft-config-test-nonexistent");
        assert_eq!(
            std::env::var("WEFT_CONFIG_TEST_EXISTING").as_deref(),
            Ok("from_env")
        );
        std::env::remove_var("WEFT_CONFIG_TEST_EXISTING");
    }

    /// A missing config file is not an error.
    #[test]
    fn missing_config_ok() {
        assert!(load_and_apply("weft-config-test-nonexistent").is_ok());
    }

    /// Ignore patterns merge defaults with configured extras, deduplicated.
    #[test]
    fn effective_ignore_patterns_merge() {
        let policy = Policy {
            ignore_patterns: vec!["vendor".to_string(), ".git".to_string()],
            ..Policy::default()
        };
        let patterns = policy.effective_ignore_patterns();
        assert!(patterns.contains(&"node_modules".to_string()));
        assert!(patterns.contains(&"vendor".to_string()));
        assert_eq!(
            patterns.iter().filter(|p| p.as_str() == ".git").count(),
            1
        );
    }

    /// Boolean parsing accepts the usual spellings.
    #[test]
    fn env_bool_spellings() {
        std::env::set_var("WEFT_CONFIG_TEST_BOOL", "yes");
        assert!(env_bool("WEFT_CONFIG_TEST_BOOL", false));
        std::env::set_var("WEFT_CONFIG_TEST_BOOL", "0");
        assert!(!env_bool("WEFT_CONFIG_TEST_BOOL", true));
        std::env::remove_var("WEFT_CONFIG_TEST_BOOL");
        assert!(env_bool("WEFT_CONFIG_TEST_BOOL", true));
    }
}
