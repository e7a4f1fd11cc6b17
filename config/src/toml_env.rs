//! Load the `[env]` table from `~/.config/<app>/config.toml`.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

fn config_path(app_name: &str) -> Result<Option<PathBuf>, LoadError> {
    let Some(config_dir) = dirs::config_dir() else {
        return Err(LoadError::ConfigPath(
            "no config directory for this platform".to_string(),
        ));
    };
    let path = config_dir.join(app_name).join("config.toml");
    Ok(path.exists().then_some(path))
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Env key-value pairs from the `[env]` section. Missing file or section
/// yields an empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let Some(path) = config_path(app_name)? else {
        return Ok(HashMap::new());
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::ConfigRead)?;
    let config: ConfigFile = toml::from_str(&content)?;
    Ok(config.env)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_config_home<T>(dir: &std::path::Path, f: impl FnOnce() -> T) -> T {
        let prev = std::env::var("XDG_CONFIG_HOME").ok();
        std::env::set_var("XDG_CONFIG_HOME", dir);
        let out = f();
        match prev {
            Some(v) => std::env::set_var("XDG_CONFIG_HOME", v),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
        out
    }

    /// Missing file yields an empty map, not an error.
    #[test]
    fn missing_file_is_empty() {
        let map = load_env_map("weft-toml-env-test-nonexistent").unwrap();
        assert!(map.is_empty());
    }

    /// The `[env]` table round-trips; other tables are ignored.
    #[cfg(target_os = "linux")]
    #[test]
    fn reads_env_table() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("weft-test");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(
            app.join("config.toml"),
            "[env]\nWEFT_WATCH = \"false\"\n[other]\nignored = \"yes\"\n",
        )
        .unwrap();

        let map = with_config_home(dir.path(), || load_env_map("weft-test").unwrap());
        assert_eq!(map.get("WEFT_WATCH"), Some(&"false".to_string()));
        assert_eq!(map.len(), 1);
    }

    /// Invalid TOML surfaces as a parse error.
    #[cfg(target_os = "linux")]
    #[test]
    fn invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("weft-bad");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(app.join("config.toml"), "broken [[[\n").unwrap();

        let result = with_config_home(dir.path(), || load_env_map("weft-bad"));
        assert!(matches!(result, Err(LoadError::ConfigParse(_))));
    }
}
