//! Reads the `[env]` table out of `$XDG_CONFIG_HOME/<app_name>/config.toml`.
//!
//! This is the lowest-priority layer in [`crate::load_and_apply`] — a place to
//! park defaults (e.g. a default LLM endpoint) that a project `.env` or the
//! shell environment can still override.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::LoadError;

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

fn resolve_config_path(app_name: &str) -> Result<PathBuf, LoadError> {
    let base = cross_xdg::BaseDirs::new().map_err(|e| LoadError::XdgPath(e.to_string()))?;
    Ok(base.config_home().join(app_name).join("config.toml"))
}

fn read_config_file(path: &Path) -> Result<ConfigFile, LoadError> {
    let content = std::fs::read_to_string(path).map_err(LoadError::XdgRead)?;
    toml::from_str(&content).map_err(LoadError::from)
}

/// Returns the `[env]` table's key-value pairs, or an empty map if
/// `config.toml` doesn't exist at all (a missing file is not an error — most
/// installs never create one).
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let path = resolve_config_path(app_name)?;
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    read_config_file(&path).map(|cfg| cfg.env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn with_xdg_home<T>(dir: &Path, f: impl FnOnce() -> T) -> T {
        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", dir);
        let result = f();
        match prev {
            Some(p) => env::set_var("XDG_CONFIG_HOME", p),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
        result
    }

    #[test]
    fn missing_config_file_yields_empty_map() {
        let map = load_env_map("echogarden-test-app-that-does-not-exist").unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn env_table_is_read_into_map() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("testapp");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nECHOGARDEN_LLM_ENDPOINT = \"http://localhost:11434\"\nECHOGARDEN_TOP_K = \"8\"\n",
        )
        .unwrap();

        let map = with_xdg_home(dir.path(), || load_env_map("testapp")).unwrap();
        assert_eq!(map.get("ECHOGARDEN_LLM_ENDPOINT"), Some(&"http://localhost:11434".to_string()));
        assert_eq!(map.get("ECHOGARDEN_TOP_K"), Some(&"8".to_string()));
    }

    #[test]
    fn empty_env_table_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("emptyenv");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "[env]\n").unwrap();

        let map = with_xdg_home(dir.path(), || load_env_map("emptyenv")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn malformed_toml_surfaces_as_xdg_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("badapp");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "not valid toml [[[\n").unwrap();

        let result = with_xdg_home(dir.path(), || load_env_map("badapp"));
        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }

    #[test]
    fn config_without_env_table_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("noenv");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "[watcher]\ndebounce_ms = 500\n").unwrap();

        let map = with_xdg_home(dir.path(), || load_env_map("noenv")).unwrap();
        assert!(map.is_empty());
    }
}
