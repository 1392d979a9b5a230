//! Load configuration from XDG `config.toml` and project `.env`, then apply to the process
//! environment with priority: **existing env > .env > XDG**. On top of that layering sits
//! [`AppConfig`], the typed read of every option in the external-interfaces config table:
//! watcher tuning, tool-backend mode, LLM endpoint, the browser-capture key, retrieval fusion
//! weights, and the job dead-letter threshold.
//!
//! See workspace `docs/xdg_toml_config.md` for the layering design this crate keeps from its
//! origin.

mod dotenv;
mod xdg_toml;

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_APP_NAME: &str = "echogarden";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Loads config from XDG `config.toml` and optional project `.env`, then sets environment
/// variables only for keys that are **not** already set (so existing env has highest priority).
///
/// Order of precedence when a key is missing in the process environment:
/// 1. Value from project `.env` (current directory or `override_dir` if given)
/// 2. Value from `$XDG_CONFIG_HOME/<app_name>/config.toml` `[env]` table
///
/// * `app_name`: e.g. `"echogarden"` — used for XDG path `~/.config/<app_name>/config.toml`.
/// * `override_dir`: if `Some`, look for `.env` in this directory instead of `std::env::current_dir()`.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    // Collect all keys from both sources; for each, choose value: env > .env > XDG.
    let mut keys: std::collections::HashSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue; // existing env wins
        }
        let value = dotenv_map.get(&key).or_else(|| xdg_map.get(&key)).cloned();
        if let Some(v) = value {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}

/// Watcher/ASR/vision backend modes, kept as plain strings in config land and
/// converted to the `echogarden-core` tool-config enums by the binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Local,
    Stub,
}

impl BackendMode {
    fn parse(key: &'static str, value: &str) -> Result<Self, LoadError> {
        match value {
            "local" => Ok(BackendMode::Local),
            "stub" => Ok(BackendMode::Stub),
            other => Err(LoadError::InvalidValue { key, value: other.to_string() }),
        }
    }
}

/// Fusion weights for the hybrid retriever, read as four independent env vars
/// rather than a nested structure so each one can be overridden alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeightsConfig {
    pub semantic: f64,
    pub fts: f64,
    pub graph: f64,
    pub recency: f64,
}

impl Default for FusionWeightsConfig {
    fn default() -> Self {
        Self { semantic: 0.40, fts: 0.20, graph: 0.20, recency: 0.20 }
    }
}

/// Typed read of every option in the external-interfaces config table.
/// Construct with [`AppConfig::from_env`] after [`load_and_apply`] has
/// populated the process environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub watch_path: PathBuf,
    pub poll_interval_s: u64,
    pub max_file_mb: u64,
    pub whisper_mode: BackendMode,
    pub vision_mode: BackendMode,
    pub llm_url: Option<String>,
    pub llm_model: Option<String>,
    pub capture_api_key: Option<String>,
    pub fusion_weights: FusionWeightsConfig,
    pub max_job_attempts: i64,
    pub bind_addr: String,
    pub db_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_path: PathBuf::from("."),
            poll_interval_s: 2,
            max_file_mb: 20,
            whisper_mode: BackendMode::Stub,
            vision_mode: BackendMode::Stub,
            llm_url: None,
            llm_model: None,
            capture_api_key: None,
            fusion_weights: FusionWeightsConfig::default(),
            max_job_attempts: 5,
            bind_addr: "127.0.0.1:8080".to_string(),
            db_path: PathBuf::from("echogarden.db"),
        }
    }
}

impl AppConfig {
    /// Reads every option from the process environment, falling back to the
    /// defaults above for anything unset. Call [`load_and_apply`] first so
    /// `.env`/XDG values are visible here too.
    pub fn from_env() -> Result<Self, LoadError> {
        let defaults = Self::default();
        let watch_path = env_string("EG_WATCH_PATH").map(PathBuf::from).unwrap_or(defaults.watch_path);
        let poll_interval_s = env_parse("EG_POLL_INTERVAL_S", defaults.poll_interval_s)?;
        let max_file_mb = env_parse("EG_MAX_FILE_MB", defaults.max_file_mb)?;
        let whisper_mode = match env_string("EG_WHISPER_MODE") {
            Some(v) => BackendMode::parse("EG_WHISPER_MODE", &v)?,
            None => defaults.whisper_mode,
        };
        let vision_mode = match env_string("EG_VISION_MODE") {
            Some(v) => BackendMode::parse("EG_VISION_MODE", &v)?,
            None => defaults.vision_mode,
        };
        let llm_url = env_string("EG_LLM_URL");
        let llm_model = env_string("EG_LLM_MODEL");
        let capture_api_key = env_string("EG_CAPTURE_API_KEY");
        let fusion_weights = FusionWeightsConfig {
            semantic: env_parse("EG_FUSION_SEMANTIC", defaults.fusion_weights.semantic)?,
            fts: env_parse("EG_FUSION_FTS", defaults.fusion_weights.fts)?,
            graph: env_parse("EG_FUSION_GRAPH", defaults.fusion_weights.graph)?,
            recency: env_parse("EG_FUSION_RECENCY", defaults.fusion_weights.recency)?,
        };
        let max_job_attempts = env_parse("EG_MAX_JOB_ATTEMPTS", defaults.max_job_attempts)?;
        let bind_addr = env_string("EG_BIND_ADDR").unwrap_or(defaults.bind_addr);
        let db_path = env_string("EG_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path);

        Ok(Self {
            watch_path,
            poll_interval_s,
            max_file_mb,
            whisper_mode,
            vision_mode,
            llm_url,
            llm_model,
            capture_api_key,
            fusion_weights,
            max_job_attempts,
            bind_addr,
            db_path,
        })
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, LoadError> {
    match env_string(key) {
        Some(v) => v.parse().map_err(|_| LoadError::InvalidValue { key, value: v }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn restore_var(key: &str, prev: Option<String>) {
        match prev {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }

    #[test]
    fn existing_env_wins() {
        env::set_var("CONFIG_TEST_EXISTING", "from_env");
        let _ = load_and_apply(DEFAULT_APP_NAME, None);
        assert_eq!(env::var("CONFIG_TEST_EXISTING").as_deref(), Ok("from_env"));
        env::remove_var("CONFIG_TEST_EXISTING");
    }

    #[test]
    fn load_and_apply_no_config_ok() {
        let r = load_and_apply("config-crate-nonexistent-app-xyz", None::<&std::path::Path>);
        assert!(r.is_ok());
    }

    #[test]
    fn dotenv_overrides_xdg() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join(DEFAULT_APP_NAME);
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "[env]\nCONFIG_TEST_PRIORITY = \"from_xdg\"\n").unwrap();

        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(dotenv_dir.path().join(".env"), "CONFIG_TEST_PRIORITY=from_dotenv\n").unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        env::remove_var("CONFIG_TEST_PRIORITY");

        let _ = load_and_apply(DEFAULT_APP_NAME, Some(dotenv_dir.path()));
        let val = env::var("CONFIG_TEST_PRIORITY").unwrap();
        env::remove_var("CONFIG_TEST_PRIORITY");
        restore_var("XDG_CONFIG_HOME", prev_xdg);

        assert_eq!(val, "from_dotenv");
    }

    #[test]
    fn xdg_applied_when_no_dotenv() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join(DEFAULT_APP_NAME);
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "[env]\nCONFIG_TEST_XDG_ONLY = \"from_xdg\"\n").unwrap();

        let empty_dir = tempfile::tempdir().unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        env::remove_var("CONFIG_TEST_XDG_ONLY");

        let _ = load_and_apply(DEFAULT_APP_NAME, Some(empty_dir.path()));
        let val = env::var("CONFIG_TEST_XDG_ONLY").unwrap();
        env::remove_var("CONFIG_TEST_XDG_ONLY");
        restore_var("XDG_CONFIG_HOME", prev_xdg);

        assert_eq!(val, "from_xdg");
    }

    #[test]
    fn dotenv_only_when_no_xdg() {
        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(dotenv_dir.path().join(".env"), "CONFIG_TEST_DOTENV_ONLY=from_dotenv_only\n").unwrap();

        env::remove_var("CONFIG_TEST_DOTENV_ONLY");
        let _ = load_and_apply("config-crate-nonexistent-app-xyz", Some(dotenv_dir.path()));
        let val = env::var("CONFIG_TEST_DOTENV_ONLY").unwrap();
        env::remove_var("CONFIG_TEST_DOTENV_ONLY");

        assert_eq!(val, "from_dotenv_only");
    }

    #[test]
    fn invalid_xdg_toml_fails_with_xdg_parse_error() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join(DEFAULT_APP_NAME);
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "invalid [[[\n").unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());

        let result = load_and_apply(DEFAULT_APP_NAME, None::<&std::path::Path>);
        restore_var("XDG_CONFIG_HOME", prev_xdg);

        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }

    #[test]
    fn app_config_defaults_without_env() {
        for key in [
            "EG_WATCH_PATH",
            "EG_POLL_INTERVAL_S",
            "EG_MAX_FILE_MB",
            "EG_WHISPER_MODE",
            "EG_VISION_MODE",
            "EG_LLM_URL",
            "EG_CAPTURE_API_KEY",
        ] {
            env::remove_var(key);
        }
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.poll_interval_s, 2);
        assert_eq!(cfg.max_file_mb, 20);
        assert_eq!(cfg.whisper_mode, BackendMode::Stub);
        assert!(cfg.llm_url.is_none());
    }

    #[test]
    fn app_config_reads_overrides() {
        env::set_var("EG_POLL_INTERVAL_S", "5");
        env::set_var("EG_WHISPER_MODE", "local");
        env::set_var("EG_MAX_JOB_ATTEMPTS", "9");
        let cfg = AppConfig::from_env().unwrap();
        env::remove_var("EG_POLL_INTERVAL_S");
        env::remove_var("EG_WHISPER_MODE");
        env::remove_var("EG_MAX_JOB_ATTEMPTS");

        assert_eq!(cfg.poll_interval_s, 5);
        assert_eq!(cfg.whisper_mode, BackendMode::Local);
        assert_eq!(cfg.max_job_attempts, 9);
    }

    #[test]
    fn app_config_rejects_invalid_backend_mode() {
        env::set_var("EG_VISION_MODE", "bogus");
        let result = AppConfig::from_env();
        env::remove_var("EG_VISION_MODE");
        assert!(matches!(result, Err(LoadError::InvalidValue { key: "EG_VISION_MODE", .. })));
    }
}
