//! Load configuration from XDG `config.toml` and project `.env`, apply it to the process
//! environment (priority: **existing env > .env > XDG**), then parse the typed
//! [`EngineConfig`] the moderation engine runs with.

mod dotenv;
#[cfg(feature = "tracing-init")]
pub mod tracing_init;
mod xdg_toml;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

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
    #[error("missing required env var: {0}")]
    MissingEnv(String),
}

/// Loads config from XDG `config.toml` and optional project `.env`, then sets
/// environment variables only for keys that are **not** already set.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::HashSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue;
        }
        if let Some(v) = dotenv_map.get(&key).or_else(|| xdg_map.get(&key)) {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Typed configuration the engine runs with, defaults as named in the configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub task_pool_size: usize,
    pub retry_max_attempts: usize,
    pub retry_base_delay: Duration,
    pub similarity_distance_threshold: f32,
    pub embedding_dimension: usize,
    pub controller_join_timeout: Duration,
    pub llm_model: String,
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub bus_bootstrap_servers: String,
    pub bus_deployment_events_topic: String,
    pub sqlite_db_path: String,
    pub discord_bot_token: String,
}

impl EngineConfig {
    /// Builds configuration from the process environment (after [`load_and_apply`] has
    /// populated it from `.env`/XDG as needed).
    pub fn from_env() -> Self {
        Self {
            task_pool_size: env_parse_or("WARDEN_TASK_POOL_SIZE", 20),
            retry_max_attempts: env_parse_or("WARDEN_RETRY_MAX_ATTEMPTS", 3),
            retry_base_delay: Duration::from_secs(env_parse_or("WARDEN_RETRY_BASE_DELAY_SECONDS", 1)),
            similarity_distance_threshold: env_parse_or("WARDEN_SIMILARITY_DISTANCE_THRESHOLD", 0.5),
            embedding_dimension: env_parse_or("WARDEN_EMBEDDING_DIMENSION", 1024),
            controller_join_timeout: Duration::from_secs(env_parse_or(
                "WARDEN_CONTROLLER_JOIN_TIMEOUT_SECONDS",
                10,
            )),
            llm_model: env_or("WARDEN_LLM_MODEL", "gpt-4o-mini"),
            llm_base_url: env_or("WARDEN_LLM_BASE_URL", "https://api.openai.com/v1"),
            llm_api_key: env_or("WARDEN_LLM_API_KEY", ""),
            bus_bootstrap_servers: env_or("WARDEN_BUS_BOOTSTRAP_SERVERS", "localhost:9092"),
            bus_deployment_events_topic: env_or("WARDEN_BUS_DEPLOYMENT_EVENTS_TOPIC", "deployment-events"),
            sqlite_db_path: env_or("WARDEN_SQLITE_DB_PATH", "warden.sqlite3"),
            discord_bot_token: env_or("WARDEN_DISCORD_BOT_TOKEN", ""),
        }
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
        env::set_var("WARDEN_CONFIG_TEST_EXISTING", "from_env");
        let _ = load_and_apply("warden", None);
        assert_eq!(
            env::var("WARDEN_CONFIG_TEST_EXISTING").as_deref(),
            Ok("from_env")
        );
        env::remove_var("WARDEN_CONFIG_TEST_EXISTING");
    }

    #[test]
    fn load_and_apply_no_config_ok() {
        let r = load_and_apply("warden-config-nonexistent-app-xyz", None::<&std::path::Path>);
        assert!(r.is_ok());
    }

    #[test]
    fn dotenv_overrides_xdg() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("warden");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nWARDEN_CONFIG_TEST_PRIORITY = \"from_xdg\"\n",
        )
        .unwrap();

        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dotenv_dir.path().join(".env"),
            "WARDEN_CONFIG_TEST_PRIORITY=from_dotenv\n",
        )
        .unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        env::remove_var("WARDEN_CONFIG_TEST_PRIORITY");

        let _ = load_and_apply("warden", Some(dotenv_dir.path()));
        let val = env::var("WARDEN_CONFIG_TEST_PRIORITY").unwrap();
        env::remove_var("WARDEN_CONFIG_TEST_PRIORITY");
        restore_var("XDG_CONFIG_HOME", prev_xdg);

        assert_eq!(val, "from_dotenv");
    }

    #[test]
    fn engine_config_defaults_when_env_unset() {
        for key in [
            "WARDEN_TASK_POOL_SIZE",
            "WARDEN_RETRY_MAX_ATTEMPTS",
            "WARDEN_EMBEDDING_DIMENSION",
        ] {
            env::remove_var(key);
        }
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.task_pool_size, 20);
        assert_eq!(cfg.retry_max_attempts, 3);
        assert_eq!(cfg.embedding_dimension, 1024);
    }

    #[test]
    fn engine_config_reads_overrides() {
        env::set_var("WARDEN_TASK_POOL_SIZE", "5");
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.task_pool_size, 5);
        env::remove_var("WARDEN_TASK_POOL_SIZE");
    }
}
