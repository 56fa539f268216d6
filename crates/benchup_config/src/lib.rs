use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Database root credentials and endpoint for the gate and for site creation.
#[derive(Debug, Clone)]
pub struct DbSettings {
    pub host: String,
    /// Kept as a string; it is only ever passed through as a command argument.
    pub port: String,
    pub user: String,
    pub password: String,
}

/// Process-wide settings, built exactly once at startup and passed by
/// reference from there on. No other component reads the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Home directory of the runtime user (`FRAPPE_HOME`).
    pub frappe_home: PathBuf,
    /// Name of the bench directory under the home. Fixed by convention.
    pub bench_name: String,
    /// Path to the fleet document (`INSTANCE_JSON_SOURCE`).
    pub instance_config: PathBuf,
    /// Path to the shared-services config (`COMMON_CONFIG_SOURCE`).
    pub common_config: PathBuf,
    pub db: DbSettings,
    /// Admin password handed to every newly created site (`ADMIN_PASSWORD`).
    pub admin_password: String,
    /// Wait for the database before reconciling (`WAIT_FOR_DB`, off on "0").
    pub wait_for_db: bool,
    /// Wait for the redis endpoints (`WAIT_FOR_REDIS`, off on "0").
    pub wait_for_redis: bool,
    /// Print a line per probe retry (`PROBE_DEBUG` set to "1").
    pub probe_verbose: bool,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary lookup. An unset or empty value
    /// falls back to the default, same as the environment it models.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Settings {
            frappe_home: PathBuf::from(get("FRAPPE_HOME", "/home/frappe")),
            bench_name: "frappe-bench".to_string(),
            instance_config: PathBuf::from(get("INSTANCE_JSON_SOURCE", "/instance.json")),
            common_config: PathBuf::from(get("COMMON_CONFIG_SOURCE", "/common_site_config.json")),
            db: DbSettings {
                host: get("MARIADB_HOST", "mariadb"),
                port: get("MARIADB_PORT", "3306"),
                user: get("MARIADB_ROOT_USERNAME", "root"),
                password: get("MARIADB_ROOT_PASSWORD", "root"),
            },
            admin_password: get("ADMIN_PASSWORD", "admin"),
            wait_for_db: lookup("WAIT_FOR_DB").map_or(true, |value| value != "0"),
            wait_for_redis: lookup("WAIT_FOR_REDIS").map_or(true, |value| value != "0"),
            probe_verbose: lookup("PROBE_DEBUG").map_or(false, |value| value == "1"),
        }
    }

    /// Full path of the bench directory.
    pub fn bench_dir(&self) -> PathBuf {
        self.frappe_home.join(&self.bench_name)
    }

    /// The site registry directory inside the bench.
    pub fn sites_dir(&self) -> PathBuf {
        self.bench_dir().join("sites")
    }

    /// The module library directory inside the bench.
    pub fn apps_dir(&self) -> PathBuf {
        self.bench_dir().join("apps")
    }
}

/// Shared-services configuration (`common_site_config.json`). All three
/// endpoints are required; a missing key is a parse error rather than an
/// empty endpoint the gate would probe forever.
#[derive(Debug, Clone, Deserialize)]
pub struct CommonSiteConfig {
    pub redis_queue: String,
    pub redis_cache: String,
    pub redis_socketio: String,
}

impl CommonSiteConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: CommonSiteConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// The endpoints in the order the gate waits on them.
    pub fn redis_endpoints(&self) -> [&str; 3] {
        [&self.redis_queue, &self.redis_cache, &self.redis_socketio]
    }
}
