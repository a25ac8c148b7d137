//! Engine configuration.
//!
//! A [`Config`] is the context threaded through the engine: where databases live on disk,
//! which features are switched on, and the server/log keys the embedding process reads.
//! It loads from a JSON file or is built in code, and maps onto the `jsdb.*` registry
//! entries so the system database can override it at open and on `RELOAD CONFIG`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{error::Result, sql::types::DataType};

pub const ENTRY_SERVER_HOST: &str = "jsdb.server.host";
pub const ENTRY_SERVER_PORT: &str = "jsdb.server.port";
pub const ENTRY_SERVER_AUTHENTICATION: &str = "jsdb.server.authentication";
pub const ENTRY_DB_PERFORMANCE: &str = "jsdb.db.performance";
pub const ENTRY_DB_SNAPSHOTS: &str = "jsdb.db.snapshots";
pub const ENTRY_DB_DEFAULT: &str = "jsdb.db.default";
pub const ENTRY_LOG_LEVEL: &str = "jsdb.log.level";
pub const ENTRY_LOG_PATH: &str = "jsdb.log.path";
pub const ENTRY_REGISTRY_RESTRICTED: &str = "jsdb.registry.restricted";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Directory holding `dblist.json` and one directory per database
    pub root: PathBuf,
    /// When false every connection acts as the bootstrap root identity
    pub authentication: bool,
    /// Report batch timings
    pub performance: bool,
    /// Snapshot touched databases so failed batches roll back
    pub snapshots: bool,
    /// Keep batch snapshots in files under this directory instead of memory
    pub snapshot_dir: Option<PathBuf>,
    pub default_database: String,
    pub default_schema: String,
    /// Password of the `root` user created when the users table is empty
    pub root_password: String,
    pub server: ServerConfig,
    pub log: LogConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Only root users may create, alter or drop `jsdb.*` entries
    pub restricted: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            authentication: true,
            performance: true,
            snapshots: true,
            snapshot_dir: None,
            default_database: "jsdb".to_string(),
            default_schema: "public".to_string(),
            root_password: "root".to_string(),
            server: ServerConfig::default(),
            log: LogConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 2345 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), path: None }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { restricted: true }
    }
}

impl Config {
    /// Default configuration rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), ..Self::default() }
    }

    /// Loads a JSON configuration file; missing keys take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The registry entries seeded into a freshly provisioned system database
    pub fn default_entries(&self) -> Vec<(String, DataType, Value)> {
        let entry = |name: &str, entry_type, value: Value| (name.to_string(), entry_type, value);
        vec![
            entry(ENTRY_SERVER_HOST, DataType::String, Value::from(self.server.host.clone())),
            entry(ENTRY_SERVER_PORT, DataType::Number, Value::from(self.server.port)),
            entry(ENTRY_SERVER_AUTHENTICATION, DataType::Boolean, Value::from(self.authentication)),
            entry(ENTRY_DB_PERFORMANCE, DataType::Boolean, Value::from(self.performance)),
            entry(ENTRY_DB_SNAPSHOTS, DataType::Boolean, Value::from(self.snapshots)),
            entry(ENTRY_DB_DEFAULT, DataType::String, Value::from(self.default_database.clone())),
            entry(ENTRY_LOG_LEVEL, DataType::String, Value::from(self.log.level.clone())),
            entry(
                ENTRY_LOG_PATH,
                DataType::String,
                Value::from(self.log.path.clone().unwrap_or_default()),
            ),
            entry(ENTRY_REGISTRY_RESTRICTED, DataType::Boolean, Value::from(self.registry.restricted)),
        ]
    }

    /// Overlays registry entries onto this configuration. Unknown names are ignored;
    /// known names with a value of the wrong shape are skipped with a warning.
    pub fn apply_entries<'a>(&mut self, entries: impl IntoIterator<Item = (&'a str, &'a Value)>) {
        for (name, value) in entries {
            let applied = match name {
                ENTRY_SERVER_HOST => value.as_str().map(|v| self.server.host = v.to_string()),
                ENTRY_SERVER_PORT => value
                    .as_u64()
                    .and_then(|v| u16::try_from(v).ok())
                    .map(|v| self.server.port = v),
                ENTRY_SERVER_AUTHENTICATION => value.as_bool().map(|v| self.authentication = v),
                ENTRY_DB_PERFORMANCE => value.as_bool().map(|v| self.performance = v),
                ENTRY_DB_SNAPSHOTS => value.as_bool().map(|v| self.snapshots = v),
                ENTRY_DB_DEFAULT => value.as_str().map(|v| self.default_database = v.to_string()),
                ENTRY_LOG_LEVEL => value.as_str().map(|v| self.log.level = v.to_string()),
                ENTRY_LOG_PATH => value.as_str().map(|v| {
                    self.log.path = Some(v.to_string()).filter(|p| !p.is_empty());
                }),
                ENTRY_REGISTRY_RESTRICTED => value.as_bool().map(|v| self.registry.restricted = v),
                _ => Some(()),
            };
            if applied.is_none() {
                warn!(entry = name, %value, "ignoring registry entry with unexpected value");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::{Config, ENTRY_DB_SNAPSHOTS, ENTRY_LOG_PATH, ENTRY_SERVER_PORT};
    use crate::error::Result;

    #[test]
    fn test_load_partial_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("jsdb.json");
        std::fs::write(&path, r#"{"root": "/var/jsdb", "snapshotDir": "/tmp/snaps", "server": {"port": 9000}}"#)?;

        let config = Config::load(&path)?;
        assert_eq!(config.root, std::path::PathBuf::from("/var/jsdb"));
        assert_eq!(config.snapshot_dir, Some("/tmp/snaps".into()));
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.authentication);
        assert!(config.registry.restricted);
        Ok(())
    }

    #[test]
    fn test_entries_round_trip() {
        let mut source = Config::new("/data");
        source.server.port = 4000;
        source.snapshots = false;
        source.log.path = Some("/var/log/jsdb.log".to_string());
        let entries = source.default_entries();

        let mut config = Config::new("/data");
        config.apply_entries(entries.iter().map(|(name, _, value)| (name.as_str(), value)));
        assert_eq!(config, source);
    }

    #[test]
    fn test_apply_skips_bad_values() {
        let mut config = Config::new("/data");
        let port = json!("not a port");
        let snapshots = json!(false);
        let path = Value::from("");
        config.apply_entries([
            (ENTRY_SERVER_PORT, &port),
            (ENTRY_DB_SNAPSHOTS, &snapshots),
            (ENTRY_LOG_PATH, &path),
            ("app.custom", &port),
        ]);
        assert_eq!(config.server.port, 2345);
        assert!(!config.snapshots);
        assert_eq!(config.log.path, None);
    }
}
