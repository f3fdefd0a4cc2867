use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [store]
//                    lock_timeout_secs = 30
//
//   env var:         GHOSTWIRE_STORE__LOCK_TIMEOUT_SECS=30   (double underscore = nesting)

pub const ENV_PREFIX: &str = "GHOSTWIRE_";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub store: StoreFileConfig,
    #[serde(default)]
    pub websocket: WebSocketFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Document store settings (lives under `[store]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreFileConfig {
    /// File name of the active document, relative to the data directory
    #[serde(default = "default_database_file")]
    pub database_file: String,
    /// Give up waiting for the store lock after this many seconds (0 = wait forever)
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

impl Default for StoreFileConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

/// WebSocket settings (lives under `[websocket]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebSocketFileConfig {
    #[serde(default = "default_send_channel_capacity")]
    pub send_channel_capacity: usize,
}

impl Default for WebSocketFileConfig {
    fn default() -> Self {
        Self {
            send_channel_capacity: default_send_channel_capacity(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3004
}
fn default_database_file() -> String {
    "database.json".to_string()
}
fn default_lock_timeout_secs() -> u64 {
    10
}
fn default_send_channel_capacity() -> usize {
    256
}

/// Build a figment that layers: defaults → config.toml → GHOSTWIRE_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `GHOSTWIRE_SERVER__PORT=4000`  →  `server.port = 4000`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig plus CLI overrides)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreConfig,
    pub websocket: WebSocketConfig,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub database_file: String,
    /// None = wait for the store lock indefinitely
    pub lock_timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct WebSocketConfig {
    /// Outbound queue capacity per connection
    pub send_channel_capacity: usize,
}

impl ServerConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            host: fc.server.host.clone(),
            port: fc.server.port,
            store: StoreConfig {
                database_file: fc.store.database_file.clone(),
                lock_timeout: if fc.store.lock_timeout_secs == 0 {
                    None
                } else {
                    Some(Duration::from_secs(fc.store.lock_timeout_secs))
                },
            },
            websocket: WebSocketConfig {
                send_channel_capacity: fc.websocket.send_channel_capacity.max(1),
            },
        }
    }

    /// Apply `--host` / `--port` from the command line.
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

// =============================================================================
// Directory layout (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct HubPaths {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub datasets_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl HubPaths {
    /// `--data-dir` if given, otherwise `~/.ghostwire`.
    pub fn resolve_data_dir(custom_dir: Option<PathBuf>) -> Result<PathBuf> {
        match custom_dir {
            Some(dir) => Ok(dir),
            None => Ok(dirs::home_dir()
                .context("Could not find home directory")?
                .join(".ghostwire")),
        }
    }

    pub fn new(data_dir: PathBuf, database_file: &str) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let datasets_dir = data_dir.join("datasets");
        std::fs::create_dir_all(&datasets_dir)
            .with_context(|| format!("Failed to create datasets directory: {:?}", datasets_dir))?;

        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        let database_path = data_dir.join(database_file);

        Ok(Self {
            data_dir,
            database_path,
            datasets_dir,
            logs_dir,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir.join("ghostwire.log")
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_file_config_defaults() {
        let d = FileConfig::default();
        assert_eq!(d.server.host, "127.0.0.1");
        assert_eq!(d.server.port, 3004);
        assert_eq!(d.store.database_file, "database.json");
        assert_eq!(d.store.lock_timeout_secs, 10);
        assert_eq!(d.websocket.send_channel_capacity, 256);
    }

    // ── ServerConfig::from_file ─────────────────────────────────────────

    #[test]
    fn test_server_config_from_file_defaults() {
        let sc = ServerConfig::from_file(&FileConfig::default());
        assert_eq!(sc.store.lock_timeout, Some(Duration::from_secs(10)));
        assert_eq!(sc.websocket.send_channel_capacity, 256);
        assert_eq!(sc.bind_addr().unwrap().port(), 3004);
    }

    #[test]
    fn test_lock_timeout_zero_disables() {
        let fc = FileConfig {
            store: StoreFileConfig {
                lock_timeout_secs: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ServerConfig::from_file(&fc).store.lock_timeout.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let sc = ServerConfig::from_file(&FileConfig::default())
            .with_overrides(Some("0.0.0.0".into()), Some(9000));
        assert_eq!(sc.bind_addr().unwrap(), "0.0.0.0:9000".parse().unwrap());

        let sc = ServerConfig::from_file(&FileConfig::default()).with_overrides(None, None);
        assert_eq!(sc.host, "127.0.0.1");
    }

    #[test]
    fn test_invalid_host_is_an_error() {
        let sc = ServerConfig::from_file(&FileConfig::default())
            .with_overrides(Some("not a host".into()), None);
        assert!(sc.bind_addr().is_err());
    }

    // ── HubPaths ────────────────────────────────────────────────────────

    #[test]
    fn test_hub_paths_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = HubPaths::resolve_data_dir(Some(tmp.path().to_path_buf())).unwrap();
        let paths = HubPaths::new(data_dir, "database.json").unwrap();

        assert_eq!(paths.data_dir, tmp.path());
        assert_eq!(paths.database_path, tmp.path().join("database.json"));
        assert_eq!(paths.log_path(), tmp.path().join("logs/ghostwire.log"));
        assert_eq!(paths.config_toml_path(), tmp.path().join("config.toml"));
        assert!(tmp.path().join("datasets").exists());
        assert!(tmp.path().join("logs").exists());
        // The document itself is created lazily by the first write
        assert!(!paths.database_path.exists());
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.port, 3004);
        assert_eq!(fc.store.lock_timeout_secs, 10);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[server]\nport = 8080\n\n[store]\ndatabase_file = \"scenario.json\"\nlock_timeout_secs = 2\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.port, 8080);
        // Unset keys keep their defaults
        assert_eq!(fc.server.host, "127.0.0.1");
        assert_eq!(fc.store.database_file, "scenario.json");
        assert_eq!(fc.store.lock_timeout_secs, 2);
        assert_eq!(fc.websocket.send_channel_capacity, 256);
    }
}
