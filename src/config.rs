//! Configuration manager for signup.

use std::fs::File;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors raised while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("`database.url` is invalid: {0}")]
    Url(#[from] url::ParseError),
    #[error("`{key}` environment variable is invalid: {value}")]
    Env { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    #[serde(skip_deserializing)]
    pub version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to HTTP listener.
    #[serde(skip_serializing)]
    pub server: Server,
    /// Related to document store configuration.
    #[serde(skip_serializing)]
    pub database: Database,
    /// Related to uploaded images.
    #[serde(skip_serializing)]
    pub storage: Storage,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Argon2,
    /// Related to Prometheus exporter.
    #[serde(skip_serializing)]
    pub telemetry: Telemetry,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            server: Server::default(),
            database: Database::default(),
            storage: Storage::default(),
            argon2: Argon2::default(),
            telemetry: Telemetry::default(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub address: IpAddr,
    pub port: u16,
    /// Maximum request body size, in bytes.
    pub body_limit: usize,
    pub timeout_secs: u64,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 5000,
            body_limit: 10 * 1024 * 1024, // 10 MiB.
            timeout_secs: 30,
        }
    }
}

impl Server {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Document store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    /// Connection string. Its scheme selects the backend:
    /// `mongodb`, `mongodb+srv`, `postgres`, `postgresql` or `memory`.
    pub url: String,
    /// Database name used when the URL has no path.
    pub name: String,
    /// Maximum pool connections.
    pub pool_size: u32,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: "mongodb://127.0.0.1:27017/ecommerce".into(),
            name: "ecommerce".into(),
            pool_size: 10,
        }
    }
}

/// Asset storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub directory: PathBuf,
    /// Remove the stored image when the rest of the registration fails.
    pub cleanup_on_failure: bool,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("uploads"),
            cleanup_on_failure: true,
        }
    }
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// Expose `/metrics` with Prometheus format.
    pub metrics: bool,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self { metrics: true }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies environment overrides.
    pub fn read(self) -> Result<Arc<Self>, ConfigError> {
        let config = self.load();
        let config =
            config.with_env_overrides(|key| std::env::var(key).ok())?;
        config.check()?;

        Ok(Arc::new(config))
    }

    fn load(&self) -> Self {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                match serde_yaml::from_reader::<_, Configuration>(file) {
                    Ok(mut config) => {
                        // set app version.
                        config.version = VERSION.to_owned();
                        config.path = file_path.clone();
                        config
                    },
                    Err(err) => self.error(err),
                }
            },
            Err(err) => self.error(err),
        }
    }

    /// Override values with `DATABASE_URL`, `PORT` and `UPLOADS_DIR`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }

        if let Some(port) = lookup("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::Env {
                key: "PORT",
                value: port,
            })?;
        }

        if let Some(dir) = lookup("UPLOADS_DIR") {
            self.storage.directory = PathBuf::from(dir);
        }

        Ok(self)
    }

    fn check(&self) -> Result<(), ConfigError> {
        Url::parse(&self.database.url)?;
        Ok(())
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, path = %self.path.display(), "cannot read configuration file, using defaults");
        Self {
            path: self.path.clone(),
            ..Default::default()
        }
    }
}
