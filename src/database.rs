//! Document store holding the `users` collection.
mod memory;
mod mongo;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use postgres::PostgresStore;

use crate::config::Database as DatabaseConfig;
use crate::user::{NewUser, User};

pub const COLLECTION: &str = "users";

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("MongoDB request failed: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("SQL request failed: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("invalid connection string: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported database scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("store did not return an identifier")]
    MissingId,
}

/// Persistence port for [`User`] documents.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a document; the store assigns its identifier.
    async fn insert(&self, user: NewUser) -> Result<User, DatabaseError>;

    /// Every document of the collection, in no particular order.
    async fn list(&self) -> Result<Vec<User>, DatabaseError>;
}

/// Shared store handle passed to Axum.
#[derive(Clone)]
pub struct Database {
    pub users: Arc<dyn UserStore>,
}

impl Database {
    /// Connect the backend matching the connection string scheme.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let url = Url::parse(&config.url)?;

        let users: Arc<dyn UserStore> = match url.scheme() {
            "mongodb" | "mongodb+srv" => {
                Arc::new(MongoStore::connect(&config.url, &config.name).await?)
            },
            "postgres" | "postgresql" => Arc::new(
                PostgresStore::connect(&config.url, config.pool_size).await?,
            ),
            "memory" => Arc::new(MemoryStore::default()),
            scheme => {
                return Err(DatabaseError::UnsupportedScheme(scheme.to_owned()));
            },
        };

        tracing::info!(scheme = url.scheme(), host = url.host_str(), "document store connected");

        Ok(Self { users })
    }
}
