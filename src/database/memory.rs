//! Process-local store, used for development and tests.

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use tokio::sync::RwLock;

use super::{DatabaseError, UserStore};
use crate::user::{NewUser, User};

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<Vec<User>>,
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert(&self, user: NewUser) -> Result<User, DatabaseError> {
        let user = user.with_id(ObjectId::new().to_hex());
        self.users.write().await.push(user.clone());
        Ok(user)
    }

    async fn list(&self) -> Result<Vec<User>, DatabaseError> {
        Ok(self.users.read().await.clone())
    }
}
