//! PostgreSQL backend: one JSONB document per row.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{Pool, Postgres};

use super::{DatabaseError, UserStore};
use crate::user::{NewUser, User};

/// Document stored in the `document` column.
#[derive(Debug, Default, Serialize, Deserialize)]
struct UserDocument {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: String,
    #[serde(default)]
    mobile: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

impl From<NewUser> for UserDocument {
    fn from(user: NewUser) -> Self {
        Self {
            name: user.name,
            email: user.email,
            password: user.password,
            mobile: user.mobile,
            image: user.image,
        }
    }
}

impl UserDocument {
    fn into_user(self, id: String) -> User {
        NewUser {
            name: self.name,
            email: self.email,
            password: self.password,
            mobile: self.mobile,
            image: self.image,
        }
        .with_id(id)
    }
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Init pool and execute migrations scripts.
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await?;

        sqlx::migrate!().run(&pool).await?;

        Ok(Self::new(pool))
    }

    /// Create a new [`PostgresStore`] on a migrated pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn insert(&self, user: NewUser) -> Result<User, DatabaseError> {
        let document = UserDocument::from(user.clone());

        let id: String = sqlx::query_scalar(
            r#"INSERT INTO users (document) VALUES ($1) RETURNING id"#,
        )
        .bind(Json(&document))
        .fetch_one(&self.pool)
        .await?;

        Ok(user.with_id(id))
    }

    async fn list(&self) -> Result<Vec<User>, DatabaseError> {
        let rows: Vec<(String, Json<UserDocument>)> =
            sqlx::query_as(r#"SELECT id, document FROM users"#)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, Json(document))| document.into_user(id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = false)]
    #[ignore = "requires DATABASE_URL pointing to PostgreSQL"]
    async fn test_insert_and_list(pool: Pool<Postgres>) {
        sqlx::migrate!().run(&pool).await.unwrap();
        let store = PostgresStore::new(pool);

        let user = store
            .insert(NewUser {
                name: Some("Ada".into()),
                password: "hash".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(!user.id.is_empty());
        assert_eq!(store.list().await.unwrap(), vec![user]);
    }

    #[test]
    fn test_document_json() {
        let document: UserDocument =
            serde_json::from_str(r#"{"password":"hash","email":"ada@x.com"}"#)
                .unwrap();
        let user = document.into_user("42".into());

        assert_eq!(user.id, "42");
        assert_eq!(user.email.as_deref(), Some("ada@x.com"));
        assert_eq!(user.image, None);
    }
}
