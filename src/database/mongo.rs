use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::bson::oid::ObjectId;
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};

use super::{COLLECTION, DatabaseError, UserStore};
use crate::user::{NewUser, User};

/// `users` document as stored by MongoDB.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct UserDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
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
            id: None,
            name: user.name,
            email: user.email,
            password: user.password,
            mobile: user.mobile,
            image: user.image,
        }
    }
}

impl TryFrom<UserDocument> for User {
    type Error = DatabaseError;

    fn try_from(document: UserDocument) -> Result<Self, Self::Error> {
        let id = document.id.ok_or(DatabaseError::MissingId)?;

        Ok(User {
            name: document.name,
            email: document.email,
            password: document.password,
            mobile: document.mobile,
            image: document.image,
            id: id.to_hex(),
        })
    }
}

/// MongoDB collection of users.
#[derive(Clone)]
pub struct MongoStore {
    users: Collection<UserDocument>,
}

impl MongoStore {
    /// Connect and ping the server so a dead store fails on start.
    pub async fn connect(uri: &str, fallback_db: &str) -> Result<Self, DatabaseError> {
        let client = Client::with_uri_str(uri).await?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(fallback_db));

        db.run_command(doc! { "ping": 1 }).await?;
        tracing::debug!(db = db.name(), "mongodb ping succeeded");

        Ok(Self {
            users: db.collection(COLLECTION),
        })
    }
}

#[async_trait]
impl UserStore for MongoStore {
    async fn insert(&self, user: NewUser) -> Result<User, DatabaseError> {
        let document = UserDocument::from(user.clone());
        let result = self.users.insert_one(&document).await?;

        let id = result
            .inserted_id
            .as_object_id()
            .ok_or(DatabaseError::MissingId)?;

        Ok(user.with_id(id.to_hex()))
    }

    async fn list(&self) -> Result<Vec<User>, DatabaseError> {
        let documents: Vec<UserDocument> =
            self.users.find(doc! {}).await?.try_collect().await?;

        documents.into_iter().map(User::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::{self, Bson};

    use super::*;

    #[test]
    fn test_new_document_has_no_id() {
        let document = UserDocument::from(NewUser {
            name: Some("Ada".into()),
            password: "hash".into(),
            ..Default::default()
        });

        let bson = bson::to_document(&document).unwrap();
        assert!(!bson.contains_key("_id"));
        assert_eq!(bson.get("image"), Some(&Bson::Null));
        assert_eq!(bson.get_str("name").unwrap(), "Ada");
    }

    #[test]
    fn test_document_into_user() {
        let id = ObjectId::new();
        let bson = doc! { "_id": id, "password": "hash", "mobile": "555" };
        let document: UserDocument = bson::from_document(bson).unwrap();

        let user = User::try_from(document).unwrap();
        assert_eq!(user.id, id.to_hex());
        assert_eq!(user.mobile.as_deref(), Some("555"));
        assert_eq!(user.name, None);
        assert_eq!(user.image, None);
    }

    #[test]
    fn test_document_without_id() {
        assert!(matches!(
            User::try_from(UserDocument::default()),
            Err(DatabaseError::MissingId)
        ));
    }
}
