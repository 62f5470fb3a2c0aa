mod service;

pub use service::*;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// User as saved on database.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: Option<String>,
    pub email: Option<String>,
    /// Argon2id PHC string.
    pub password: String,
    pub mobile: Option<String>,
    /// Generated name of the stored profile image.
    pub image: Option<String>,
    pub id: String,
}

/// [`User`] before the store assigns an identifier.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: String,
    pub mobile: Option<String>,
    pub image: Option<String>,
}

impl NewUser {
    /// Attach store identifier.
    pub fn with_id(self, id: impl Into<String>) -> User {
        User {
            name: self.name,
            email: self.email,
            password: self.password,
            mobile: self.mobile,
            image: self.image,
            id: id.into(),
        }
    }
}

/// Registration fields, coerced from the request body.
#[derive(Clone, Debug, Default, PartialEq, Validate)]
pub struct Registration {
    pub name: Option<String>,
    pub email: Option<String>,
    #[validate(
        required(message = "Password is required."),
        length(min = 1, message = "Password must not be empty.")
    )]
    pub password: Option<String>,
    pub mobile: Option<String>,
}
