use axum::Json;
use axum::extract::State;

use crate::error::Result;
use crate::user::{User, UserService};

/// Handler to list every registered user.
pub async fn handler(State(users): State<UserService>) -> Result<Json<Vec<User>>> {
    Ok(Json(users.list().await?))
}
