//! Liveness and diagnostic text routes.

use chrono::Local;

pub async fn home() -> &'static str {
    "Server is running. Home page works!"
}

pub async fn debug() -> String {
    format!("DEBUG ROUTE HIT at {}", Local::now().to_rfc2822())
}

pub async fn zzz() -> String {
    format!("ZED ZZZ TEST at {}", Local::now().to_rfc2822())
}

pub async fn test_ok() -> &'static str {
    "Route is working"
}
