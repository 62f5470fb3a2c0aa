pub mod diagnostics;
pub mod register;
pub mod status;
pub mod users;

#[cfg(test)]
pub use tests::*;
