#![warn(clippy::unwrap_used)]

pub mod error;
pub mod middleware;
pub mod rest;
pub mod server;

pub use error::ApiError;
pub use rest::AppState;
pub use server::{build_router, ApiServer};
