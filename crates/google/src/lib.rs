//! Google account token exchange and the notes changes API.

pub mod auth;
pub mod client;
pub mod notes;

pub use auth::parse_auth_response;
pub use client::{build_http_client, GoogleClient};
