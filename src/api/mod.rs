//! Authenticated portal API client

pub mod base;
pub mod client;
pub mod errors;
pub mod types;

pub use base::ApiBase;
pub use client::ApiClient;
pub use errors::ApiError;
pub use types::{AppStatus, ErrorEntry};
