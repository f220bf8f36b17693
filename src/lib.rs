//! Portal Agent - offline cache engine and authenticated API client
//!
//! The agent sits between the portal shell and its backend. API calls go
//! through [`api::ApiClient`], which attaches bearer tokens and recovers from
//! expired access tokens with a single refresh. Page and asset loads go
//! through the [`worker::WorkerHost`], which serves them from a versioned
//! cache when the network is unavailable.

pub mod agent;
pub mod api;
pub mod cache;
pub mod config;
pub mod ipc;
pub mod session;
pub mod worker;
