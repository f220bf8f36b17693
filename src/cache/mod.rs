//! Offline caching layer
//!
//! Keeps the application shell and static assets usable offline and across
//! deploys. API traffic is never cached.

pub mod engine;
pub mod errors;
pub mod fetch;
pub mod route;
pub mod store;

pub use engine::{CacheEngine, CacheGeneration, EngineConfig, WorkerState};
pub use errors::CacheError;
pub use fetch::{Fetcher, HttpFetcher, Request, RequestMode, Response, ResponseKind};
pub use route::{RouteClass, RouteRules, Strategy};
pub use store::{CacheStorage, CachedEntry};
