//! Interception layer registration

pub mod host;

pub use host::{script_url, RegistrationInfo, WorkerHost, WORKER_SCRIPT};
