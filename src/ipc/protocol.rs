//! IPC protocol definitions for shell-agent communication
//!
//! Newline-delimited JSON over a Unix domain socket. The portal shell sends
//! commands; the agent answers each with exactly one response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{AppStatus, ErrorEntry};
use crate::cache::WorkerState;

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands sent from the portal shell to the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Authenticated API call
    #[serde(rename_all = "camelCase")]
    Call {
        method: String,
        path: String,
        #[serde(default)]
        body: Option<Value>,
    },
    /// Resource fetch through the interception layer
    #[serde(rename_all = "camelCase")]
    Fetch {
        url: String,
        #[serde(default)]
        method: Option<String>,
        /// Top-level document navigation
        #[serde(default)]
        navigate: bool,
    },
    #[serde(rename_all = "camelCase")]
    Login { phone: String, password: String },
    /// Tokens obtained elsewhere (registration)
    #[serde(rename_all = "camelCase")]
    SetTokens {
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
    },
    Logout,
    #[serde(rename_all = "camelCase")]
    MarkRead { entity_id: String, timestamp: String },
    #[serde(rename_all = "camelCase")]
    LastRead { entity_id: String },
    /// Get agent status
    GetStatus,
}

/// Responses sent from the agent to the portal shell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Parsed JSON body of an API call (`null` for an empty body)
    #[serde(rename_all = "camelCase")]
    Json { data: Value },
    /// Resource served by the interception layer
    #[serde(rename_all = "camelCase")]
    Resource {
        status: u16,
        content_type: Option<String>,
        /// Base64-encoded body
        body: String,
    },
    #[serde(rename_all = "camelCase")]
    Success { message: Option<String> },
    #[serde(rename_all = "camelCase")]
    Error {
        error: String,
        /// HTTP status when the backend answered
        status: Option<u16>,
    },
    #[serde(rename_all = "camelCase")]
    Status {
        version: u32,
        authenticated: bool,
        app_status: AppStatus,
        generation: Option<String>,
        worker_state: Option<WorkerState>,
        /// Where the shell should navigate, if the session ended
        login_redirect: Option<String>,
        recent_errors: Vec<ErrorEntry>,
        cache_hits: u64,
        cache_misses: u64,
    },
    #[serde(rename_all = "camelCase")]
    LastRead {
        entity_id: String,
        timestamp: Option<String>,
    },
}

impl Response {
    pub fn error(error: impl Into<String>) -> Self {
        Response::Error {
            error: error.into(),
            status: None,
        }
    }
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n'); // Add newline delimiter
    Ok(json)
}
