//! IPC Server - Unix socket server for the portal shell
//!
//! Handles incoming connections and dispatches commands to the agent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine as _;
use reqwest::Method;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::agent::Agent;
use crate::cache::Request;
use crate::ipc::protocol::{parse_command, serialize_response, Command, Response, PROTOCOL_VERSION};
use crate::session::TokenPair;

/// IPC Server that listens for commands from the portal shell
pub struct IpcServer {
    /// Shared agent state
    agent: Arc<Agent>,
    /// Socket path
    socket_path: PathBuf,
    /// Socket listener
    listener: Option<UnixListener>,
    /// Active connections counter
    connection_count: Arc<RwLock<u32>>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(agent: Arc<Agent>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            agent,
            socket_path: socket_path.into(),
            listener: None,
            connection_count: Arc::new(RwLock::new(0)),
        }
    }

    /// Start the IPC server
    pub async fn start(&mut self) -> Result<()> {
        // Clean up any existing socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        let listener = UnixListener::bind(&self.socket_path).context("Failed to bind Unix socket")?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let agent = Arc::clone(&self.agent);
                    let connection_count = Arc::clone(&self.connection_count);

                    // Spawn a new task to handle this connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, agent, connection_count).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Stop the IPC server and clean up
    pub async fn stop(&self) -> Result<()> {
        remove_socket(&self.socket_path)?;
        info!("IPC server stopped");
        Ok(())
    }

    /// Get the number of active connections
    pub async fn connection_count(&self) -> u32 {
        *self.connection_count.read().await
    }
}

fn remove_socket(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path).context("Failed to remove socket file")?;
    }
    Ok(())
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    agent: Arc<Agent>,
    connection_count: Arc<RwLock<u32>>,
) -> Result<()> {
    {
        let mut count = connection_count.write().await;
        *count += 1;
        debug!(count = *count, "New connection");
    }

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    // Read commands line by line (newline-delimited JSON)
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match parse_command(trimmed.as_bytes()) {
                    Ok(command) => process_command(command, &agent).await,
                    Err(e) => {
                        warn!(error = %e, "Failed to parse command");
                        Response::error(format!("Invalid command: {}", e))
                    }
                };

                match serialize_response(&response) {
                    Ok(json) => {
                        if let Err(e) = writer.write_all(&json).await {
                            error!(error = %e, "Failed to write response");
                            break;
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to serialize response"),
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    {
        let mut count = connection_count.write().await;
        *count = count.saturating_sub(1);
        debug!(count = *count, "Connection ended");
    }

    Ok(())
}

fn parse_method(method: &str) -> Option<Method> {
    Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes()).ok()
}

/// Process a command and return a response
pub async fn process_command(command: Command, agent: &Agent) -> Response {
    match command {
        Command::Call { method, path, body } => {
            let Some(method) = parse_method(&method) else {
                return Response::error(format!("Invalid method: {}", method));
            };
            debug!(method = %method, path = %path, "Processing call command");

            match agent.client.call(method, &path, body.as_ref()).await {
                Ok(data) => Response::Json { data },
                Err(e) => Response::Error {
                    error: e.to_string(),
                    status: e.status(),
                },
            }
        }

        Command::Fetch { url, method, navigate } => {
            let url = match agent.resource_url(&url) {
                Ok(url) => url,
                Err(e) => return Response::error(format!("{:#}", e)),
            };
            let mut request = if navigate {
                Request::navigate(url)
            } else {
                Request::get(url)
            };
            if let Some(method) = method {
                match parse_method(&method) {
                    Some(method) => request = request.with_method(method),
                    None => return Response::error(format!("Invalid method: {}", method)),
                }
            }

            match agent.host.fetch(request).await {
                Ok(response) => Response::Resource {
                    status: response.status.as_u16(),
                    content_type: response.content_type().map(String::from),
                    body: base64::engine::general_purpose::STANDARD.encode(&response.body),
                },
                Err(e) => Response::error(e.to_string()),
            }
        }

        Command::Login { phone, password } => match agent.client.login(&phone, &password).await {
            Ok(_) => {
                agent.navigator.clear();
                Response::Success {
                    message: Some("Logged in".to_string()),
                }
            }
            Err(e) => Response::Error {
                error: e.to_string(),
                status: e.status(),
            },
        },

        Command::SetTokens {
            access_token,
            refresh_token,
        } => match agent
            .client
            .set_tokens(&TokenPair::new(access_token, refresh_token))
        {
            Ok(()) => {
                agent.navigator.clear();
                Response::Success { message: None }
            }
            Err(e) => Response::error(e.to_string()),
        },

        Command::Logout => {
            agent.client.logout();
            Response::Success {
                message: Some("Logged out".to_string()),
            }
        }

        Command::MarkRead {
            entity_id,
            timestamp,
        } => match agent.markers.mark(&entity_id, &timestamp) {
            Ok(()) => Response::Success { message: None },
            Err(e) => Response::error(e.to_string()),
        },

        Command::LastRead { entity_id } => Response::LastRead {
            timestamp: agent.markers.get(&entity_id),
            entity_id,
        },

        Command::GetStatus => {
            debug!("Processing getStatus command");
            let registration = agent.host.info().await;
            let (cache_hits, cache_misses, _) = agent.host.store().stats();

            Response::Status {
                version: PROTOCOL_VERSION,
                authenticated: agent.client.is_authenticated(),
                app_status: agent.client.app_status(),
                generation: registration.as_ref().map(|r| r.generation.clone()),
                worker_state: registration.as_ref().map(|r| r.state),
                login_redirect: agent.navigator.pending(),
                recent_errors: agent.client.recent_errors(),
                cache_hits,
                cache_misses,
            }
        }
    }
}
