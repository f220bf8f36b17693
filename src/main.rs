//! Portal Agent daemon
//!
//! Runs the IPC server by default. The one-shot commands exercise the same
//! dispatch path from a terminal.

use anyhow::{anyhow, Result};
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use portal_agent::agent::Agent;
use portal_agent::config::Config;
use portal_agent::ipc::server::process_command;
use portal_agent::ipc::{serialize_response, Command as IpcCommand, IpcServer};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run IPC server mode (default)
    Server,
    /// Send one API call and print the result (CLI mode)
    Call {
        method: String,
        path: String,
        body: Option<serde_json::Value>,
    },
    /// Load one resource through the cache layer (CLI mode)
    Fetch { url: String },
    /// Drop stored tokens (CLI mode)
    Logout,
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"Portal Agent - offline cache and authenticated API client for the service portal

USAGE:
    portal-agent                              # Run IPC server (default)
    portal-agent call <method> <path> [json]
    portal-agent fetch <url>
    portal-agent logout
    portal-agent help

COMMANDS:
    (none)  Run IPC server mode (waits for commands from the portal shell)
    call    Send an authenticated API request and print the JSON body
    fetch   Load a resource through the cache layer and print its status
    logout  Clear stored tokens
    help    Show this help message

EXAMPLES:
    portal-agent call GET me
    portal-agent call POST /api/v1/tickets/ '{{"title":"Leaking tap"}}'
    portal-agent fetch /assets/app.js

ENVIRONMENT:
    PORTAL_ORIGIN        App origin (default http://127.0.0.1:8000)
    PORTAL_API_BASE_URL  API base URL or path (default /api/v1)
    PORTAL_BUILD_ID      Build identifier used to version the cache
    PORTAL_BUILD_MODE    production | development
    PORTAL_STATE_DIR     Directory for persisted tokens and markers
    PORTAL_CACHE_DIR     Directory for cached shell documents and assets
    PORTAL_SOCKET        IPC socket path
    RUST_LOG             Log filter (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Server);
    }

    match args[1].as_str() {
        "call" => {
            if args.len() < 4 {
                return Err(anyhow!("Usage: portal-agent call <method> <path> [json]"));
            }
            let body = match args.get(4) {
                Some(raw) => Some(
                    serde_json::from_str(raw).map_err(|e| anyhow!("Invalid JSON body: {}", e))?,
                ),
                None => None,
            };
            Ok(Command::Call {
                method: args[2].clone(),
                path: args[3].clone(),
                body,
            })
        }
        "fetch" => {
            let url = args
                .get(2)
                .ok_or_else(|| anyhow!("Usage: portal-agent fetch <url>"))?;
            Ok(Command::Fetch { url: url.clone() })
        }
        "logout" => Ok(Command::Logout),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

/// Run a single command against a fresh agent and print the response line
async fn run_once(config: Config, command: IpcCommand) -> Result<()> {
    let agent = Agent::start(config).await?;
    let response = process_command(command, &agent).await;
    let json = serialize_response(&response)?;
    print!("{}", String::from_utf8_lossy(&json));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Parse command
    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    let config = Config::from_env();

    match command {
        Command::Server => {
            info!("Starting portal agent in IPC server mode");

            let agent = Arc::new(Agent::start(config).await?);
            let socket_path = agent.config.socket_path.clone();

            let mut ipc_server = IpcServer::new(agent, socket_path);
            if let Err(e) = ipc_server.start().await {
                error!(error = %e, "Failed to start IPC server");
                return Err(e);
            }

            info!("Agent ready. Waiting for commands from the portal shell...");

            let ipc_server = Arc::new(ipc_server);
            let runner = Arc::clone(&ipc_server);
            let ipc_handle = tokio::spawn(async move {
                if let Err(e) = runner.run().await {
                    error!(error = %e, "IPC server error");
                }
            });

            // Wait for Ctrl+C
            tokio::signal::ctrl_c().await?;

            info!("Received shutdown signal, stopping...");
            ipc_handle.abort();
            ipc_server.stop().await?;

            info!("Shutdown complete.");
        }
        Command::Call { method, path, body } => {
            run_once(config, IpcCommand::Call { method, path, body }).await?;
        }
        Command::Fetch { url } => {
            run_once(
                config,
                IpcCommand::Fetch {
                    url,
                    method: None,
                    navigate: false,
                },
            )
            .await?;
        }
        Command::Logout => {
            run_once(config, IpcCommand::Logout).await?;
        }
        Command::Help => {
            print_help();
        }
    }

    Ok(())
}
