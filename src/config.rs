//! Agent configuration
//!
//! Read from environment variables at startup. Every value has a default so the
//! agent runs against a local backend with no setup.

use std::env;
use std::path::PathBuf;

use tracing::warn;

/// Default origin serving the application shell
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8000";

/// Default API base (origin-relative)
pub const DEFAULT_API_BASE: &str = "/api/v1";

/// Default IPC socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/portal-agent.sock";

/// Build identifier used when none is configured
pub const DEV_BUILD_ID: &str = "dev";

/// Whether the interception layer should be installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Production,
    Development,
}

impl BuildMode {
    /// Parse a build mode string, falling back to development for unknown values
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => BuildMode::Production,
            "development" | "dev" | "" => BuildMode::Development,
            other => {
                warn!(mode = other, "Unknown build mode, using development");
                BuildMode::Development
            }
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, BuildMode::Production)
    }
}

/// Runtime configuration for the agent
#[derive(Debug, Clone)]
pub struct Config {
    /// Origin owning the app shell and static assets
    pub origin: String,
    /// API base address, absolute or relative to `origin`
    pub api_base: String,
    /// Build identifier (cache generation + registration version)
    pub build_id: String,
    /// Production or development mode
    pub build_mode: BuildMode,
    /// Directory holding the persisted key-value file
    pub state_dir: PathBuf,
    /// Directory holding one subdirectory per cache generation
    pub cache_dir: PathBuf,
    /// IPC socket path
    pub socket_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            build_id: DEV_BUILD_ID.to_string(),
            build_mode: BuildMode::Development,
            state_dir: default_state_dir(),
            cache_dir: default_cache_dir(),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

impl Config {
    /// Load configuration from `PORTAL_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(origin) = non_empty_var("PORTAL_ORIGIN") {
            config.origin = origin;
        }
        if let Some(base) =
            non_empty_var("PORTAL_API_BASE").or_else(|| non_empty_var("PORTAL_API_BASE_URL"))
        {
            config.api_base = base;
        }
        if let Some(build_id) = non_empty_var("PORTAL_BUILD_ID") {
            config.build_id = build_id;
        }
        if let Some(mode) = non_empty_var("PORTAL_BUILD_MODE") {
            config.build_mode = BuildMode::parse(&mode);
        }
        if let Some(dir) = non_empty_var("PORTAL_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_var("PORTAL_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(socket) = non_empty_var("PORTAL_SOCKET") {
            config.socket_path = PathBuf::from(socket);
        }

        config
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_build(mut self, build_id: impl Into<String>, mode: BuildMode) -> Self {
        self.build_id = build_id.into();
        self.build_mode = mode;
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Path of the persisted key-value file
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("portal-agent")
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("portal-agent")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_mode_parse() {
        assert_eq!(BuildMode::parse("production"), BuildMode::Production);
        assert_eq!(BuildMode::parse(" PROD "), BuildMode::Production);
        assert_eq!(BuildMode::parse("development"), BuildMode::Development);
        assert_eq!(BuildMode::parse("staging"), BuildMode::Development);
    }

    #[test]
    fn test_defaults_and_builders() {
        let config = Config::default()
            .with_origin("https://portal.example")
            .with_build("2024.10.1", BuildMode::Production)
            .with_state_dir("/var/lib/portal")
            .with_cache_dir("/var/cache/portal");

        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.origin, "https://portal.example");
        assert!(config.build_mode.is_production());
        assert_eq!(config.state_file(), PathBuf::from("/var/lib/portal/state.json"));
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/portal"));
    }
}
