//! Oura source connector configuration.
//!
//! # Configuration Loading Priority
//!
//! 1. Compiled-in defaults
//! 2. Explicit file passed on the command line
//! 3. `OURA_CONNECTOR_CONFIG=/path/to/config.yaml`
//! 4. Search path: `/etc/oura-connector/config.yaml`,
//!    `~/.config/oura-connector/config.yaml`, `./oura-connector.yaml`
//! 5. Environment variables (highest priority)
//!
//! # Example Configuration
//!
//! ```yaml
//! repository:
//!   url: "https://radar.example.org/rest-sources/backend/"
//!   token_url: "https://radar.example.org/managementportal/oauth/token"
//!   client_id: "oura-connector"
//!   client_secret: "${OURA_CLIENT_SECRET}"
//!
//! cache:
//!   users: { refresh: 1h, retry: 1m }
//!   credentials: { refresh: 1d, retry: 1m }
//!   token_expiry_margin: 1m
//!
//! logging:
//!   level: debug
//! ```

#![allow(missing_docs)]

mod error;
mod loader;
mod types;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use types::*;

/// Load configuration from default locations.
pub fn load() -> Result<ConnectorConfig, ConfigError> {
    ConfigLoader::new().load()
}

/// Load configuration from a specific file.
pub fn load_from_file(path: &str) -> Result<ConnectorConfig, ConfigError> {
    ConfigLoader::new().with_file(path).load()
}
