//! Configuration management for the Cypher template server.
//!
//! Configuration is loaded from environment variables following the 12-factor app pattern.
//! A `.env` file is honored by the binary before this module is consulted.

use crate::constants::{
    DEFAULT_DATABASE, DEFAULT_FETCH_SIZE, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_RESULT_ROWS,
};
use crate::error::ServerError;
use crate::shutdown::ShutdownConfig;
use crate::transport::HttpConfig;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection configuration
    pub database: DatabaseConfig,

    /// Template registry configuration
    pub templates: TemplateConfig,

    /// HTTP listener configuration
    pub http: HttpConfig,

    /// Graceful shutdown configuration
    pub shutdown: ShutdownConfig,
}

/// Database connection configuration.
///
/// Immutable for the lifetime of the process; owned by the connection manager.
#[derive(Clone)]
pub struct DatabaseConfig {
    /// Bolt URI, e.g. `bolt://localhost:7687` or `neo4j://host:7687`
    pub uri: String,

    /// Username
    pub username: String,

    /// Password
    pub password: String,

    /// Logical database name
    pub database: String,

    /// Driver pool configuration
    pub pool: PoolConfig,

    /// Maximum result rows returned per query
    pub max_result_rows: usize,

    /// Refuse to start when the database cannot be reached
    pub verify_on_startup: bool,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("pool", &self.pool)
            .field("max_result_rows", &self.max_result_rows)
            .field("verify_on_startup", &self.verify_on_startup)
            .finish()
    }
}

/// Driver pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub max_connections: usize,

    /// Records fetched per round-trip
    pub fetch_size: usize,
}

/// Template registry configuration.
#[derive(Debug, Clone, Default)]
pub struct TemplateConfig {
    /// Directory of additional template files (`*.yaml`, `*.yml`)
    pub directory: Option<PathBuf>,

    /// Reject parameters that a template does not declare
    pub strict_parameters: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// ## Required
    /// - `NEO4J_URI`: Bolt URI of the database
    /// - `NEO4J_USER`: Username
    /// - `NEO4J_PASSWORD`: Password
    ///
    /// ## Optional
    /// - `NEO4J_DATABASE`: Logical database name (default: neo4j)
    /// - `NEO4J_MAX_CONNECTIONS`: Pool size (default: 16)
    /// - `NEO4J_FETCH_SIZE`: Records per fetch (default: 200)
    /// - `NEO4J_MAX_ROWS`: Maximum result rows (default: 10000)
    /// - `NEO4J_VERIFY_ON_STARTUP`: Fail startup when unreachable (default: true)
    /// - `TEMPLATE_DIR`: Directory of extra template files
    /// - `TEMPLATE_STRICT_PARAMS`: Reject undeclared parameters (default: false)
    /// - `HTTP_*` and `SHUTDOWN_*`: see [`HttpConfig`] and [`ShutdownConfig`]
    pub fn from_env() -> Result<Self, ServerError> {
        Ok(Config {
            database: DatabaseConfig::from_env()?,
            templates: TemplateConfig::from_env(),
            http: HttpConfig::from_env(),
            shutdown: ShutdownConfig::from_env(),
        })
    }
}

impl DatabaseConfig {
    /// Load the database section from environment variables.
    pub fn from_env() -> Result<Self, ServerError> {
        let uri = required_var("NEO4J_URI")?;
        let username = required_var("NEO4J_USER")?;
        let password = required_var("NEO4J_PASSWORD")?;

        let database = std::env::var("NEO4J_DATABASE")
            .ok()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        Ok(DatabaseConfig {
            uri,
            username,
            password,
            database,
            pool: PoolConfig {
                max_connections: parse_var("NEO4J_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS),
                fetch_size: parse_var("NEO4J_FETCH_SIZE", DEFAULT_FETCH_SIZE),
            },
            max_result_rows: parse_var("NEO4J_MAX_ROWS", DEFAULT_MAX_RESULT_ROWS),
            verify_on_startup: flag_var("NEO4J_VERIFY_ON_STARTUP", true),
        })
    }
}

impl TemplateConfig {
    /// Load the template section from environment variables.
    pub fn from_env() -> Self {
        Self {
            directory: std::env::var("TEMPLATE_DIR")
                .ok()
                .filter(|d| !d.trim().is_empty())
                .map(PathBuf::from),
            strict_parameters: flag_var("TEMPLATE_STRICT_PARAMS", false),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            fetch_size: DEFAULT_FETCH_SIZE,
        }
    }
}

/// Read a variable that must be present and non-empty.
fn required_var(name: &str) -> Result<String, ServerError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ServerError::config(format!(
            "{} environment variable is required",
            name
        ))),
    }
}

/// Parse an optional variable, falling back to the default when absent or malformed.
pub(crate) fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a boolean flag (`true`/`1` or `false`/`0`).
pub(crate) fn flag_var(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
