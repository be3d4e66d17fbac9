//! Error types for the Cypher template server.
//!
//! This module defines semantic error types and maps them onto HTTP
//! status codes so handlers can simply propagate with `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Domain-specific errors for the Cypher template server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error (unreachable database, rejected credentials, lost transport)
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution error (malformed or runtime-rejected query)
    #[error("Query execution error: {message}")]
    QueryExecution { message: String },

    /// Parameter validation error
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        /// Required parameters that were not supplied, in declaration order
        missing: Vec<String>,
    },

    /// Unknown template name
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// A template definition that cannot be loaded
    #[error("Invalid template '{name}': {reason}")]
    InvalidTemplate { name: String, reason: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connection error with a source.
    pub fn connection_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query execution error.
    pub fn query_error(msg: impl Into<String>) -> Self {
        Self::QueryExecution {
            message: msg.into(),
        }
    }

    /// Create a validation error that is not about missing parameters.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            missing: Vec::new(),
        }
    }

    /// Create a validation error naming the missing required parameters.
    pub fn missing_parameters(missing: Vec<String>) -> Self {
        Self::Validation {
            message: format!("Missing required parameters: {}", missing.join(", ")),
            missing,
        }
    }

    /// Create a template not found error.
    pub fn template_not_found(name: impl Into<String>) -> Self {
        Self::TemplateNotFound(name.into())
    }

    /// Create an invalid template error.
    pub fn invalid_template(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short machine-readable error kind used in response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration_error",
            Self::Connection { .. } => "connection_error",
            Self::QueryExecution { .. } => "query_error",
            Self::Validation { .. } => "validation_error",
            Self::TemplateNotFound(_) => "not_found",
            Self::InvalidTemplate { .. } => "invalid_template",
            Self::InvalidInput(_) => "invalid_input",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for this error.
    ///
    /// Caller mistakes are 4xx, database-side failures are 5xx.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            Self::Connection { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::QueryExecution { .. }
            | Self::Config(_)
            | Self::InvalidTemplate { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Missing parameter names carried by a validation error.
    pub fn missing(&self) -> &[String] {
        match self {
            Self::Validation { missing, .. } => missing,
            _ => &[],
        }
    }

    /// Get a user-friendly suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Config(_) => Some("Check your environment variables and configuration"),
            Self::Connection { .. } => {
                Some("Check NEO4J_URI, credentials, and that the database is running")
            }
            Self::Validation { .. } => {
                Some("Compare the supplied parameters with the template's parameter schema")
            }
            Self::TemplateNotFound(_) => Some("List available templates at /api/v1/templates"),
            Self::InvalidTemplate { .. } => {
                Some("Every $placeholder in the query body must be a declared parameter")
            }
            _ => None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = serde_json::json!({
            "error": self.kind(),
            "detail": self.to_string(),
        });
        if !self.missing().is_empty() {
            body["missing"] = serde_json::json!(self.missing());
        }
        if let Some(hint) = self.suggestion() {
            body["suggestion"] = serde_json::json!(hint);
        }
        (status, Json(body)).into_response()
    }
}

impl From<neo4rs::Error> for ServerError {
    fn from(e: neo4rs::Error) -> Self {
        use neo4rs::Error;

        match e {
            Error::IOError { .. } => ServerError::connection_with_source("IO error", e),
            Error::ConnectionError { .. } => ServerError::connection_with_source("Connection lost", e),
            Error::AuthenticationError { .. } => {
                ServerError::connection_with_source("Authentication rejected", e)
            }
            Error::UnsupportedScheme { .. } => {
                ServerError::connection_with_source("Invalid database URI", e)
            }
            other => ServerError::query_error(other.to_string()),
        }
    }
}

impl From<serde_yaml::Error> for ServerError {
    fn from(e: serde_yaml::Error) -> Self {
        ServerError::invalid_input(format!("YAML error: {}", e))
    }
}
