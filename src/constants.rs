//! Centralized constants for the Cypher template server.
//!
//! This module contains all magic numbers and default values used throughout
//! the codebase, making them easy to find, understand, and modify.

use std::time::Duration;

// =============================================================================
// Connection Constants
// =============================================================================

/// Default logical database name.
pub const DEFAULT_DATABASE: &str = "neo4j";

/// Default maximum connections in the driver pool.
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Default number of records fetched per round-trip.
pub const DEFAULT_FETCH_SIZE: usize = 200;

/// Query used for connectivity checks.
pub const HEALTH_CHECK_QUERY: &str = "RETURN 1";

/// Upper bound on a single connectivity check.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Result Size Constants
// =============================================================================

/// Default maximum result rows.
pub const DEFAULT_MAX_RESULT_ROWS: usize = 10_000;

/// Maximum query length shown in debug logs.
pub const LOG_QUERY_PREVIEW_LEN: usize = 200;

// =============================================================================
// HTTP Constants
// =============================================================================

/// Default bind host.
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";

/// Default bind port.
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Default maximum request body size (1 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Route prefix for the versioned API.
pub const API_PREFIX: &str = "/api/v1";

// =============================================================================
// Shutdown Constants
// =============================================================================

/// Default time allowed for in-flight requests to finish.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while draining.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Template Constants
// =============================================================================

/// Name of the built-in item creation template.
pub const CREATE_ITEM_TEMPLATE: &str = "create_item";

/// Name of the built-in catalog search template.
pub const SEARCH_TEMPLATES_TEMPLATE: &str = "search_templates";

/// File extensions recognized as template definitions.
pub const TEMPLATE_FILE_EXTENSIONS: &[&str] = &["yaml", "yml"];
