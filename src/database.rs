//! Database connectivity and query execution.

mod connection;
mod query;
pub mod types;

pub use connection::{ConnectionManager, GraphBackend, HealthStatus};
pub use query::{QueryResult, ResultRow};
pub use types::{json_to_bolt, to_bolt_query};
