//! # Cypher Template Server
//!
//! An HTTP gateway to Neo4j that executes named, parameterized Cypher templates.
//!
//! This crate provides:
//! - **Templates**: YAML definitions with a typed parameter schema, loaded once
//!   into a read-only registry
//! - **Rendering**: required/type validation, then native parameter binding for
//!   execution or JSON-literal rendering for previews
//! - **Connection management**: a pooled Bolt driver with transactional
//!   execution and a health probe that never fails
//! - **Catalog**: publishing, searching and composing templates inside the graph
//!
//! ## Architecture
//!
//! Request → template lookup → parameter validation → bound query →
//! [`database::GraphBackend`] → JSON rows.

pub mod catalog;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod handlers;
pub mod seed;
pub mod server;
pub mod shutdown;
pub mod telemetry;
pub mod templates;
pub mod transport;

pub use config::Config;
pub use error::ServerError;
pub use server::CypherTemplateServer;
