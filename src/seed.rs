//! Sample data used to reset a database for demos and tests.

use crate::database::GraphBackend;
use crate::error::ServerError;
use crate::templates::RenderedQuery;
use serde::Serialize;
use tracing::{info, warn};

const CLEAR_QUERY: &str = "MATCH (n) DETACH DELETE n";

const SAMPLE_DATA_QUERY: &str = r#"
CREATE (kitchen:Location {name: 'Kitchen', type: 'room'})
CREATE (living_room:Location {name: 'Living Room', type: 'room'})
CREATE (bedroom:Location {name: 'Bedroom', type: 'room'})
CREATE (tv:Item {name: 'TV', description: '55 inch Smart TV', category: 'electronics'})
CREATE (book:Item {name: 'Favorite Book', description: 'Hardcover novel', category: 'books'})
CREATE (laptop:Item {name: 'Laptop', description: 'MacBook Pro', category: 'electronics'})
CREATE (tv)-[:LOCATED_IN]->(living_room)
CREATE (book)-[:LOCATED_IN]->(bedroom)
CREATE (laptop)-[:LOCATED_IN]->(bedroom)
"#;

/// Response for a successful reset.
#[derive(Debug, Clone, Serialize)]
pub struct InitializeReport {
    pub status: &'static str,
    pub message: &'static str,
}

/// Delete every node and load the sample locations and items.
pub async fn initialize(backend: &dyn GraphBackend) -> Result<InitializeReport, ServerError> {
    warn!("Deleting all nodes and relationships before loading sample data");
    backend
        .execute(&RenderedQuery::raw("clear_database", CLEAR_QUERY))
        .await?;
    backend
        .execute(&RenderedQuery::raw("load_sample_data", SAMPLE_DATA_QUERY))
        .await?;
    info!("Database initialized with sample data");

    Ok(InitializeReport {
        status: "success",
        message: "Database initialized with sample data",
    })
}
