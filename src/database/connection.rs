//! Connection management for Neo4j.

use super::query::{truncate_for_log, QueryResult, ResultRow};
use super::types::to_bolt_query;
use crate::config::DatabaseConfig;
use crate::constants::{HEALTH_CHECK_QUERY, HEALTH_CHECK_TIMEOUT, LOG_QUERY_PREVIEW_LEN};
use crate::error::ServerError;
use crate::templates::RenderedQuery;
use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph, Query, Txn};
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Result of a connectivity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStatus {
    /// Whether the trivial round-trip query succeeded.
    pub database_connected: bool,
}

impl HealthStatus {
    /// Overall service status label.
    pub fn status(&self) -> &'static str {
        if self.database_connected {
            "healthy"
        } else {
            "unhealthy"
        }
    }

    /// Database connectivity label.
    pub fn database(&self) -> &'static str {
        if self.database_connected {
            "connected"
        } else {
            "disconnected"
        }
    }
}

/// Query execution seam between the HTTP layer and the graph database.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Probe connectivity. Never fails; failures are reported in the status.
    async fn health_check(&self) -> HealthStatus;

    /// Execute a query in its own transaction and collect the rows.
    async fn execute(&self, query: &RenderedQuery) -> Result<QueryResult, ServerError>;
}

/// Owns the driver handle and the immutable connection configuration.
///
/// The underlying `Graph` is a pooled client; each call checks out its own
/// connection, so requests never share a session.
pub struct ConnectionManager {
    graph: Graph,
    config: DatabaseConfig,
}

impl ConnectionManager {
    /// Create the driver pool from configuration.
    ///
    /// Connections are opened lazily; call [`ConnectionManager::verify`] to
    /// check reachability and credentials up front.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, ServerError> {
        info!(
            "Creating Neo4j driver for {} (database: {}, max connections: {})",
            config.uri, config.database, config.pool.max_connections
        );

        let driver_config = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.username.as_str())
            .password(config.password.as_str())
            .db(config.database.as_str())
            .max_connections(config.pool.max_connections)
            .fetch_size(config.pool.fetch_size)
            .build()
            .map_err(|e| ServerError::config(format!("Invalid Neo4j settings: {}", e)))?;

        let graph = Graph::connect(driver_config)
            .await
            .map_err(|e| ServerError::connection_with_source("Failed to create Neo4j driver", e))?;

        Ok(Self {
            graph,
            config: config.clone(),
        })
    }

    /// Run the health query once, failing with a connection error when it does not succeed.
    ///
    /// The query runs in its own transaction rather than through `Graph::run`,
    /// which retries connection failures for up to a minute. The whole check is
    /// bounded by [`HEALTH_CHECK_TIMEOUT`].
    pub async fn verify(&self) -> Result<(), ServerError> {
        match timeout(HEALTH_CHECK_TIMEOUT, self.round_trip()).await {
            Ok(Ok(())) => {
                debug!("Connectivity check against {} succeeded", self.config.uri);
                Ok(())
            }
            Ok(Err(e)) => Err(ServerError::connection_with_source(
                format!("Cannot reach Neo4j at {}", self.config.uri),
                e,
            )),
            Err(_) => Err(ServerError::connection(format!(
                "Neo4j at {} did not answer within {:?}",
                self.config.uri, HEALTH_CHECK_TIMEOUT
            ))),
        }
    }

    async fn round_trip(&self) -> Result<(), neo4rs::Error> {
        let mut txn = self.graph.start_txn().await?;
        match txn.run(query(HEALTH_CHECK_QUERY)).await {
            Ok(()) => txn.commit().await,
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    debug!("Rollback of health check failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// The configuration this manager was created with.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}

#[async_trait]
impl GraphBackend for ConnectionManager {
    async fn health_check(&self) -> HealthStatus {
        match self.verify().await {
            Ok(()) => HealthStatus {
                database_connected: true,
            },
            Err(e) => {
                warn!("Health check failed: {}", e);
                HealthStatus {
                    database_connected: false,
                }
            }
        }
    }

    async fn execute(&self, rendered: &RenderedQuery) -> Result<QueryResult, ServerError> {
        let start = Instant::now();
        debug!(
            "Executing '{}': {}",
            rendered.template,
            truncate_for_log(&rendered.text, LOG_QUERY_PREVIEW_LEN)
        );

        let bolt_query = to_bolt_query(rendered)?;
        let mut txn = self.graph.start_txn().await?;

        match collect_rows(&mut txn, bolt_query, self.config.max_result_rows).await {
            Ok((rows, truncated)) => {
                txn.commit().await?;
                let result = QueryResult::new(rows, truncated, start.elapsed());
                debug!(
                    "Query '{}' completed: {} rows in {} ms",
                    rendered.template,
                    result.row_count(),
                    result.execution_time_ms
                );
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(
                        "Rollback after failed query '{}' also failed: {}",
                        rendered.template, rollback_err
                    );
                }
                Err(e)
            }
        }
    }
}

/// Stream rows out of an open transaction, keeping at most `max_rows`.
async fn collect_rows(
    txn: &mut Txn,
    bolt_query: Query,
    max_rows: usize,
) -> Result<(Vec<ResultRow>, bool), ServerError> {
    let mut stream = txn.execute(bolt_query).await?;
    let mut rows = Vec::new();
    let mut truncated = false;

    while let Some(row) = stream.next(txn.handle()).await? {
        if rows.len() >= max_rows {
            truncated = true;
            continue;
        }
        rows.push(ResultRow::from_row(&row)?);
    }

    Ok((rows, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use std::time::Duration;

    fn test_config(uri: &str) -> DatabaseConfig {
        DatabaseConfig {
            uri: uri.to_string(),
            username: "neo4j".to_string(),
            password: "test".to_string(),
            database: "neo4j".to_string(),
            pool: PoolConfig::default(),
            max_result_rows: 100,
            verify_on_startup: false,
        }
    }

    #[test]
    fn test_health_status_labels() {
        let up = HealthStatus {
            database_connected: true,
        };
        assert_eq!(up.status(), "healthy");
        assert_eq!(up.database(), "connected");

        let down = HealthStatus {
            database_connected: false,
        };
        assert_eq!(down.status(), "unhealthy");
        assert_eq!(down.database(), "disconnected");
    }

    #[tokio::test]
    async fn test_health_check_never_fails_when_unreachable() {
        // Nothing listens on port 1; the check must degrade, not error.
        let manager = ConnectionManager::connect(&test_config("bolt://127.0.0.1:1"))
            .await
            .unwrap();
        let status = manager.health_check().await;
        assert!(!status.database_connected);
        assert!(matches!(
            manager.verify().await,
            Err(ServerError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn test_health_check_answers_quickly_when_unreachable() {
        let manager = ConnectionManager::connect(&test_config("bolt://127.0.0.1:1"))
            .await
            .unwrap();

        let started = Instant::now();
        let status = manager.health_check().await;
        assert!(!status.database_connected);
        assert!(
            started.elapsed() < HEALTH_CHECK_TIMEOUT + Duration::from_secs(1),
            "health check took {:?}",
            started.elapsed()
        );
    }
}
