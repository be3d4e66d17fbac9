//! Server struct definition and initialization.

use crate::catalog::TemplateCatalog;
use crate::config::Config;
use crate::database::{ConnectionManager, GraphBackend, HealthStatus, QueryResult};
use crate::error::ServerError;
use crate::templates::{RenderedQuery, Template, TemplateRegistry, TemplateRenderer};
use crate::telemetry::{new_shared_metrics, QueryTimer, SharedMetrics};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// The Cypher template server instance.
///
/// Cloned into every request handler; all state is shared via `Arc` and is
/// read-only apart from the atomic metrics.
#[derive(Clone)]
pub struct CypherTemplateServer {
    /// Query execution backend.
    pub(crate) backend: Arc<dyn GraphBackend>,

    /// Templates loaded at startup.
    pub(crate) registry: Arc<TemplateRegistry>,

    /// Parameter validation policy.
    pub(crate) renderer: TemplateRenderer,

    /// Template catalog stored in the graph.
    pub(crate) catalog: TemplateCatalog,

    /// Server metrics for telemetry.
    pub(crate) metrics: SharedMetrics,
}

impl CypherTemplateServer {
    /// Create a new server instance with the given configuration.
    ///
    /// This loads the template registry, creates the driver pool and, unless
    /// disabled, checks that the database is reachable.
    pub async fn new(config: &Config) -> Result<Self, ServerError> {
        let registry = TemplateRegistry::load(&config.templates)?;

        let manager = ConnectionManager::connect(&config.database).await?;
        if config.database.verify_on_startup {
            manager.verify().await?;
            info!("Connected to Neo4j at {}", config.database.uri);
        } else {
            warn!("Startup connectivity check disabled; database errors will surface per request");
        }

        Ok(Self::with_backend(
            Arc::new(manager),
            registry,
            TemplateRenderer::from_strict(config.templates.strict_parameters),
        ))
    }

    /// Assemble a server around an existing backend.
    pub fn with_backend(
        backend: Arc<dyn GraphBackend>,
        registry: TemplateRegistry,
        renderer: TemplateRenderer,
    ) -> Self {
        Self {
            catalog: TemplateCatalog::new(backend.clone()),
            backend,
            registry: Arc::new(registry),
            renderer,
            metrics: new_shared_metrics(),
        }
    }

    /// Get a reference to the template registry.
    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Get a reference to the renderer.
    pub fn renderer(&self) -> &TemplateRenderer {
        &self.renderer
    }

    /// Get a reference to the template catalog.
    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Get a reference to the backend.
    pub fn backend(&self) -> &dyn GraphBackend {
        self.backend.as_ref()
    }

    /// Get a reference to the metrics collector.
    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Probe database connectivity.
    pub async fn health(&self) -> HealthStatus {
        self.backend.health_check().await
    }

    /// Validate parameters and render the query text without executing it.
    pub fn render_template(
        &self,
        name: &str,
        params: &Map<String, Value>,
    ) -> Result<(&Template, String), ServerError> {
        let template = self.registry.lookup(name)?;
        let text = self.renderer.render(template, params)?;
        Ok((template, text))
    }

    /// Validate parameters, bind them and execute the template.
    pub async fn execute_template(
        &self,
        name: &str,
        params: &Map<String, Value>,
    ) -> Result<QueryResult, ServerError> {
        let template = self.registry.lookup(name)?;
        let query = self.renderer.bind(template, params)?;
        self.run(&query).await
    }

    /// Execute a bound query, recording query metrics.
    pub async fn run(&self, query: &RenderedQuery) -> Result<QueryResult, ServerError> {
        let timer = QueryTimer::start(self.metrics.clone());
        match self.backend.execute(query).await {
            Ok(result) => {
                timer.stop(true, result.row_count());
                Ok(result)
            }
            Err(e) => {
                timer.stop(false, 0);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct DownBackend;

    #[async_trait]
    impl GraphBackend for DownBackend {
        async fn health_check(&self) -> HealthStatus {
            HealthStatus {
                database_connected: false,
            }
        }

        async fn execute(&self, _query: &RenderedQuery) -> Result<QueryResult, ServerError> {
            Err(ServerError::connection("connection refused"))
        }
    }

    fn server() -> CypherTemplateServer {
        CypherTemplateServer::with_backend(
            Arc::new(DownBackend),
            TemplateRegistry::builtin().unwrap(),
            TemplateRenderer::default(),
        )
    }

    fn iphone() -> Map<String, Value> {
        json!({
            "name": "iPhone 13",
            "description": "Black iPhone 13 with case",
            "category": "Electronics",
            "location_name": "Main Office"
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[tokio::test]
    async fn test_validation_happens_before_execution() {
        let server = server();
        let mut params = iphone();
        params.remove("location_name");

        let err = server.execute_template("create_item", &params).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation { .. }));
        assert_eq!(server.metrics().snapshot().queries_total, 0);
    }

    #[tokio::test]
    async fn test_backend_failures_are_counted() {
        let server = server();
        let err = server.execute_template("create_item", &iphone()).await.unwrap_err();

        assert!(matches!(err, ServerError::Connection { .. }));
        let snapshot = server.metrics().snapshot();
        assert_eq!(snapshot.queries_total, 1);
        assert_eq!(snapshot.queries_failed, 1);
    }

    #[test]
    fn test_render_template() {
        let server = server();
        let (template, text) = server.render_template("create_item", &iphone()).unwrap();
        assert_eq!(template.name, "create_item");
        assert!(text.contains(r#""Main Office""#));

        assert!(matches!(
            server.render_template("nonexistent_template", &iphone()),
            Err(ServerError::TemplateNotFound(_))
        ));
    }
}
