//! HTTP request handlers.
//!
//! Every handler opens a [`RequestContext`] so its log lines share a
//! correlation id, and holds a metrics guard while it runs so shutdown can
//! drain in-flight requests.

use crate::catalog::ComposeRequest;
use crate::constants::CREATE_ITEM_TEMPLATE;
use crate::database::QueryResult;
use crate::error::ServerError;
use crate::seed;
use crate::server::CypherTemplateServer;
use crate::telemetry::RequestContext;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

type ApiResult = Result<Json<Value>, ServerError>;

/// Query string of the catalog search endpoint.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub search_term: Option<String>,
}

/// Body of a successful template execution.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub template: String,
    pub result: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl ExecuteResponse {
    fn new(template: &str, result: QueryResult) -> Self {
        Self {
            template: template.to_string(),
            row_count: result.row_count(),
            truncated: result.truncated,
            execution_time_ms: result.execution_time_ms,
            result: result.rows.into_iter().map(|row| row.columns).collect(),
        }
    }
}

/// Log and count a failed request; pass successes through.
fn finish<T>(
    server: &CypherTemplateServer,
    ctx: &RequestContext,
    result: Result<T, ServerError>,
) -> Result<T, ServerError> {
    match &result {
        Ok(_) => debug!("{} completed in {:?}", ctx.log_prefix(), ctx.elapsed()),
        Err(e) => {
            server.metrics().record_request_failure();
            if e.status_code().is_server_error() {
                error!("{} failed: {}", ctx.log_prefix(), e);
            } else {
                warn!("{} rejected: {}", ctx.log_prefix(), e);
            }
        }
    }
    result
}

/// Parse a JSON object body; an empty body is an empty parameter set.
fn parse_params(body: &Bytes) -> Result<Map<String, Value>, ServerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ServerError::invalid_input(format!(
            "Request body must be a JSON object, got {}",
            crate::templates::json_type_name(&other)
        ))),
        Err(e) => Err(ServerError::invalid_input(format!("Malformed JSON body: {}", e))),
    }
}

/// `GET /api/v1/health`
///
/// Always 200; database trouble shows up in the body.
pub async fn health(State(server): State<CypherTemplateServer>) -> Json<Value> {
    let ctx = RequestContext::new().with_operation("health");
    let status = server.health().await;
    debug!(
        "{} {} (database {}) in {:?}",
        ctx.log_prefix(),
        status.status(),
        status.database(),
        ctx.elapsed()
    );
    Json(json!({
        "status": status.status(),
        "database": status.database(),
    }))
}

/// `GET /api/v1/templates`
pub async fn list_templates(State(server): State<CypherTemplateServer>) -> Json<Value> {
    let ctx = RequestContext::new().with_operation("list_templates");
    let templates: Vec<_> = server
        .registry()
        .list()
        .into_iter()
        .map(|t| t.summary())
        .collect();
    debug!("{} listed {} template(s)", ctx.log_prefix(), templates.len());
    Json(json!({ "templates": templates }))
}

/// `GET /api/v1/templates/{name}`
pub async fn get_template(
    State(server): State<CypherTemplateServer>,
    Path(name): Path<String>,
) -> ApiResult {
    let ctx = RequestContext::new().with_operation(format!("get:{}", name));
    let result = server
        .registry()
        .lookup(&name)
        .and_then(|template| {
            serde_json::to_value(template)
                .map_err(|e| ServerError::internal(format!("Cannot encode template: {}", e)))
        })
        .map(Json);
    finish(&server, &ctx, result)
}

/// `POST /api/v1/templates/{name}/render`
pub async fn render_template(
    State(server): State<CypherTemplateServer>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult {
    let ctx = RequestContext::new().with_operation(format!("render:{}", name));
    let _guard = server.metrics().begin_request();

    let result = parse_params(&body).and_then(|params| {
        let (template, text) = server.render_template(&name, &params)?;
        Ok(Json(json!({
            "template": template.name,
            "query": text,
            "parameters": params,
        })))
    });
    finish(&server, &ctx, result)
}

/// `POST /api/v1/templates/{name}/execute`
pub async fn execute_template(
    State(server): State<CypherTemplateServer>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<ExecuteResponse>, ServerError> {
    let ctx = RequestContext::new().with_operation(format!("execute:{}", name));
    let _guard = server.metrics().begin_request();
    info!("{} executing template", ctx.log_prefix());

    let result = match parse_params(&body) {
        Ok(params) => server
            .execute_template(&name, &params)
            .await
            .map(|r| Json(ExecuteResponse::new(&name, r))),
        Err(e) => Err(e),
    };
    finish(&server, &ctx, result)
}

/// `POST /api/v1/items`
///
/// Shorthand for executing the `create_item` template.
pub async fn create_item(
    State(server): State<CypherTemplateServer>,
    body: Bytes,
) -> Result<Json<ExecuteResponse>, ServerError> {
    let ctx = RequestContext::new().with_operation("create_item");
    let _guard = server.metrics().begin_request();

    let result = match parse_params(&body) {
        Ok(params) => server
            .execute_template(CREATE_ITEM_TEMPLATE, &params)
            .await
            .map(|r| Json(ExecuteResponse::new(CREATE_ITEM_TEMPLATE, r))),
        Err(e) => Err(e),
    };
    finish(&server, &ctx, result)
}

/// `GET /api/v1/templates/search?search_term=...`
pub async fn search_templates(
    State(server): State<CypherTemplateServer>,
    Query(params): Query<SearchParams>,
) -> ApiResult {
    let ctx = RequestContext::new().with_operation("search_templates");
    let _guard = server.metrics().begin_request();

    let result = match params.search_term {
        Some(term) => server
            .catalog()
            .search(server.registry(), server.renderer(), &term)
            .await
            .map(|templates| Json(json!({ "templates": templates }))),
        None => Err(ServerError::missing_parameters(vec![
            "search_term".to_string()
        ])),
    };
    finish(&server, &ctx, result)
}

/// `POST /api/v1/templates/publish`
pub async fn publish_templates(State(server): State<CypherTemplateServer>) -> ApiResult {
    let ctx = RequestContext::new().with_operation("publish_templates");
    let _guard = server.metrics().begin_request();

    let result = server
        .catalog()
        .publish(server.registry())
        .await
        .map(|summary| Json(json!(summary)));
    finish(&server, &ctx, result)
}

/// `POST /api/v1/templates/compose`
pub async fn compose_templates(
    State(server): State<CypherTemplateServer>,
    body: Bytes,
) -> ApiResult {
    let ctx = RequestContext::new().with_operation("compose_templates");
    let _guard = server.metrics().begin_request();

    let result = match serde_json::from_slice::<ComposeRequest>(&body) {
        Ok(request) => server
            .catalog()
            .compose(server.registry(), &request)
            .await
            .map(Json),
        Err(e) => Err(ServerError::invalid_input(format!(
            "Invalid compose request: {}",
            e
        ))),
    };
    finish(&server, &ctx, result)
}

/// `POST /api/v1/initialize`
pub async fn initialize(State(server): State<CypherTemplateServer>) -> ApiResult {
    let ctx = RequestContext::new().with_operation("initialize");
    let _guard = server.metrics().begin_request();

    let result = seed::initialize(server.backend())
        .await
        .map(|report| Json(json!(report)));
    finish(&server, &ctx, result)
}

/// `GET /api/v1/metrics`
pub async fn metrics(State(server): State<CypherTemplateServer>) -> Json<Value> {
    let ctx = RequestContext::new().with_operation("metrics");
    let snapshot = server.metrics().snapshot();
    debug!(
        "{} {} request(s), {} query(ies) so far",
        ctx.log_prefix(),
        snapshot.requests_total,
        snapshot.queries_total
    );
    Json(json!({
        "metrics": snapshot,
        "avg_query_time_ms": snapshot.avg_query_time_ms(),
        "success_rate": snapshot.success_rate(),
        "templates": server.registry().len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{GraphBackend, HealthStatus};
    use crate::templates::{RenderedQuery, TemplateRegistry, TemplateRenderer};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct UpBackend;

    #[async_trait]
    impl GraphBackend for UpBackend {
        async fn health_check(&self) -> HealthStatus {
            HealthStatus {
                database_connected: true,
            }
        }

        async fn execute(&self, _query: &RenderedQuery) -> Result<QueryResult, ServerError> {
            Ok(QueryResult::empty())
        }
    }

    /// Log sink shared with the test subscriber.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_read_only_handlers_log_with_correlation_prefix() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let server = CypherTemplateServer::with_backend(
            Arc::new(UpBackend),
            TemplateRegistry::builtin().unwrap(),
            TemplateRenderer::default(),
        );
        health(State(server.clone())).await;
        list_templates(State(server.clone())).await;
        metrics(State(server)).await;

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("[health] healthy (database connected)"));
        assert!(output.contains("[list_templates] listed 2 template(s)"));
        assert!(output.contains("[metrics]"));
    }

    #[test]
    fn test_parse_params() {
        assert!(parse_params(&Bytes::new()).unwrap().is_empty());
        assert!(parse_params(&Bytes::from_static(b"  \n")).unwrap().is_empty());

        let params = parse_params(&Bytes::from_static(br#"{"a": 1}"#)).unwrap();
        assert_eq!(params["a"], json!(1));

        let err = parse_params(&Bytes::from_static(b"[1, 2]")).unwrap_err();
        assert!(err.to_string().contains("JSON object"));

        let err = parse_params(&Bytes::from_static(b"{not json")).unwrap_err();
        assert!(matches!(err, ServerError::InvalidInput(_)));
    }
}
