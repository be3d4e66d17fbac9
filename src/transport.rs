//! HTTP transport: listener configuration, routing, and serving.

use crate::config::{flag_var, parse_var};
use crate::constants::{API_PREFIX, DEFAULT_HTTP_HOST, DEFAULT_HTTP_PORT, DEFAULT_MAX_BODY_SIZE};
use crate::handlers;
use crate::server::CypherTemplateServer;
use crate::shutdown::SharedShutdownController;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use std::future::IntoFuture;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Host to bind to.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Enable CORS.
    pub enable_cors: bool,

    /// Allowed origins for CORS (empty means all).
    pub cors_origins: Vec<String>,

    /// Enable request tracing via tower-http TraceLayer.
    pub enable_tracing: bool,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HTTP_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            enable_cors: false,
            cors_origins: Vec::new(),
            enable_tracing: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl HttpConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: std::env::var("HTTP_HOST")
                .ok()
                .filter(|h| !h.trim().is_empty())
                .unwrap_or(defaults.host),
            port: parse_var("HTTP_PORT", defaults.port),
            enable_cors: flag_var("HTTP_CORS", defaults.enable_cors),
            cors_origins: std::env::var("HTTP_CORS_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            enable_tracing: flag_var("HTTP_TRACING", defaults.enable_tracing),
            max_body_size: parse_var("HTTP_MAX_BODY_SIZE", defaults.max_body_size),
        }
    }

    /// Socket address string to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Build the API router.
pub fn router(server: CypherTemplateServer, config: &HttpConfig) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/initialize", post(handlers::initialize))
        .route("/items", post(handlers::create_item))
        .route("/templates", get(handlers::list_templates))
        .route("/templates/search", get(handlers::search_templates))
        .route("/templates/publish", post(handlers::publish_templates))
        .route("/templates/compose", post(handlers::compose_templates))
        .route("/templates/{name}", get(handlers::get_template))
        .route("/templates/{name}/render", post(handlers::render_template))
        .route("/templates/{name}/execute", post(handlers::execute_template));

    let mut app = Router::new()
        .nest(API_PREFIX, api)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .with_state(server);

    if config.enable_cors {
        app = app.layer(cors_layer(&config.cors_origins));
    }

    if config.enable_tracing {
        app = app.layer(TraceLayer::new_for_http());
    }

    app
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

/// Start the HTTP server, stopping when the shutdown controller fires.
pub async fn start_http_server_with_shutdown(
    server: CypherTemplateServer,
    config: HttpConfig,
    shutdown_controller: Option<SharedShutdownController>,
) -> Result<(), anyhow::Error> {
    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr).await?;

    info!("HTTP server listening on http://{}", addr);
    info!("Health endpoint: http://{}{}/health", addr, API_PREFIX);
    if config.enable_tracing {
        info!("Request tracing enabled");
    }

    serve(listener, server, &config, shutdown_controller).await
}

/// Serve on an already bound listener.
///
/// Once shutdown is signalled the listener stops accepting and in-flight
/// requests get the controller's drain timeout to finish; connections still
/// open after that are abandoned.
pub async fn serve(
    listener: TcpListener,
    server: CypherTemplateServer,
    config: &HttpConfig,
    shutdown_controller: Option<SharedShutdownController>,
) -> Result<(), anyhow::Error> {
    let metrics = server.metrics().clone();
    let app = router(server, config);

    let Some(controller) = shutdown_controller else {
        axum::serve(listener, app).await?;
        return Ok(());
    };

    let mut stop_signal = controller.signal();
    let mut drain_signal = controller.signal();
    let serving = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            stop_signal.recv().await;
            info!("HTTP server received shutdown signal");
        })
        .into_future();
    tokio::pin!(serving);

    tokio::select! {
        result = &mut serving => result?,
        () = async {
            drain_signal.recv().await;
            controller.graceful_shutdown(&metrics).await;
        } => {
            let remaining = metrics.in_flight();
            if remaining > 0 {
                warn!(
                    "Abandoning {} request(s) still running after the drain timeout",
                    remaining
                );
            }
        }
    }

    Ok(())
}
