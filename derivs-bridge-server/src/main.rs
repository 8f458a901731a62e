use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use derivs_bridge::{
    aggregate::{
        DEFAULT_INST_ID, DEFAULT_INST_TYPE, DerivsAggregator, DerivsQuery, DerivsResponse,
        DerivsSource, MetaResponse,
    },
    cluster::ClusterSnapshot,
    config::{BridgeConfig, parse_or, secs_or},
    exchange::okx::{rest::OkxRestClient, transport::OkxTransport},
    registry::FeedRegistry,
    streams::FeedTransport,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::Arc,
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Default HTTP listen address.
const DEFAULT_HTTP_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 8000));

/// Default deadline for a single HTTP request's upstream fan-out.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    init_logging();

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }

    // Process wide TLS provider for wss:// feed connections
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = BridgeConfig::from_env();
    let server = ServerConfig::from_env();
    info!(?config, ?server, "starting derivs-bridge server");

    let source = match OkxRestClient::new(&config.rest) {
        Ok(source) => Arc::new(source),
        Err(error) => {
            error!(%error, "failed to build Okx REST client");
            return;
        }
    };

    let registry = Arc::new(FeedRegistry::new(
        OkxTransport::new(config.stream.clone()),
        config.stream,
        config.window,
    ));
    let aggregator = Arc::new(DerivsAggregator::new(source, Arc::clone(&registry)));

    let app = router(AppState::new(aggregator, server.request_timeout))
        .layer(TraceLayer::new_for_http());

    let listener = match TcpListener::bind(server.http_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(addr = %server.http_addr, %error, "failed to bind HTTP listener");
            return;
        }
    };

    info!("HTTP server listening on http://{}", server.http_addr);

    if let Err(error) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(%error, "HTTP server failed");
    }

    registry.shutdown().await;
    info!("derivs-bridge server stopped");
}

/// HTTP layer configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ServerConfig {
    http_addr: SocketAddr,
    request_timeout: Duration,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            http_addr: parse_or(&lookup, "HTTP_ADDR", DEFAULT_HTTP_ADDR),
            request_timeout: secs_or(&lookup, "REQUEST_TIMEOUT_SEC", DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

/// Shared handler state.
struct AppState<Source, Transport> {
    aggregator: Arc<DerivsAggregator<Source, Transport>>,
    request_timeout: Duration,
}

impl<Source, Transport> AppState<Source, Transport> {
    fn new(aggregator: Arc<DerivsAggregator<Source, Transport>>, request_timeout: Duration) -> Self {
        Self {
            aggregator,
            request_timeout,
        }
    }
}

impl<Source, Transport> Clone for AppState<Source, Transport> {
    fn clone(&self) -> Self {
        Self {
            aggregator: Arc::clone(&self.aggregator),
            request_timeout: self.request_timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MetaQuery {
    #[serde(rename = "instId")]
    inst_id: String,
    #[serde(rename = "instType")]
    inst_type: String,
}

impl Default for MetaQuery {
    fn default() -> Self {
        Self {
            inst_id: DEFAULT_INST_ID.to_string(),
            inst_type: DEFAULT_INST_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ClustersQuery {
    #[serde(rename = "instId")]
    inst_id: String,
}

impl Default for ClustersQuery {
    fn default() -> Self {
        Self {
            inst_id: DEFAULT_INST_ID.to_string(),
        }
    }
}

fn router<Source, Transport>(state: AppState<Source, Transport>) -> Router
where
    Source: DerivsSource,
    Transport: FeedTransport,
{
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/btc-derivs", get(btc_derivs::<Source, Transport>))
        .route("/meta", get(meta::<Source, Transport>))
        .route("/liq-clusters", get(liq_clusters::<Source, Transport>))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Composite snapshot. Always 200, a request exceeding its deadline reports every field
/// as null.
async fn btc_derivs<Source, Transport>(
    State(state): State<AppState<Source, Transport>>,
    Query(query): Query<DerivsQuery>,
) -> Json<DerivsResponse>
where
    Source: DerivsSource,
    Transport: FeedTransport,
{
    match tokio::time::timeout(state.request_timeout, state.aggregator.derivs(&query)).await {
        Ok(response) => Json(response),
        Err(_) => {
            warn!(
                inst_id = %query.inst_id,
                timeout_secs = state.request_timeout.as_secs(),
                "derivs request timed out, reporting nulls"
            );
            Json(DerivsResponse::default())
        }
    }
}

async fn meta<Source, Transport>(
    State(state): State<AppState<Source, Transport>>,
    Query(query): Query<MetaQuery>,
) -> Json<MetaResponse>
where
    Source: DerivsSource,
    Transport: FeedTransport,
{
    let response = tokio::time::timeout(
        state.request_timeout,
        state.aggregator.meta(&query.inst_id, &query.inst_type),
    )
    .await
    .unwrap_or_else(|_| {
        warn!(inst_id = %query.inst_id, "meta request timed out, reporting null");
        MetaResponse::default()
    });

    Json(response)
}

async fn liq_clusters<Source, Transport>(
    State(state): State<AppState<Source, Transport>>,
    Query(query): Query<ClustersQuery>,
) -> Json<Option<ClusterSnapshot>>
where
    Source: DerivsSource,
    Transport: FeedTransport,
{
    Json(state.aggregator.clusters(&query.inst_id))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl-C, shutting down"),
        Err(error) => {
            error!(%error, "failed to listen for Ctrl-C, graceful shutdown disabled");
            std::future::pending::<()>().await;
        }
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    // LOG_FORMAT=json for structured output
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
