//! Local read-only HTTP surface over a sync session.
//!
//! The session publishes its buffer into a [`SharedSnapshot`] through an
//! observer; handlers only ever read that copy.
//!
//! # Endpoints
//!
//! ```text
//! GET /health            liveness, version, record count
//! GET /latest            newest reading
//! GET /records?limit=N   newest N readings (default 10)
//! GET /averages?days=N   averages over the last N days (default 7)
//! GET /summary           full dashboard summary
//! ```

use crate::core::{average, filter_since, MetricAverages, ReferenceRanges, SummaryBuilder};
use crate::session::ChangeObserver;
use crate::source::{MetricRecord, UserId};
use axum::{
    extract::{Query, State},
    http::{Method, StatusCode},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Rows returned by `/records` when no limit is given.
pub const DEFAULT_RECORD_LIMIT: usize = 10;

/// Period used by `/averages` when no days are given.
pub const DEFAULT_AVERAGE_DAYS: u32 = 7;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Ranges used to flag readings in summaries
    pub ranges: ReferenceRanges,
}

impl ServerConfig {
    pub fn new(port: u16, ranges: ReferenceRanges) -> Self {
        Self { port, ranges }
    }
}

#[derive(Debug)]
struct Published {
    user_id: UserId,
    records: Vec<MetricRecord>,
    updated_at: Option<DateTime<Utc>>,
}

/// Latest copy of a session's buffer, shared with the HTTP handlers.
#[derive(Debug, Clone)]
pub struct SharedSnapshot {
    inner: Arc<RwLock<Published>>,
}

impl SharedSnapshot {
    pub fn new(user_id: UserId) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Published {
                user_id,
                records: Vec::new(),
                updated_at: None,
            })),
        }
    }

    /// Replace the published copy.
    pub fn publish(&self, records: &[MetricRecord]) {
        let mut published = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        published.records = records.to_vec();
        published.updated_at = Some(Utc::now());
    }

    /// An observer that publishes every change of a session.
    pub fn observer(&self) -> ChangeObserver {
        let snapshot = self.clone();
        Box::new(move |records| snapshot.publish(records))
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Published> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared server state
pub struct ServerState {
    snapshot: SharedSnapshot,
    summaries: SummaryBuilder,
}

impl ServerState {
    pub fn new(config: &ServerConfig, snapshot: SharedSnapshot) -> Self {
        Self {
            snapshot,
            summaries: SummaryBuilder::new(config.ranges.clone()),
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub user_id: UserId,
    pub record_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Response from the averages endpoint
#[derive(Serialize)]
pub struct AveragesResponse {
    pub days: u32,
    pub averages: Option<MetricAverages>,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AveragesQuery {
    pub days: Option<u32>,
}

/// GET /health
async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    let published = state.snapshot.read();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        user_id: published.user_id.clone(),
        record_count: published.records.len(),
        updated_at: published.updated_at,
    })
}

/// GET /latest
async fn latest(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<MetricRecord>, (StatusCode, Json<ErrorResponse>)> {
    let published = state.snapshot.read();
    published.records.first().cloned().map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "No readings yet".to_string(),
                code: "NO_DATA".to_string(),
            }),
        )
    })
}

/// GET /records
async fn records(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<RecordsQuery>,
) -> Json<Vec<MetricRecord>> {
    let limit = query.limit.unwrap_or(DEFAULT_RECORD_LIMIT);
    let published = state.snapshot.read();
    Json(published.records.iter().take(limit).cloned().collect())
}

/// GET /averages
async fn averages(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<AveragesQuery>,
) -> Json<AveragesResponse> {
    let days = query.days.unwrap_or(DEFAULT_AVERAGE_DAYS);
    let published = state.snapshot.read();
    let selected = filter_since(&published.records, days, Utc::now());
    Json(AveragesResponse {
        days,
        averages: average(selected),
    })
}

/// GET /summary
async fn summary(State(state): State<Arc<ServerState>>) -> impl axum::response::IntoResponse {
    let published = state.snapshot.read();
    Json(
        state
            .summaries
            .build(&published.user_id, &published.records, Utc::now()),
    )
}

/// Build the router without binding it.
pub fn router(config: &ServerConfig, snapshot: SharedSnapshot) -> Router {
    let state = Arc::new(ServerState::new(config, snapshot));

    Router::new()
        .route("/health", get(health))
        .route("/latest", get(latest))
        .route("/records", get(records))
        .route("/averages", get(averages))
        .route("/summary", get(summary))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET])
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    snapshot: SharedSnapshot,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(&config, snapshot);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Dashboard server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
