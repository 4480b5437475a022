//! wildid-ai library interface
//!
//! Recognition pipeline (providers → extractor → canonicalizer → fusion → enricher,
//! driven by the orchestrator) plus the HTTP surface around it.

pub mod api;
pub mod cache;
pub mod canonicalizer;
pub mod config;
pub mod enricher;
pub mod error;
pub mod extractor;
pub mod fusion;
pub mod orchestrator;
pub mod providers;
pub mod types;

pub use crate::error::{ApiError, ApiResult};
pub use crate::orchestrator::{RecognitionError, Recognizer};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;

/// Headroom over the decoded image limit for base64 expansion and JSON framing
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub recognizer: Arc<Recognizer>,
    /// Bounds concurrent recognitions
    pub permits: Arc<Semaphore>,
    /// How long a request may wait for a permit before 503
    pub queue_wait: Duration,
    /// Decoded image size limit
    pub max_image_bytes: usize,
    /// Cancelled on shutdown; each request runs on a child token
    pub shutdown: CancellationToken,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(recognizer: Recognizer, server: &ServerConfig) -> Self {
        Self {
            recognizer: Arc::new(recognizer),
            permits: Arc::new(Semaphore::new(server.max_concurrent_requests.max(1))),
            queue_wait: Duration::from_millis(server.queue_wait_ms),
            max_image_bytes: server.max_image_bytes(),
            shutdown: CancellationToken::new(),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    // base64 inflates by 4/3
    let body_limit = state.max_image_bytes / 3 * 4 + 4 + BODY_OVERHEAD_BYTES;

    Router::new()
        .merge(api::recognize_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
