//! Provider Adapters
//!
//! Each external source sits behind its own async trait with two methods:
//! - `fetch`: the fallible transport call, implemented per adapter
//! - `invoke`: provided; runs `fetch`, measures wall-clock time and converts any
//!   `ProviderError` into the adapter's neutral value. It never fails.
//!
//! # Adapters
//! | Adapter | Input | Output | Neutral |
//! |---|---|---|---|
//! | Vision | image bytes | `VisionBundle` | empty bundle, all-UNKNOWN safety |
//! | Plant-ID | image bytes | `Vec<ProviderHit>` | empty list |
//! | iNaturalist | query strings | `Vec<ProviderHit>` | empty list |
//! | Knowledge-Graph | query strings | `Vec<NameLookup>` (parallel) | empty list |
//! | Wikipedia | title | `Option<WikiCard>` | `None` |

pub mod inaturalist;
pub mod knowledge_graph;
pub mod plant_id;
pub mod vision;
pub mod wikipedia;

pub use inaturalist::INaturalistClient;
pub use knowledge_graph::GbifKnowledgeGraph;
pub use plant_id::PlantIdClient;
pub use vision::GoogleVisionClient;
pub use wikipedia::WikipediaClient;

use crate::config::ServiceConfig;
use crate::types::{Canonical, Provider, ProviderHit, ProviderStatus, VisionBundle, WikiCard};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

// ============================================================================
// Errors and outputs
// ============================================================================

/// Provider transport error
///
/// Never crosses the adapter boundary: `invoke` converts it into a neutral result.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network failure (connect, timeout, TLS)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("HTTP status {status}: {message}")]
    Status { status: u16, message: String },

    /// Malformed payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// Daily request quota spent
    #[error("Daily quota exhausted ({0} requests)")]
    QuotaExhausted(u32),

    /// Missing API key
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Decode(err.to_string())
    }
}

/// Value an adapter contributes when it fails soft
pub trait Neutral {
    fn neutral() -> Self;
}

impl<T> Neutral for Vec<T> {
    fn neutral() -> Self {
        Vec::new()
    }
}

impl<T> Neutral for Option<T> {
    fn neutral() -> Self {
        None
    }
}

impl Neutral for VisionBundle {
    fn neutral() -> Self {
        VisionBundle::default()
    }
}

/// Outcome of one Knowledge-Graph name lookup
#[derive(Debug, Clone, PartialEq)]
pub enum NameLookup {
    Matched(Canonical),
    /// Confirmed miss; safe to cache
    NoMatch,
    /// Lookup failed; retried on a later request
    Failed,
}

/// Result of one adapter call
#[derive(Debug, Clone)]
pub struct ProviderOutput<T> {
    pub provider: Provider,
    pub payload: T,
    pub elapsed: Duration,
    pub status: ProviderStatus,
}

impl<T: Neutral> ProviderOutput<T> {
    pub fn ok(provider: Provider, payload: T, elapsed: Duration) -> Self {
        Self {
            provider,
            payload,
            elapsed,
            status: ProviderStatus::Ok,
        }
    }

    pub fn failed(provider: Provider, elapsed: Duration) -> Self {
        Self::neutral_with(provider, elapsed, ProviderStatus::Failed)
    }

    pub fn timed_out(provider: Provider, elapsed: Duration) -> Self {
        Self::neutral_with(provider, elapsed, ProviderStatus::TimedOut)
    }

    pub fn skipped(provider: Provider) -> Self {
        Self::neutral_with(provider, Duration::ZERO, ProviderStatus::Skipped)
    }

    fn neutral_with(provider: Provider, elapsed: Duration, status: ProviderStatus) -> Self {
        Self {
            provider,
            payload: T::neutral(),
            elapsed,
            status,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Run a fallible provider call, absorbing failure into the neutral value
pub async fn fail_soft<T, F>(provider: Provider, call: F) -> ProviderOutput<T>
where
    T: Neutral,
    F: Future<Output = Result<T, ProviderError>>,
{
    let started = Instant::now();
    let result = call.await;
    let elapsed = started.elapsed();

    match result {
        Ok(payload) => {
            debug!(provider = %provider, elapsed_ms = elapsed.as_millis() as u64, "Provider call complete");
            ProviderOutput::ok(provider, payload, elapsed)
        }
        Err(e) => {
            warn!(provider = %provider, elapsed_ms = elapsed.as_millis() as u64, "Provider call failed: {}", e);
            ProviderOutput::failed(provider, elapsed)
        }
    }
}

// ============================================================================
// Adapter traits
// ============================================================================

/// General-purpose image annotation
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn fetch(&self, image: &[u8]) -> Result<VisionBundle, ProviderError>;

    async fn invoke(&self, image: &[u8]) -> ProviderOutput<VisionBundle> {
        fail_soft(Provider::Vision, self.fetch(image)).await
    }
}

/// Dedicated plant recognition
#[async_trait]
pub trait PlantIdProvider: Send + Sync {
    async fn fetch(&self, image: &[u8]) -> Result<Vec<ProviderHit>, ProviderError>;

    async fn invoke(&self, image: &[u8]) -> ProviderOutput<Vec<ProviderHit>> {
        fail_soft(Provider::PlantId, self.fetch(image)).await
    }
}

/// Taxon search by free-text queries
#[async_trait]
pub trait INaturalistProvider: Send + Sync {
    async fn fetch(&self, queries: &[String]) -> Result<Vec<ProviderHit>, ProviderError>;

    async fn invoke(&self, queries: &[String]) -> ProviderOutput<Vec<ProviderHit>> {
        fail_soft(Provider::INaturalist, self.fetch(queries)).await
    }
}

/// Batched name → canonical taxon resolution
///
/// Output is parallel to `queries`: one `Option<Canonical>` per query, `None` on miss.
#[async_trait]
pub trait KnowledgeGraphProvider: Send + Sync {
    /// One entry per query, in query order
    async fn fetch(&self, queries: &[String]) -> Result<Vec<NameLookup>, ProviderError>;

    async fn invoke(&self, queries: &[String]) -> ProviderOutput<Vec<NameLookup>> {
        fail_soft(Provider::KnowledgeGraph, self.fetch(queries)).await
    }
}

/// Encyclopedia summary by title
#[async_trait]
pub trait WikipediaProvider: Send + Sync {
    async fn fetch(&self, title: &str) -> Result<Option<WikiCard>, ProviderError>;

    async fn invoke(&self, title: &str) -> ProviderOutput<Option<WikiCard>> {
        fail_soft(Provider::Wikipedia, self.fetch(title)).await
    }
}

/// Injected set of adapters used by the recognizer
#[derive(Clone)]
pub struct ProviderSet {
    pub vision: Arc<dyn VisionProvider>,
    pub plant_id: Arc<dyn PlantIdProvider>,
    pub inaturalist: Arc<dyn INaturalistProvider>,
    pub knowledge_graph: Arc<dyn KnowledgeGraphProvider>,
    pub wikipedia: Arc<dyn WikipediaProvider>,
}

impl ProviderSet {
    /// Build the live HTTP adapters from service configuration
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ProviderError> {
        let providers = &config.providers;
        let client = http_client(&providers.user_agent, providers.http_timeout())?;

        Ok(Self {
            vision: Arc::new(GoogleVisionClient::new(
                client.clone(),
                config.vision_api_key.clone(),
                DailyQuota::new(providers.vision_max_per_day),
            )),
            plant_id: Arc::new(PlantIdClient::new(
                client.clone(),
                config.plant_id_api_key.clone(),
                DailyQuota::new(providers.plant_id_max_per_day),
            )),
            inaturalist: Arc::new(INaturalistClient::new(client.clone())),
            knowledge_graph: Arc::new(GbifKnowledgeGraph::new(client.clone())),
            wikipedia: Arc::new(WikipediaClient::new(client)),
        })
    }
}

// ============================================================================
// Shared transport plumbing
// ============================================================================

/// Direct (unkeyed) rate limiter shared by all calls of one adapter
pub type DirectRateLimiter = governor::RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Rate limiter allowing `per_second` requests per second (minimum 1)
pub fn rate_limiter(per_second: u32) -> DirectRateLimiter {
    let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
    governor::RateLimiter::direct(governor::Quota::per_second(per_second))
}

/// Shared HTTP client with user agent and overall request timeout
pub fn http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Transport(format!("Failed to build HTTP client: {}", e)))
}

/// Turn a non-success response into `ProviderError::Status`
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        status: status.as_u16(),
        message: body.chars().take(200).collect(),
    })
}

/// Per-day request counter; resets at UTC midnight
///
/// `None` limit means unlimited.
#[derive(Debug)]
pub struct DailyQuota {
    max_per_day: Option<u32>,
    state: Mutex<(NaiveDate, u32)>,
}

impl DailyQuota {
    pub fn new(max_per_day: Option<u32>) -> Self {
        Self {
            max_per_day,
            state: Mutex::new((Utc::now().date_naive(), 0)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Take one request slot for today
    pub fn try_acquire(&self) -> Result<(), ProviderError> {
        self.try_acquire_on(Utc::now().date_naive())
    }

    /// Take one request slot for `today`
    pub fn try_acquire_on(&self, today: NaiveDate) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.0 != today {
            *state = (today, 0);
        }
        if let Some(max) = self.max_per_day {
            if state.1 >= max {
                return Err(ProviderError::QuotaExhausted(max));
            }
        }
        state.1 += 1;
        Ok(())
    }

    /// Requests used today
    pub fn used(&self) -> u32 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_soft_ok_passes_payload() {
        let output = fail_soft(Provider::PlantId, async {
            Ok::<_, ProviderError>(vec![ProviderHit::new(Provider::PlantId, "Rosa", 0.9)])
        })
        .await;
        assert_eq!(output.status, ProviderStatus::Ok);
        assert_eq!(output.payload.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_soft_error_becomes_neutral() {
        let output: ProviderOutput<VisionBundle> = fail_soft(Provider::Vision, async {
            Err(ProviderError::Status {
                status: 503,
                message: "unavailable".into(),
            })
        })
        .await;
        assert_eq!(output.status, ProviderStatus::Failed);
        assert_eq!(output.payload, VisionBundle::default());
        assert!(!output.payload.safety.is_unsafe());
    }

    #[test]
    fn test_skipped_output_is_neutral() {
        let output: ProviderOutput<Vec<ProviderHit>> = ProviderOutput::skipped(Provider::PlantId);
        assert_eq!(output.status, ProviderStatus::Skipped);
        assert!(output.payload.is_empty());
        assert_eq!(output.elapsed_ms(), 0);
    }

    #[test]
    fn test_daily_quota_exhausts_and_resets() {
        let quota = DailyQuota::new(Some(2));
        let day1 = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2025, 5, 2).unwrap();

        assert!(quota.try_acquire_on(day1).is_ok());
        assert!(quota.try_acquire_on(day1).is_ok());
        assert!(matches!(
            quota.try_acquire_on(day1),
            Err(ProviderError::QuotaExhausted(2))
        ));

        assert!(quota.try_acquire_on(day2).is_ok());
        assert_eq!(quota.used(), 1);
    }

    #[test]
    fn test_unlimited_quota() {
        let quota = DailyQuota::unlimited();
        for _ in 0..1000 {
            assert!(quota.try_acquire().is_ok());
        }
    }
}
