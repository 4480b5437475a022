//! Plant.id adapter
//!
//! Dedicated plant recognition. Keeps the top three suggestions; every hit carries
//! the flower category hint.
//!
//! # API Reference
//! - Endpoint: https://api.plant.id/v2/identify
//! - Auth: `Api-Key` header

use super::{check_status, rate_limiter, DailyQuota, DirectRateLimiter, PlantIdProvider, ProviderError};
use crate::types::{Category, Provider, ProviderHit, Rank};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Plant.id API endpoint
const PLANT_ID_API_URL: &str = "https://api.plant.id/v2/identify";

/// Suggestions kept per request
const MAX_SUGGESTIONS: usize = 3;

/// Confidence used when a suggestion carries no probability
const DEFAULT_PROBABILITY: f64 = 0.5;

/// Plant.id client
pub struct PlantIdClient {
    http_client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    rate_limiter: DirectRateLimiter,
    quota: DailyQuota,
}

impl PlantIdClient {
    pub fn new(http_client: reqwest::Client, api_key: Option<String>, quota: DailyQuota) -> Self {
        Self {
            http_client,
            api_key,
            endpoint: PLANT_ID_API_URL.to_string(),
            rate_limiter: rate_limiter(5),
            quota,
        }
    }
}

#[async_trait]
impl PlantIdProvider for PlantIdClient {
    async fn fetch(&self, image: &[u8]) -> Result<Vec<ProviderHit>, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("plant.id api key".to_string()))?;

        self.quota.try_acquire()?;
        self.rate_limiter.until_ready().await;

        let body = json!({
            "images": [base64::engine::general_purpose::STANDARD.encode(image)],
            "plant_details": ["common_names", "taxonomy", "gbif_id"],
            "language": "en"
        });

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("Api-Key", api_key)
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let identify: IdentifyResponse = response.json().await?;

        let hits = hits_from_response(identify);
        debug!(hits = hits.len(), "Plant.id identify complete");
        Ok(hits)
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct IdentifyResponse {
    #[serde(default)]
    suggestions: Vec<Suggestion>,
}

#[derive(Debug, Deserialize)]
struct Suggestion {
    plant_name: Option<String>,
    probability: Option<f64>,
    plant_details: Option<PlantDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlantDetails {
    common_names: Option<Vec<String>>,
    gbif_id: Option<i64>,
}

/// Map suggestions to hits, best first
pub(crate) fn hits_from_response(response: IdentifyResponse) -> Vec<ProviderHit> {
    response
        .suggestions
        .into_iter()
        .filter_map(|s| {
            let name = s.plant_name?.trim().to_string();
            if name.is_empty() {
                return None;
            }

            let rank = if name.split_whitespace().count() > 1 {
                Rank::Species
            } else {
                Rank::Genus
            };
            let mut hit = ProviderHit::new(
                Provider::PlantId,
                name,
                s.probability.unwrap_or(DEFAULT_PROBABILITY),
            )
            .with_rank(rank)
            .with_category(Category::Flower);

            let details = s.plant_details.unwrap_or_default();
            if let Some(common) = details
                .common_names
                .and_then(|names| names.into_iter().find(|n| !n.trim().is_empty()))
            {
                hit = hit.with_common_name(common);
            }
            if let Some(gbif_id) = details.gbif_id {
                hit = hit.with_key(format!("gbif:{}", gbif_id));
            }
            Some(hit)
        })
        .take(MAX_SUGGESTIONS)
        .collect()
}
