//! Knowledge-Graph adapter (GBIF backbone taxonomy)
//!
//! Resolves free-text names to backbone taxa via `species/match`. Each query is
//! matched independently and concurrently; the output list is parallel to the
//! input. A failed lookup only fails its own entry; the batch fails when every
//! lookup does.
//!
//! Match acceptance:
//! - `matchType == NONE` or no `usageKey` → miss
//! - `FUZZY` matches whose canonical name is not close to the query
//!   (Jaro-Winkler < 0.85) → miss
//!
//! # API Reference
//! - Endpoint: https://api.gbif.org/v1/species/match
//! - Documentation: https://www.gbif.org/developer/species

use super::{
    check_status, rate_limiter, DirectRateLimiter, KnowledgeGraphProvider, NameLookup,
    ProviderError,
};
use crate::types::{Canonical, Category, Rank};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, warn};

/// GBIF backbone match endpoint
const GBIF_MATCH_URL: &str = "https://api.gbif.org/v1/species/match";

/// Minimum name similarity for a fuzzy match
const FUZZY_MIN_SIMILARITY: f64 = 0.85;

/// GBIF backbone client (no API key required)
pub struct GbifKnowledgeGraph {
    http_client: reqwest::Client,
    endpoint: String,
    rate_limiter: DirectRateLimiter,
}

impl GbifKnowledgeGraph {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            endpoint: GBIF_MATCH_URL.to_string(),
            rate_limiter: rate_limiter(10),
        }
    }

    async fn match_name(&self, query: &str) -> Result<Option<Canonical>, ProviderError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[("name", query), ("verbose", "false")])
            .send()
            .await?;
        let response = check_status(response).await?;
        let matched: NameMatch = response.json().await?;
        Ok(canonical_from_match(query, matched))
    }
}

#[async_trait]
impl KnowledgeGraphProvider for GbifKnowledgeGraph {
    async fn fetch(&self, queries: &[String]) -> Result<Vec<NameLookup>, ProviderError> {
        let results = join_all(queries.iter().map(|q| self.match_name(q))).await;

        let mut first_error = None;
        let lookups: Vec<NameLookup> = results
            .into_iter()
            .zip(queries)
            .map(|(result, query)| match result {
                Ok(Some(canonical)) => NameLookup::Matched(canonical),
                Ok(None) => NameLookup::NoMatch,
                Err(e) => {
                    warn!(query = %query, "GBIF lookup failed: {}", e);
                    first_error.get_or_insert(e);
                    NameLookup::Failed
                }
            })
            .collect();

        if lookups.iter().all(|l| *l == NameLookup::Failed) {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        debug!(
            queries = queries.len(),
            matched = lookups.iter().filter(|l| matches!(l, NameLookup::Matched(_))).count(),
            failed = lookups.iter().filter(|l| **l == NameLookup::Failed).count(),
            "GBIF batch match complete"
        );
        Ok(lookups)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct NameMatch {
    usage_key: Option<u64>,
    scientific_name: Option<String>,
    canonical_name: Option<String>,
    rank: Option<String>,
    confidence: Option<f64>,
    match_type: Option<String>,
    kingdom: Option<String>,
    phylum: Option<String>,
    class: Option<String>,
}

/// Accept or reject one backbone match
pub(crate) fn canonical_from_match(query: &str, matched: NameMatch) -> Option<Canonical> {
    let match_type = matched.match_type.as_deref().unwrap_or("NONE");
    if match_type.eq_ignore_ascii_case("NONE") {
        return None;
    }
    let usage_key = matched.usage_key?;
    let name = matched
        .canonical_name
        .or(matched.scientific_name)
        .filter(|n| !n.trim().is_empty())?;

    if match_type.eq_ignore_ascii_case("FUZZY") {
        let similarity = strsim::jaro_winkler(&query.to_lowercase(), &name.to_lowercase());
        if similarity < FUZZY_MIN_SIMILARITY {
            debug!(query, name = %name, similarity, "Rejecting distant fuzzy match");
            return None;
        }
    }

    let category_hint = category_from_taxonomy(
        matched.kingdom.as_deref(),
        matched.phylum.as_deref(),
        matched.class.as_deref(),
    );

    Some(Canonical {
        scientific_name: name,
        common_name: None,
        rank: matched.rank.as_deref().map(Rank::parse).unwrap_or(Rank::Unknown),
        key: format!("gbif:{}", usage_key),
        confidence: (matched.confidence.unwrap_or(0.0) / 100.0).clamp(0.0, 1.0),
        category_hint,
    })
}

/// Category implied by backbone kingdom/phylum/class
pub fn category_from_taxonomy(
    kingdom: Option<&str>,
    phylum: Option<&str>,
    class: Option<&str>,
) -> Option<Category> {
    let is = |value: Option<&str>, expected: &[&str]| {
        value.is_some_and(|v| expected.iter().any(|e| v.eq_ignore_ascii_case(e)))
    };

    if is(kingdom, &["Plantae"]) {
        return Some(Category::Flower);
    }
    if is(kingdom, &["Animalia"]) {
        if is(class, &["Insecta", "Arachnida"]) || is(phylum, &["Mollusca"]) {
            return Some(Category::Bug);
        }
        return Some(Category::Animal);
    }
    None
}
