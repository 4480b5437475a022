//! iNaturalist adapter
//!
//! Searches the taxa index with free-text queries (Vision labels and web guesses)
//! and scores each returned taxon by how well it matches the query and how often
//! it is observed:
//!
//! ```text
//! confidence = (label_match + min(observations / 1000, 1)) / 2
//! ```
//!
//! Taxa at or below 0.3 are discarded; at most two per query survive, duplicates
//! (same taxon id) collapse to the first occurrence, and the best five are returned.
//!
//! # API Reference
//! - Endpoint: https://api.inaturalist.org/v1/taxa
//! - Documentation: https://api.inaturalist.org/v1/docs/

use super::{check_status, rate_limiter, DirectRateLimiter, INaturalistProvider, ProviderError};
use crate::types::{Category, Provider, ProviderHit, Rank};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, warn};

/// iNaturalist taxa search endpoint
const INATURALIST_TAXA_URL: &str = "https://api.inaturalist.org/v1/taxa";

/// Queries issued per request
const MAX_QUERIES: usize = 5;
/// Taxa requested per query
const PER_PAGE: u32 = 5;
/// Taxa kept per query after scoring
const MAX_PER_QUERY: usize = 2;
/// Hits returned overall
const MAX_HITS: usize = 5;
/// Taxa must score above this to be kept
const MIN_CONFIDENCE: f64 = 0.3;

/// iNaturalist client (no API key required)
pub struct INaturalistClient {
    http_client: reqwest::Client,
    endpoint: String,
    rate_limiter: DirectRateLimiter,
}

impl INaturalistClient {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            endpoint: INATURALIST_TAXA_URL.to_string(),
            rate_limiter: rate_limiter(5),
        }
    }

    async fn search_taxa(&self, query: &str) -> Result<Vec<Taxon>, ProviderError> {
        self.rate_limiter.until_ready().await;

        let per_page = PER_PAGE.to_string();
        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[("q", query), ("per_page", per_page.as_str()), ("is_active", "true")])
            .send()
            .await?;
        let response = check_status(response).await?;
        let page: TaxaResponse = response.json().await?;
        Ok(page.results)
    }
}

#[async_trait]
impl INaturalistProvider for INaturalistClient {
    async fn fetch(&self, queries: &[String]) -> Result<Vec<ProviderHit>, ProviderError> {
        let queries = select_queries(queries);
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(queries.iter().map(|q| self.search_taxa(q))).await;

        let mut per_query = Vec::with_capacity(queries.len());
        let mut first_error = None;
        for (query, result) in queries.into_iter().zip(results) {
            match result {
                Ok(taxa) => per_query.push((query, taxa)),
                Err(e) => {
                    warn!("iNaturalist query '{}' failed: {}", query, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        // Fail only when every query failed
        if per_query.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        let hits = hits_from_results(&per_query);
        debug!(hits = hits.len(), "iNaturalist search complete");
        Ok(hits)
    }
}

#[derive(Debug, Deserialize)]
struct TaxaResponse {
    #[serde(default)]
    results: Vec<Taxon>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Taxon {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub preferred_common_name: Option<String>,
    #[serde(default)]
    pub observations_count: u64,
    #[serde(default)]
    pub iconic_taxon_name: Option<String>,
}

/// First `MAX_QUERIES` distinct non-empty queries, case-insensitive
fn select_queries(queries: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    queries
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.to_lowercase()))
        .take(MAX_QUERIES)
        .map(str::to_string)
        .collect()
}

/// Score and merge per-query taxa into hits
pub(crate) fn hits_from_results(per_query: &[(String, Vec<Taxon>)]) -> Vec<ProviderHit> {
    let mut scored: Vec<(f64, &Taxon)> = Vec::new();

    for (query, taxa) in per_query {
        let mut query_scored: Vec<(f64, &Taxon)> = taxa
            .iter()
            .map(|t| (taxon_confidence(query, t), t))
            .filter(|(confidence, _)| *confidence > MIN_CONFIDENCE)
            .collect();
        // Stable: equal scores keep API order
        query_scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.extend(query_scored.into_iter().take(MAX_PER_QUERY));
    }

    let mut seen = HashSet::new();
    scored.retain(|(_, t)| seen.insert(t.id));
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    scored
        .into_iter()
        .take(MAX_HITS)
        .map(|(confidence, taxon)| {
            let mut hit = ProviderHit::new(Provider::INaturalist, taxon.name.clone(), confidence)
                .with_key(format!("inat:{}", taxon.id));
            if let Some(rank) = &taxon.rank {
                hit = hit.with_rank(Rank::parse(rank));
            }
            if let Some(common) = taxon
                .preferred_common_name
                .as_ref()
                .filter(|c| !c.trim().is_empty())
            {
                hit = hit.with_common_name(common.clone());
            }
            if let Some(category) = taxon
                .iconic_taxon_name
                .as_deref()
                .and_then(category_from_iconic_taxon)
            {
                hit = hit.with_category(category);
            }
            hit
        })
        .collect()
}

/// `(label_match + observation_score) / 2`
pub(crate) fn taxon_confidence(query: &str, taxon: &Taxon) -> f64 {
    let label_match = label_match_score(
        query,
        taxon.preferred_common_name.as_deref().unwrap_or(""),
        &taxon.name,
    );
    let observation_score = (taxon.observations_count as f64 / 1000.0).min(1.0);
    (label_match + observation_score) / 2.0
}

/// How well `query` names the taxon
///
/// - exact common or scientific name: 1.0
/// - substring either way with the common name: 0.8
/// - substring either way with the scientific name: 0.6
/// - otherwise 0.7 × fraction of query words found in either name
pub fn label_match_score(query: &str, common_name: &str, scientific_name: &str) -> f64 {
    let query = query.trim().to_lowercase();
    let common = common_name.trim().to_lowercase();
    let scientific = scientific_name.trim().to_lowercase();

    if query.is_empty() {
        return 0.0;
    }
    if query == common || query == scientific {
        return 1.0;
    }
    if overlaps(&common, &query) {
        return 0.8;
    }
    if overlaps(&scientific, &query) {
        return 0.6;
    }

    let query_words: Vec<&str> = query.split_whitespace().collect();
    let word_matches = |name: &str| {
        let name_words: Vec<&str> = name.split_whitespace().collect();
        query_words
            .iter()
            .filter(|w| name_words.iter().any(|n| overlaps(n, w)))
            .count()
    };
    let best = word_matches(&common).max(word_matches(&scientific));
    0.7 * best as f64 / query_words.len() as f64
}

/// Either string contains the other; empty strings never match
fn overlaps(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

/// Iconic taxon → category
pub fn category_from_iconic_taxon(iconic: &str) -> Option<Category> {
    match iconic.to_ascii_lowercase().as_str() {
        "plantae" => Some(Category::Flower),
        "insecta" | "arachnida" | "mollusca" => Some(Category::Bug),
        "animalia" | "aves" | "mammalia" | "reptilia" | "amphibia" | "actinopterygii" => {
            Some(Category::Animal)
        }
        _ => None,
    }
}
