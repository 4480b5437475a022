//! Canonicalizer
//!
//! Maps every candidate's raw name to a canonical identity via the Knowledge-Graph
//! provider:
//! 1. Normalize names; look each unique name up once per request
//! 2. Serve known names from the TTL cache
//! 3. Send the rest to the Knowledge-Graph as one batch, bounded by the
//!    per-provider timeout. When more than `MAX_KG_QUERIES` names are unknown,
//!    names from dedicated recognizers go first, then by best confidence.
//! 4. Cache matches and confirmed misses; failed lookups and a timed-out batch
//!    cache nothing
//!
//! Names without a match keep a synthesized identity `name:<normalized>` with
//! rank `Unknown`.

use crate::cache::CanonicalCache;
use crate::extractor::Candidate;
use crate::providers::{KnowledgeGraphProvider, NameLookup, ProviderOutput};
use crate::types::{Canonical, Category, Provider, ProviderLatency, ProviderStatus, Rank};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Unique names sent to the Knowledge-Graph per request
pub const MAX_KG_QUERIES: usize = 10;

/// Prefix of synthesized identity keys
pub const SYNTHESIZED_KEY_PREFIX: &str = "name:";

/// Canonical identity of a candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// Cluster key: taxonomic key or `name:<normalized>`
    pub key: String,
    pub scientific_name: String,
    pub common_name: Option<String>,
    pub rank: Rank,
    /// Knowledge-Graph category hint
    pub category_hint: Option<Category>,
    /// Resolved by the Knowledge-Graph (false = synthesized)
    pub resolved: bool,
}

impl Identity {
    fn from_canonical(canonical: Canonical) -> Self {
        Self {
            key: canonical.key,
            scientific_name: canonical.scientific_name,
            common_name: canonical.common_name,
            rank: canonical.rank,
            category_hint: canonical.category_hint,
            resolved: true,
        }
    }

    /// Fallback identity for an unmatched name
    pub fn synthesized(raw_name: &str) -> Self {
        Self {
            key: format!("{}{}", SYNTHESIZED_KEY_PREFIX, normalize_name(raw_name)),
            scientific_name: raw_name.trim().to_string(),
            common_name: None,
            rank: Rank::Unknown,
            category_hint: None,
            resolved: false,
        }
    }
}

/// Candidate paired with its identity
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalCandidate {
    pub candidate: Candidate,
    pub identity: Identity,
}

/// Result of one canonicalization pass
#[derive(Debug, Clone)]
pub struct Canonicalized {
    pub candidates: Vec<CanonicalCandidate>,
    /// Knowledge-Graph call status for the report
    pub knowledge_graph: ProviderLatency,
}

/// Knowledge-Graph backed canonicalizer
pub struct Canonicalizer {
    knowledge_graph: Arc<dyn KnowledgeGraphProvider>,
    cache: CanonicalCache,
    timeout: Duration,
}

impl Canonicalizer {
    pub fn new(
        knowledge_graph: Arc<dyn KnowledgeGraphProvider>,
        cache: CanonicalCache,
        timeout: Duration,
    ) -> Self {
        Self {
            knowledge_graph,
            cache,
            timeout,
        }
    }

    /// Resolve every candidate, preserving order
    pub async fn canonicalize(&self, candidates: Vec<Candidate>) -> Canonicalized {
        let mut resolved: HashMap<String, Option<Canonical>> = HashMap::new();
        let mut misses: Vec<Miss> = Vec::new();
        for candidate in &candidates {
            let normalized = normalize_name(&candidate.raw_name);
            if normalized.is_empty() || resolved.contains_key(&normalized) {
                continue;
            }
            if let Some(miss) = misses.iter_mut().find(|m| m.normalized == normalized) {
                miss.absorb(candidate);
                continue;
            }
            match self.cache.get(&normalized) {
                Some(cached) => {
                    resolved.insert(normalized, cached);
                }
                None => misses.push(Miss::new(normalized, candidate)),
            }
        }

        if misses.len() > MAX_KG_QUERIES {
            // Stable: equal priorities keep first-seen order
            misses.sort_by(|a, b| {
                b.from_dedicated
                    .cmp(&a.from_dedicated)
                    .then(b.best_confidence.total_cmp(&a.best_confidence))
            });
            debug!(
                dropped = misses.len() - MAX_KG_QUERIES,
                "Too many names for one Knowledge-Graph batch; lowest-priority names stay synthesized"
            );
            misses.truncate(MAX_KG_QUERIES);
        }

        let knowledge_graph = if misses.is_empty() {
            let status = if candidates.is_empty() {
                ProviderStatus::Skipped
            } else {
                ProviderStatus::Ok
            };
            ProviderLatency {
                provider: Provider::KnowledgeGraph,
                status,
                elapsed_ms: 0,
            }
        } else {
            let queries: Vec<String> = misses.iter().map(|m| m.raw.clone()).collect();
            let output = self.resolve_batch(&queries).await;

            if output.status == ProviderStatus::Ok {
                for (miss, lookup) in misses.iter().zip(&output.payload) {
                    let canonical = match lookup {
                        NameLookup::Matched(canonical) => Some(canonical.clone()),
                        NameLookup::NoMatch => None,
                        NameLookup::Failed => continue,
                    };
                    self.cache.insert(miss.normalized.clone(), canonical.clone());
                    resolved.insert(miss.normalized.clone(), canonical);
                }
            }

            ProviderLatency {
                provider: Provider::KnowledgeGraph,
                status: output.status,
                elapsed_ms: output.elapsed_ms(),
            }
        };

        let candidates = candidates
            .into_iter()
            .map(|candidate| {
                let identity = resolved
                    .get(&normalize_name(&candidate.raw_name))
                    .cloned()
                    .flatten()
                    .map(Identity::from_canonical)
                    .unwrap_or_else(|| Identity::synthesized(&candidate.raw_name));
                CanonicalCandidate {
                    candidate,
                    identity,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            candidates = candidates.len(),
            resolved = candidates.iter().filter(|c| c.identity.resolved).count(),
            "Canonicalization complete"
        );

        Canonicalized {
            candidates,
            knowledge_graph,
        }
    }

    async fn resolve_batch(&self, queries: &[String]) -> ProviderOutput<Vec<NameLookup>> {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, self.knowledge_graph.invoke(queries)).await {
            Ok(output) => output,
            Err(_) => {
                warn!(
                    provider = %Provider::KnowledgeGraph,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Provider timed out"
                );
                ProviderOutput::timed_out(Provider::KnowledgeGraph, started.elapsed())
            }
        }
    }
}

/// Uncached name awaiting a Knowledge-Graph lookup
struct Miss {
    normalized: String,
    /// First raw spelling seen
    raw: String,
    from_dedicated: bool,
    best_confidence: f64,
}

impl Miss {
    fn new(normalized: String, candidate: &Candidate) -> Self {
        Self {
            normalized,
            raw: candidate.raw_name.trim().to_string(),
            from_dedicated: candidate.provider != Provider::Vision,
            best_confidence: candidate.confidence,
        }
    }

    fn absorb(&mut self, candidate: &Candidate) {
        self.from_dedicated |= candidate.provider != Provider::Vision;
        self.best_confidence = self.best_confidence.max(candidate.confidence);
    }
}

/// Trim, lowercase, collapse whitespace, strip surrounding punctuation
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Matches by lowercase name; names in `failing` fail their own lookup
    #[derive(Default)]
    struct ScriptedGraph {
        matches: HashMap<String, Canonical>,
        failing: Vec<String>,
        batches: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl KnowledgeGraphProvider for ScriptedGraph {
        async fn fetch(&self, queries: &[String]) -> Result<Vec<NameLookup>, ProviderError> {
            self.batches.lock().unwrap().push(queries.to_vec());
            Ok(queries
                .iter()
                .map(|q| {
                    let q = q.to_lowercase();
                    if self.failing.contains(&q) {
                        NameLookup::Failed
                    } else {
                        self.matches
                            .get(&q)
                            .cloned()
                            .map_or(NameLookup::NoMatch, NameLookup::Matched)
                    }
                })
                .collect())
        }
    }

    fn rose() -> Canonical {
        Canonical {
            scientific_name: "Rosa rubiginosa".to_string(),
            common_name: Some("Sweet briar".to_string()),
            rank: Rank::Species,
            key: "gbif:3004".to_string(),
            confidence: 0.98,
            category_hint: Some(Category::Flower),
        }
    }

    fn candidate(provider: Provider, name: &str, confidence: f64) -> Candidate {
        Candidate {
            provider,
            raw_name: name.to_string(),
            common_name: None,
            rank: None,
            confidence,
            key: None,
            category_hint: None,
        }
    }

    fn canonicalizer(graph: Arc<ScriptedGraph>) -> (Canonicalizer, CanonicalCache) {
        let cache = CanonicalCache::new(100, Duration::from_secs(60));
        let canonicalizer = Canonicalizer::new(graph, cache.clone(), Duration::from_secs(1));
        (canonicalizer, cache)
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Rosa   Rubiginosa. "), "rosa rubiginosa");
        assert_eq!(normalize_name("\"Sweet briar\""), "sweet briar");
        assert_eq!(normalize_name("Close-up"), "close-up");
        assert_eq!(normalize_name("..."), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["  Honey  Bee!", "Rosa rubiginosa", "(Danaus plexippus)"] {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once);
        }
    }

    #[test]
    fn test_synthesized_identity() {
        let identity = Identity::synthesized("  Sweet Briar ");
        assert_eq!(identity.key, "name:sweet briar");
        assert_eq!(identity.scientific_name, "Sweet Briar");
        assert_eq!(identity.rank, Rank::Unknown);
        assert!(!identity.resolved);
    }

    #[tokio::test]
    async fn test_batch_cap_prefers_dedicated_provider_names() {
        let graph = Arc::new(ScriptedGraph {
            matches: [
                ("rosa rubiginosa".to_string(), rose()),
                ("sweet briar".to_string(), rose()),
            ]
            .into(),
            ..Default::default()
        });
        let (canonicalizer, _) = canonicalizer(graph.clone());

        // Twelve Vision names ahead of the specialists in extraction order
        let mut candidates: Vec<Candidate> = (0..12)
            .map(|i| candidate(Provider::Vision, &format!("Shrub variety {}", i), 0.6))
            .collect();
        candidates.push(candidate(Provider::PlantId, "Rosa rubiginosa", 0.7));
        candidates.push(candidate(Provider::INaturalist, "Sweet Briar", 0.6));

        let result = canonicalizer.canonicalize(candidates).await;

        let batches = graph.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), MAX_KG_QUERIES);
        assert_eq!(batches[0][0], "Rosa rubiginosa");
        assert_eq!(batches[0][1], "Sweet Briar");

        // Extraction order is untouched
        assert_eq!(result.candidates.len(), 14);
        assert_eq!(result.candidates[0].candidate.raw_name, "Shrub variety 0");
        let specialists = &result.candidates[12..];
        assert!(specialists.iter().all(|c| c.identity.key == "gbif:3004"));
        assert!(!result.candidates[11].identity.resolved);
    }

    #[tokio::test]
    async fn test_failed_lookup_keeps_rest_of_batch() {
        let graph = Arc::new(ScriptedGraph {
            matches: [("rosa rubiginosa".to_string(), rose())].into(),
            failing: vec!["blurry thing".to_string()],
            ..Default::default()
        });
        let (canonicalizer, cache) = canonicalizer(graph.clone());

        let result = canonicalizer
            .canonicalize(vec![
                candidate(Provider::Vision, "Blurry thing", 0.3),
                candidate(Provider::Vision, "Garden gnome", 0.3),
                candidate(Provider::PlantId, "Rosa rubiginosa", 0.9),
            ])
            .await;

        assert_eq!(result.knowledge_graph.status, ProviderStatus::Ok);
        assert!(!result.candidates[0].identity.resolved);
        assert_eq!(result.candidates[2].identity.key, "gbif:3004");

        // Matches and confirmed misses are cached; the failed name is not
        assert_eq!(cache.get(&"rosa rubiginosa".to_string()), Some(Some(rose())));
        assert_eq!(cache.get(&"garden gnome".to_string()), Some(None));
        assert_eq!(cache.get(&"blurry thing".to_string()), None);
    }
}
