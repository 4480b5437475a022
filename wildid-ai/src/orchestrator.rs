//! Recognition Orchestrator
//!
//! Drives one recognition request through the pipeline:
//!
//! ```text
//! STARTED → PROVIDERS_DISPATCHED → PROVIDERS_COLLECTED → CANONICALIZED → FUSED → ENRICHED → DONE
//!                                           │                              │
//!                                           └──────────(unsafe)────────────┴──→ UNIDENTIFIED
//! ```
//!
//! # Dispatch
//! Vision and Plant-ID start together. iNaturalist needs Vision's text as its
//! queries, so it runs after Vision, still concurrently with Plant-ID. Every call
//! is bounded by the per-provider timeout; a call that runs over is dropped
//! (cancelling its HTTP request) and contributes its neutral value.
//!
//! # Cancellation
//! Cancelling the request token drops all in-flight work and returns
//! [`RecognitionError::Cancelled`]. No partial result is returned.
//!
//! # Example
//! ```rust,ignore
//! let recognizer = Recognizer::new(providers, fusion_config, &cache_config)?;
//! let report = recognizer.recognize(&image, CategoryHint::Auto, &CancellationToken::new()).await?;
//! ```

use crate::cache::TtlCache;
use crate::canonicalizer::Canonicalizer;
use crate::config::{CacheConfig, ConfigError, FusionConfig};
use crate::enricher::Enricher;
use crate::extractor::{extract_candidates, scene_category, search_queries};
use crate::fusion::{Cluster, FusionEngine, Verdict};
use crate::providers::{Neutral, ProviderOutput, ProviderSet};
use crate::types::{
    Alternative, Category, CategoryHint, Provider, ProviderLatency, ProviderStatus,
    RecognitionOutcome, RecognitionReport, UnidentifiedReason,
};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runner-up clusters listed in a report
const MAX_ALTERNATIVES: usize = 2;

/// Pipeline stage of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Started,
    ProvidersDispatched,
    ProvidersCollected,
    Canonicalized,
    Fused,
    Enriched,
    Done,
    Unidentified,
}

/// Progress event emitted when an event channel is attached
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Request entered a stage
    StageEntered { request_id: Uuid, stage: Stage },

    /// One adapter finished (or timed out, or was skipped)
    ProviderCompleted {
        request_id: Uuid,
        latency: ProviderLatency,
    },
}

/// Request-level failure; provider trouble never shows up here
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    #[error("Recognition cancelled")]
    Cancelled,
}

/// Per-request recognition pipeline, shared across requests
pub struct Recognizer {
    providers: ProviderSet,
    canonicalizer: Canonicalizer,
    fusion: FusionEngine,
    enricher: Enricher,
    timeout: Duration,
    event_tx: Option<mpsc::Sender<RecognitionEvent>>,
}

impl Recognizer {
    /// Build a recognizer; invalid fusion configuration is rejected here, never per request
    pub fn new(
        providers: ProviderSet,
        fusion: FusionConfig,
        cache: &CacheConfig,
    ) -> Result<Self, ConfigError> {
        fusion.validate()?;
        let timeout = fusion.per_provider_timeout();

        let canonicalizer = Canonicalizer::new(
            providers.knowledge_graph.clone(),
            TtlCache::new(cache.capacity, Duration::from_secs(cache.kg_ttl_secs)),
            timeout,
        );
        let enricher = Enricher::new(
            providers.wikipedia.clone(),
            TtlCache::new(cache.capacity, Duration::from_secs(cache.wiki_ttl_secs)),
            timeout,
        );

        Ok(Self {
            providers,
            canonicalizer,
            fusion: FusionEngine::new(fusion),
            enricher,
            timeout,
            event_tx: None,
        })
    }

    /// Attach a channel for stage progress events
    pub fn with_events(mut self, event_tx: mpsc::Sender<RecognitionEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn fusion_config(&self) -> &FusionConfig {
        self.fusion.config()
    }

    /// Recognize the organism in `image`
    ///
    /// # Arguments
    /// * `image` - raw image bytes
    /// * `hint` - caller's category hint; `Bug`/`Animal` skip Plant-ID
    /// * `cancel` - request cancellation token
    ///
    /// # Returns
    /// A report with either an identification or an explicit unidentified outcome.
    /// Provider failures are absorbed; only cancellation is an error.
    pub async fn recognize(
        &self,
        image: &[u8],
        hint: CategoryHint,
        cancel: &CancellationToken,
    ) -> Result<RecognitionReport, RecognitionError> {
        let request_id = Uuid::new_v4();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(%request_id, "Recognition cancelled");
                Err(RecognitionError::Cancelled)
            }
            report = self.run(request_id, image, hint) => Ok(report),
        }
    }

    async fn run(&self, request_id: Uuid, image: &[u8], hint: CategoryHint) -> RecognitionReport {
        let started = Instant::now();
        self.enter(request_id, Stage::Started).await;

        let hint_category = hint.category();
        let skip_plant_id = matches!(hint_category, Some(Category::Bug | Category::Animal));

        // Phase 1: fan out
        self.enter(request_id, Stage::ProvidersDispatched).await;
        debug!(%request_id, image_bytes = image.len(), ?hint, "Dispatching providers");

        let vision_then_inaturalist = async {
            let vision = self
                .bounded(Provider::Vision, self.providers.vision.invoke(image))
                .await;
            let queries = search_queries(&vision.payload);
            let inaturalist = if queries.is_empty() {
                ProviderOutput::skipped(Provider::INaturalist)
            } else {
                self.bounded(
                    Provider::INaturalist,
                    self.providers.inaturalist.invoke(&queries),
                )
                .await
            };
            (vision, inaturalist)
        };
        let plant_id = async {
            if skip_plant_id {
                ProviderOutput::skipped(Provider::PlantId)
            } else {
                self.bounded(Provider::PlantId, self.providers.plant_id.invoke(image))
                    .await
            }
        };

        let ((vision, inaturalist), plant_id) = tokio::join!(vision_then_inaturalist, plant_id);

        // Phase 2: fan in
        self.enter(request_id, Stage::ProvidersCollected).await;
        let mut providers = vec![
            latency_of(&vision),
            latency_of(&plant_id),
            latency_of(&inaturalist),
        ];
        for latency in &providers {
            self.emit_event(RecognitionEvent::ProviderCompleted {
                request_id,
                latency: latency.clone(),
            })
            .await;
        }

        if vision.payload.safety.is_unsafe() {
            warn!(%request_id, "Vision flagged unsafe content; skipping identification");
            providers.push(skipped(Provider::KnowledgeGraph));
            providers.push(skipped(Provider::Wikipedia));
            return self
                .finish(
                    request_id,
                    started,
                    RecognitionOutcome::Unidentified {
                        reason: UnidentifiedReason::UnsafeContent,
                    },
                    providers,
                    Vec::new(),
                    false,
                )
                .await;
        }

        // Phase 3: extract + canonicalize
        let candidates = extract_candidates(
            &vision.payload,
            &plant_id.payload,
            &inaturalist.payload,
            self.fusion.config(),
        );
        debug!(%request_id, candidates = candidates.len(), "Candidates extracted");

        let canonicalized = self.canonicalizer.canonicalize(candidates).await;
        providers.push(canonicalized.knowledge_graph.clone());
        self.enter(request_id, Stage::Canonicalized).await;

        // Phase 4: fuse
        let fused = self.fusion.fuse(
            &canonicalized.candidates,
            scene_category(&vision.payload),
            hint_category,
        );
        self.enter(request_id, Stage::Fused).await;

        let result = match fused.verdict {
            Verdict::Accepted => fused.species_result(),
            Verdict::Unidentified(_) => None,
        };

        let Some(result) = result else {
            providers.push(skipped(Provider::Wikipedia));
            let reason = match fused.verdict {
                Verdict::Unidentified(reason) => reason,
                Verdict::Accepted => UnidentifiedReason::Uncategorized,
            };
            // Nothing accepted: every ranked cluster is a guess worth listing
            let alternatives: Vec<Alternative> = fused
                .ranked
                .iter()
                .take(MAX_ALTERNATIVES + 1)
                .map(Cluster::alternative)
                .collect();
            return self
                .finish(
                    request_id,
                    started,
                    RecognitionOutcome::Unidentified { reason },
                    providers,
                    alternatives,
                    false,
                )
                .await;
        };

        // Phase 5: enrich
        let (result, wikipedia) = self.enricher.enrich(result, &vision.payload).await;
        providers.push(wikipedia);
        self.enter(request_id, Stage::Enriched).await;

        let ambiguous = fused.is_ambiguous(self.fusion.config().disambiguation_margin);
        self.finish(
            request_id,
            started,
            RecognitionOutcome::Identified(result),
            providers,
            fused.alternatives(MAX_ALTERNATIVES),
            ambiguous,
        )
        .await
    }

    async fn finish(
        &self,
        request_id: Uuid,
        started: Instant,
        outcome: RecognitionOutcome,
        providers: Vec<ProviderLatency>,
        alternatives: Vec<Alternative>,
        ambiguous: bool,
    ) -> RecognitionReport {
        let total_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let confidence = outcome.confidence();

        match &outcome {
            RecognitionOutcome::Identified(result) => {
                info!(
                    %request_id,
                    name = %result.canonical_name,
                    category = %result.category,
                    provider = %result.provider,
                    confidence,
                    ambiguous,
                    elapsed_ms = total_ms,
                    "Recognition complete"
                );
                self.enter(request_id, Stage::Done).await;
            }
            RecognitionOutcome::Unidentified { reason } => {
                info!(%request_id, ?reason, elapsed_ms = total_ms, "Recognition unidentified");
                self.enter(request_id, Stage::Unidentified).await;
            }
        }

        RecognitionReport {
            request_id,
            outcome,
            confidence,
            providers,
            alternatives,
            ambiguous,
            total_ms,
        }
    }

    /// Bound one adapter call by the per-provider timeout
    async fn bounded<T, F>(&self, provider: Provider, call: F) -> ProviderOutput<T>
    where
        T: Neutral,
        F: Future<Output = ProviderOutput<T>>,
    {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(output) => output,
            Err(_) => {
                warn!(
                    provider = %provider,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Provider timed out"
                );
                ProviderOutput::timed_out(provider, started.elapsed())
            }
        }
    }

    async fn enter(&self, request_id: Uuid, stage: Stage) {
        debug!(%request_id, ?stage, "Stage");
        self.emit_event(RecognitionEvent::StageEntered { request_id, stage })
            .await;
    }

    /// Emit event if channel configured
    async fn emit_event(&self, event: RecognitionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

fn latency_of<T>(output: &ProviderOutput<T>) -> ProviderLatency {
    ProviderLatency {
        provider: output.provider,
        status: output.status,
        elapsed_ms: u64::try_from(output.elapsed.as_millis()).unwrap_or(u64::MAX),
    }
}

fn skipped(provider: Provider) -> ProviderLatency {
    ProviderLatency {
        provider,
        status: ProviderStatus::Skipped,
        elapsed_ms: 0,
    }
}
