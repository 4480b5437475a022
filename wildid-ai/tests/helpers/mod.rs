//! Shared test fakes
//!
//! In-memory provider adapters with scripted payloads, optional latency and
//! simulated outages. Each fake counts its calls.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wildid_ai::config::{CacheConfig, FusionConfig};
use wildid_ai::providers::{
    INaturalistProvider, KnowledgeGraphProvider, NameLookup, PlantIdProvider, ProviderError,
    ProviderSet, VisionProvider, WikipediaProvider,
};
use wildid_ai::types::{
    Canonical, Category, Label, Provider, ProviderHit, Rank, VisionBundle, WikiCard,
};
use wildid_ai::Recognizer;

/// Latency and failure script shared by all fakes
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub delay: Duration,
    pub fail: bool,
}

impl Behavior {
    pub fn slow(delay: Duration) -> Self {
        Self { delay, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            delay: Duration::ZERO,
            fail: true,
        }
    }

    async fn apply(&self, calls: &AtomicUsize) -> Result<(), ProviderError> {
        calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ProviderError::Transport("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeVision {
    pub bundle: VisionBundle,
    pub behavior: Behavior,
    pub calls: AtomicUsize,
}

#[async_trait]
impl VisionProvider for FakeVision {
    async fn fetch(&self, _image: &[u8]) -> Result<VisionBundle, ProviderError> {
        self.behavior.apply(&self.calls).await?;
        Ok(self.bundle.clone())
    }
}

#[derive(Default)]
pub struct FakePlantId {
    pub hits: Vec<ProviderHit>,
    pub behavior: Behavior,
    pub calls: AtomicUsize,
}

#[async_trait]
impl PlantIdProvider for FakePlantId {
    async fn fetch(&self, _image: &[u8]) -> Result<Vec<ProviderHit>, ProviderError> {
        self.behavior.apply(&self.calls).await?;
        Ok(self.hits.clone())
    }
}

#[derive(Default)]
pub struct FakeINaturalist {
    pub hits: Vec<ProviderHit>,
    pub behavior: Behavior,
    pub calls: AtomicUsize,
    pub queries: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl INaturalistProvider for FakeINaturalist {
    async fn fetch(&self, queries: &[String]) -> Result<Vec<ProviderHit>, ProviderError> {
        if let Ok(mut seen) = self.queries.lock() {
            seen.push(queries.to_vec());
        }
        self.behavior.apply(&self.calls).await?;
        Ok(self.hits.clone())
    }
}

/// Resolves by lowercase name; names in `failing` fail their own lookup
#[derive(Default)]
pub struct FakeKnowledgeGraph {
    pub names: HashMap<String, Canonical>,
    pub failing: Vec<String>,
    pub behavior: Behavior,
    pub calls: AtomicUsize,
    pub queries: Mutex<Vec<Vec<String>>>,
}

impl FakeKnowledgeGraph {
    pub fn resolving(entries: &[(&str, Canonical)]) -> Self {
        Self {
            names: entries
                .iter()
                .map(|(name, canonical)| (name.to_lowercase(), canonical.clone()))
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl KnowledgeGraphProvider for FakeKnowledgeGraph {
    async fn fetch(&self, queries: &[String]) -> Result<Vec<NameLookup>, ProviderError> {
        if let Ok(mut seen) = self.queries.lock() {
            seen.push(queries.to_vec());
        }
        self.behavior.apply(&self.calls).await?;
        Ok(queries
            .iter()
            .map(|q| {
                let q = q.to_lowercase();
                if self.failing.contains(&q) {
                    NameLookup::Failed
                } else {
                    self.names
                        .get(&q)
                        .cloned()
                        .map_or(NameLookup::NoMatch, NameLookup::Matched)
                }
            })
            .collect())
    }
}

/// Serves cards by lowercase title
#[derive(Default)]
pub struct FakeWikipedia {
    pub cards: HashMap<String, WikiCard>,
    pub behavior: Behavior,
    pub calls: AtomicUsize,
}

#[async_trait]
impl WikipediaProvider for FakeWikipedia {
    async fn fetch(&self, title: &str) -> Result<Option<WikiCard>, ProviderError> {
        self.behavior.apply(&self.calls).await?;
        Ok(self.cards.get(&title.to_lowercase()).cloned())
    }
}

/// One fake per adapter, kept for call assertions
#[derive(Default, Clone)]
pub struct Fakes {
    pub vision: Arc<FakeVision>,
    pub plant_id: Arc<FakePlantId>,
    pub inaturalist: Arc<FakeINaturalist>,
    pub knowledge_graph: Arc<FakeKnowledgeGraph>,
    pub wikipedia: Arc<FakeWikipedia>,
}

impl Fakes {
    pub fn provider_set(&self) -> ProviderSet {
        ProviderSet {
            vision: self.vision.clone(),
            plant_id: self.plant_id.clone(),
            inaturalist: self.inaturalist.clone(),
            knowledge_graph: self.knowledge_graph.clone(),
            wikipedia: self.wikipedia.clone(),
        }
    }

    pub fn recognizer(&self, fusion: FusionConfig) -> Recognizer {
        Recognizer::new(self.provider_set(), fusion, &CacheConfig::default())
            .expect("valid fusion config")
    }
}

pub fn calls(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Default fusion settings with a short per-provider timeout
pub fn fast_fusion() -> FusionConfig {
    FusionConfig {
        per_provider_timeout_ms: 150,
        ..Default::default()
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub const ROSE_KEY: &str = "gbif:3004";

pub fn rose() -> Canonical {
    Canonical {
        scientific_name: "Rosa rubiginosa".to_string(),
        common_name: Some("Sweet briar".to_string()),
        rank: Rank::Species,
        key: ROSE_KEY.to_string(),
        confidence: 0.98,
        category_hint: Some(Category::Flower),
    }
}

pub fn honey_bee() -> Canonical {
    Canonical {
        scientific_name: "Apis mellifera".to_string(),
        common_name: Some("Western honey bee".to_string()),
        rank: Rank::Species,
        key: "gbif:1341976".to_string(),
        confidence: 0.99,
        category_hint: Some(Category::Bug),
    }
}

pub fn rose_card() -> WikiCard {
    WikiCard {
        title: "Rosa rubiginosa".to_string(),
        extract: "Rosa rubiginosa is a species of rose native to Europe and western Asia. \
                  Its flowers are pink with white centres and appear in early summer. \
                  The genus Rosa contains over three hundred members."
            .to_string(),
        thumbnail_url: Some("https://upload.wikimedia.org/rosa.jpg".to_string()),
        page_url: Some("https://en.wikipedia.org/wiki/Rosa_rubiginosa".to_string()),
    }
}

pub fn plant_hit(name: &str, confidence: f64) -> ProviderHit {
    ProviderHit::new(Provider::PlantId, name, confidence)
        .with_rank(Rank::Species)
        .with_category(Category::Flower)
}

pub fn inat_hit(name: &str, confidence: f64, category: Category) -> ProviderHit {
    ProviderHit::new(Provider::INaturalist, name, confidence)
        .with_rank(Rank::Species)
        .with_category(category)
}

pub fn labels(labels: &[(&str, f64)]) -> VisionBundle {
    VisionBundle {
        labels: labels.iter().map(|(d, s)| Label::new(*d, *s)).collect(),
        ..Default::default()
    }
}

/// A few bytes standing in for a JPEG
pub fn image() -> Vec<u8> {
    vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]
}
