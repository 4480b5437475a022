//! Core Types for wildid-ai
//!
//! Shared data model of the recognition pipeline:
//! - Provider identity and per-provider evidence (`ProviderHit`, `VisionBundle`)
//! - Knowledge-Graph resolution (`Canonical`)
//! - Enrichment (`WikiCard`)
//! - Final boundary artifacts (`SpeciesResult`, `RecognitionOutcome`, `RecognitionReport`)
//!
//! All of these are created per recognition request and dropped after the
//! response is produced.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Provider / Category / Rank
// ============================================================================

/// External recognition or enrichment source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "vision")]
    Vision,
    #[serde(rename = "plantid")]
    PlantId,
    #[serde(rename = "inaturalist")]
    INaturalist,
    #[serde(rename = "kg")]
    KnowledgeGraph,
    #[serde(rename = "wikipedia")]
    Wikipedia,
}

impl Provider {
    /// Recognition providers in invocation order
    pub const RECOGNITION: [Provider; 3] = [Provider::Vision, Provider::PlantId, Provider::INaturalist];

    /// Stable wire identifier (also the key used in `[fusion.provider_weights]`)
    pub const fn as_str(&self) -> &'static str {
        match self {
            Provider::Vision => "vision",
            Provider::PlantId => "plantid",
            Provider::INaturalist => "inaturalist",
            Provider::KnowledgeGraph => "kg",
            Provider::Wikipedia => "wikipedia",
        }
    }

    /// Parse a wire identifier
    pub fn from_wire(id: &str) -> Option<Self> {
        match id {
            "vision" => Some(Provider::Vision),
            "plantid" => Some(Provider::PlantId),
            "inaturalist" => Some(Provider::INaturalist),
            "kg" => Some(Provider::KnowledgeGraph),
            "wikipedia" => Some(Provider::Wikipedia),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Organism category (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Flower,
    Bug,
    Animal,
}

impl Category {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Category::Flower => "flower",
            Category::Bug => "bug",
            Category::Animal => "animal",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied hint about what the photo shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryHint {
    #[default]
    Auto,
    Flower,
    Bug,
    Animal,
}

impl CategoryHint {
    /// Concrete category, or `None` for `auto`
    pub const fn category(&self) -> Option<Category> {
        match self {
            CategoryHint::Auto => None,
            CategoryHint::Flower => Some(Category::Flower),
            CategoryHint::Bug => Some(Category::Bug),
            CategoryHint::Animal => Some(Category::Animal),
        }
    }
}

/// Taxonomic rank
///
/// Ranks below species fold into `Species`; ranks above family fold into `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Species,
    Genus,
    Family,
    Unknown,
}

impl Rank {
    /// Specificity order: species > genus > family > unknown
    pub const fn specificity(&self) -> u8 {
        match self {
            Rank::Species => 3,
            Rank::Genus => 2,
            Rank::Family => 1,
            Rank::Unknown => 0,
        }
    }

    /// Parse a provider rank string (case-insensitive)
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "species" | "subspecies" | "variety" | "form" | "hybrid" => Rank::Species,
            "genus" | "subgenus" => Rank::Genus,
            "family" | "subfamily" => Rank::Family,
            _ => Rank::Unknown,
        }
    }
}

// ============================================================================
// Provider evidence
// ============================================================================

/// One raw candidate from a recognition provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHit {
    pub provider: Provider,
    /// Raw name as reported by the provider
    pub name: String,
    pub common_name: Option<String>,
    pub rank: Option<Rank>,
    /// Provider-local confidence (0.0-1.0)
    pub confidence: f64,
    /// Provider-local taxonomic key (e.g. "gbif:5334357", "inat:47126")
    pub key: Option<String>,
    pub category_hint: Option<Category>,
}

impl ProviderHit {
    /// Create hit with clamped confidence
    pub fn new(provider: Provider, name: impl Into<String>, confidence: f64) -> Self {
        Self {
            provider,
            name: name.into(),
            common_name: None,
            rank: None,
            confidence: clamp_unit(confidence),
            key: None,
            category_hint: None,
        }
    }

    pub fn with_common_name(mut self, common_name: impl Into<String>) -> Self {
        self.common_name = Some(common_name.into());
        self
    }

    pub fn with_rank(mut self, rank: Rank) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category_hint = Some(category);
        self
    }
}

/// Knowledge-Graph resolution of a name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canonical {
    pub scientific_name: String,
    pub common_name: Option<String>,
    pub rank: Rank,
    /// Stable taxonomic key (e.g. "gbif:5334357")
    pub key: String,
    /// Resolution confidence (0.0-1.0)
    pub confidence: f64,
    /// Category implied by the taxonomy (kingdom/class)
    pub category_hint: Option<Category>,
}

/// Content-safety likelihood as reported by Vision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Likelihood {
    #[default]
    Unknown,
    VeryUnlikely,
    Unlikely,
    Possible,
    Likely,
    VeryLikely,
}

impl Likelihood {
    pub const fn is_likely(&self) -> bool {
        matches!(self, Likelihood::Likely | Likelihood::VeryLikely)
    }
}

/// Content-safety block; `Default` is the all-UNKNOWN neutral block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SafetyBlock {
    pub adult: Likelihood,
    pub violence: Likelihood,
    pub racy: Likelihood,
    pub medical: Likelihood,
}

impl SafetyBlock {
    /// Adult or violent content likely present
    pub const fn is_unsafe(&self) -> bool {
        self.adult.is_likely() || self.violence.is_likely()
    }
}

/// Scored free-text label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub description: String,
    pub score: f64,
}

impl Label {
    pub fn new(description: impl Into<String>, score: f64) -> Self {
        Self {
            description: description.into(),
            score: clamp_unit(score),
        }
    }
}

/// Structured output of the Vision provider
///
/// Not itself a candidate: the extractor derives candidates from it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VisionBundle {
    pub labels: Vec<Label>,
    /// Labels of localized objects (cropped regions)
    pub crop_labels: Vec<Label>,
    pub web_best_guesses: Vec<String>,
    pub web_page_titles: Vec<String>,
    pub safety: SafetyBlock,
    /// Dominant colors as `rgb(r, g, b)` strings
    pub dominant_colors: Vec<String>,
}

/// Wikipedia summary card (enrichment only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiCard {
    pub title: String,
    pub extract: String,
    pub thumbnail_url: Option<String>,
    pub page_url: Option<String>,
}

// ============================================================================
// Boundary artifacts
// ============================================================================

/// Wiki enrichment attached to a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiEnrichment {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Presentation hints attached to a result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UiHints {
    /// Hex or `rgb(...)` color strings, at most five
    pub color_chips: Vec<String>,
    pub fun_facts: Vec<String>,
}

/// Final identification
///
/// Invariants: `confidence` in [0,1]; `canonical_name` non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesResult {
    pub category: Category,
    pub canonical_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<Rank>,
    pub confidence: f64,
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taxonomic_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wiki: Option<WikiEnrichment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiHints>,
}

/// Why no identification was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnidentifiedReason {
    /// No provider produced a usable candidate
    NoCandidates,
    /// Best cluster fell below the acceptance threshold
    BelowThreshold,
    /// Best cluster could not be assigned flower/bug/animal
    Uncategorized,
    /// Vision flagged adult or violent content
    UnsafeContent,
}

/// Outcome of one recognition request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecognitionOutcome {
    Identified(SpeciesResult),
    Unidentified { reason: UnidentifiedReason },
}

impl RecognitionOutcome {
    /// Fused confidence; always 0 when unidentified
    pub fn confidence(&self) -> f64 {
        match self {
            RecognitionOutcome::Identified(result) => result.confidence,
            RecognitionOutcome::Unidentified { .. } => 0.0,
        }
    }

    pub fn species(&self) -> Option<&SpeciesResult> {
        match self {
            RecognitionOutcome::Identified(result) => Some(result),
            RecognitionOutcome::Unidentified { .. } => None,
        }
    }

    pub fn is_identified(&self) -> bool {
        matches!(self, RecognitionOutcome::Identified(_))
    }
}

/// Per-provider status in a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Ok,
    Failed,
    TimedOut,
    Skipped,
}

/// Per-provider latency entry in a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderLatency {
    pub provider: Provider,
    pub status: ProviderStatus,
    pub elapsed_ms: u64,
}

/// Runner-up cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub name: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

/// Complete response of one recognition request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionReport {
    pub request_id: Uuid,
    pub outcome: RecognitionOutcome,
    pub confidence: f64,
    pub providers: Vec<ProviderLatency>,
    pub alternatives: Vec<Alternative>,
    /// Winner margin over the runner-up is below the disambiguation margin
    pub ambiguous: bool,
    pub total_ms: u64,
}

/// Clamp into [0,1]; NaN becomes 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
