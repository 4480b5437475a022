//! Enricher
//!
//! Best-effort presentation data for an accepted result: wiki summary and image,
//! fun facts, color chips. Never touches confidence or category; any failure
//! just leaves the wiki part empty and falls back to category facts and Vision
//! colors.

use crate::cache::WikiCache;
use crate::providers::WikipediaProvider;
use crate::types::{
    Category, Provider, ProviderLatency, ProviderStatus, SpeciesResult, UiHints, VisionBundle,
    WikiCard, WikiEnrichment,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Summary length limit in characters (before the ellipsis)
const SUMMARY_MAX_CHARS: usize = 200;

/// Color chips per result
const MAX_COLOR_CHIPS: usize = 5;

/// Fun facts taken from the extract
const MAX_FUN_FACTS: usize = 3;

/// Color words recognized in extracts, with chip colors
const COLOR_WORDS: &[(&str, &str)] = &[
    ("red", "#ef4444"),
    ("orange", "#f97316"),
    ("yellow", "#eab308"),
    ("green", "#22c55e"),
    ("blue", "#3b82f6"),
    ("purple", "#a855f7"),
    ("pink", "#ec4899"),
    ("brown", "#a16207"),
    ("black", "#000000"),
    ("white", "#ffffff"),
    ("gray", "#6b7280"),
    ("grey", "#6b7280"),
];

/// Plain-language replacements for fact sentences, applied in one pass
const JARGON: &[(&str, &str)] = &[
    ("scientific name", "name"),
    ("distribution", "where they live"),
    ("morphology", "looks"),
    ("taxonomy", "grouping"),
    ("habitat", "home"),
    ("species", "type"),
    ("family", "group"),
    ("genus", "family"),
];

/// Wikipedia-backed enricher
pub struct Enricher {
    wikipedia: Arc<dyn WikipediaProvider>,
    cache: WikiCache,
    timeout: Duration,
}

impl Enricher {
    pub fn new(wikipedia: Arc<dyn WikipediaProvider>, cache: WikiCache, timeout: Duration) -> Self {
        Self {
            wikipedia,
            cache,
            timeout,
        }
    }

    /// Attach wiki and UI hints to `result`
    ///
    /// Returns the enriched result and the Wikipedia latency entry.
    pub async fn enrich(
        &self,
        mut result: SpeciesResult,
        vision: &VisionBundle,
    ) -> (SpeciesResult, ProviderLatency) {
        let mut titles = vec![result.canonical_name.clone()];
        if let Some(common) = &result.common_name {
            if !common.eq_ignore_ascii_case(&result.canonical_name) {
                titles.push(common.clone());
            }
        }

        let (card, latency) = self.lookup(&titles).await;

        result.ui = Some(ui_hints(card.as_ref(), result.category, vision));
        result.wiki = card.map(|card| WikiEnrichment {
            summary: truncate_summary(&card.extract),
            image_url: card.thumbnail_url,
        });

        (result, latency)
    }

    /// First card found for `titles`, within one timeout budget
    async fn lookup(&self, titles: &[String]) -> (Option<WikiCard>, ProviderLatency) {
        let started = Instant::now();

        let search = async {
            let mut status = ProviderStatus::Ok;
            for title in titles {
                let key = title.trim().to_lowercase();
                if let Some(cached) = self.cache.get(&key) {
                    if cached.is_some() {
                        return (cached, status);
                    }
                    continue;
                }

                let output = self.wikipedia.invoke(title).await;
                if output.status != ProviderStatus::Ok {
                    status = output.status;
                    continue;
                }
                self.cache.insert(key, output.payload.clone());
                if output.payload.is_some() {
                    return (output.payload, ProviderStatus::Ok);
                }
            }
            (None, status)
        };

        let (card, status) = match tokio::time::timeout(self.timeout, search).await {
            Ok(found) => found,
            Err(_) => {
                warn!(
                    provider = %Provider::Wikipedia,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Provider timed out"
                );
                (None, ProviderStatus::TimedOut)
            }
        };

        debug!(found = card.is_some(), ?status, "Wiki lookup complete");

        let latency = ProviderLatency {
            provider: Provider::Wikipedia,
            status,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        (card, latency)
    }
}

/// Fun facts and color chips
pub fn ui_hints(card: Option<&WikiCard>, category: Category, vision: &VisionBundle) -> UiHints {
    let fun_facts = card
        .map(|c| fun_facts(&c.extract))
        .filter(|facts| !facts.is_empty())
        .unwrap_or_else(|| fallback_facts(category));

    let mut color_chips = card.map(|c| color_chips(&c.extract)).unwrap_or_default();
    if color_chips.is_empty() {
        color_chips = vision
            .dominant_colors
            .iter()
            .take(MAX_COLOR_CHIPS)
            .cloned()
            .collect();
    }

    UiHints {
        color_chips,
        fun_facts,
    }
}

/// Cut to 200 characters on a word boundary and append `...`
pub fn truncate_summary(extract: &str) -> String {
    let extract = extract.trim();
    let Some((cut, _)) = extract.char_indices().nth(SUMMARY_MAX_CHARS) else {
        return extract.to_string();
    };

    let head = &extract[..cut];
    let head = match head.rfind(char::is_whitespace) {
        Some(space) => &head[..space],
        None => head,
    };
    format!("{}...", head.trim_end())
}

/// Up to three kid-friendly sentences from an extract
pub fn fun_facts(extract: &str) -> Vec<String> {
    extract
        .split(". ")
        .filter(|s| s.chars().count() > 20)
        .take(MAX_FUN_FACTS)
        .map(replace_jargon)
        .filter(|f| {
            let len = f.chars().count();
            len > 10 && len < 200
        })
        .collect()
}

/// Canned facts when no extract is available
pub fn fallback_facts(category: Category) -> Vec<String> {
    let facts: [&str; 3] = match category {
        Category::Flower => [
            "Plants make their own food using sunlight!",
            "Flowers help plants make seeds for new plants.",
            "Some flowers can change color to attract bees!",
        ],
        Category::Bug => [
            "Insects have six legs and three body parts!",
            "Bees help flowers grow by carrying pollen.",
            "Butterflies taste with their feet!",
        ],
        Category::Animal => [
            "Animals come in all shapes and sizes!",
            "Each animal has special ways to survive.",
            "Birds are the only animals with feathers!",
        ],
    };
    facts.iter().map(|f| f.to_string()).collect()
}

/// Hex chips for color words in `text`, in order of first mention
pub fn color_chips(text: &str) -> Vec<String> {
    let mut found: Vec<&str> = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphabetic())
        .map(str::to_ascii_lowercase)
    {
        if let Some((_, hex)) = COLOR_WORDS.iter().find(|(name, _)| *name == word) {
            if !found.contains(hex) {
                found.push(hex);
            }
        }
        if found.len() == MAX_COLOR_CHIPS {
            break;
        }
    }
    found.into_iter().map(str::to_string).collect()
}

/// Replace jargon words, ASCII case-insensitive, without re-replacing output
fn replace_jargon(sentence: &str) -> String {
    let lower = sentence.to_ascii_lowercase();
    let mut out = String::with_capacity(sentence.len());
    let mut i = 0;
    while i < sentence.len() {
        if let Some((from, to)) = JARGON.iter().find(|(from, _)| lower[i..].starts_with(from)) {
            out.push_str(to);
            i += from.len();
            continue;
        }
        let Some(ch) = sentence[i..].chars().next() else {
            break;
        };
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}
