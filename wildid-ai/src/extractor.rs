//! Candidate Extractor
//!
//! Turns raw adapter outputs into one ordered candidate list.
//!
//! # Ordering
//! Vision (labels, web guesses, crop labels), then Plant-ID, then iNaturalist;
//! within each adapter the adapter's own order. Later tie-breaks rely on it.
//!
//! # Vision heuristics
//! Vision is general-purpose, so its text gets a lower prior than a dedicated
//! recognizer:
//! - label / crop label: `score × vision_prior`
//! - web best guess: `web_guess_confidence`
//! - names made only of generic words ("flower", "yellow petal") are halved
//!
//! Candidates below `min_candidate_confidence` are dropped.

use crate::canonicalizer::normalize_name;
use crate::config::FusionConfig;
use crate::types::{Category, Provider, ProviderHit, Rank, VisionBundle};

/// Words too generic to name an organism
const GENERIC_TERMS: &[&str] = &[
    "flower", "petal", "leaf", "plant", "color", "colour", "close-up", "closeup", "image",
    "photo", "picture", "object", "thing", "item", "tree", "grass", "weed", "insect", "bug",
    "animal", "wildlife", "nature", "organism", "macro", "photography", "yellow", "white", "red",
    "blue", "green", "brown", "black", "orange", "pink", "purple", "flowering", "terrestrial",
    "botany", "fauna", "flora", "invertebrate", "vertebrate", "arthropod", "pollinator",
];

const PLANT_TERMS: &[&str] = &[
    "plant", "flower", "tree", "leaf", "petal", "bloom", "blossom", "shrub", "flora",
    "botany", "wildflower", "succulent", "fern", "moss", "herb", "garden",
];

const BUG_TERMS: &[&str] = &[
    "insect", "bug", "bee", "butterfly", "ant", "spider", "beetle", "moth", "wasp",
    "ladybug", "ladybird", "dragonfly", "caterpillar", "arthropod", "invertebrate", "snail",
    "slug", "grasshopper", "cricket", "fly", "hornet", "mantis", "centipede", "millipede",
];

const ANIMAL_TERMS: &[&str] = &[
    "animal", "mammal", "bird", "reptile", "amphibian", "fish", "dog", "cat", "squirrel",
    "frog", "toad", "lizard", "snake", "turtle", "rabbit", "deer", "fox", "wildlife",
    "vertebrate", "rodent", "songbird", "owl", "duck",
];

/// One candidate entering canonicalization
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub provider: Provider,
    pub raw_name: String,
    pub common_name: Option<String>,
    pub rank: Option<Rank>,
    pub confidence: f64,
    /// Provider-local taxonomic key
    pub key: Option<String>,
    pub category_hint: Option<Category>,
}

impl From<&ProviderHit> for Candidate {
    fn from(hit: &ProviderHit) -> Self {
        Self {
            provider: hit.provider,
            raw_name: hit.name.trim().to_string(),
            common_name: hit.common_name.clone(),
            rank: hit.rank,
            confidence: hit.confidence,
            key: hit.key.clone(),
            category_hint: hit.category_hint,
        }
    }
}

/// Extract candidates in invocation order
pub fn extract_candidates(
    vision: &VisionBundle,
    plant_id: &[ProviderHit],
    inaturalist: &[ProviderHit],
    config: &FusionConfig,
) -> Vec<Candidate> {
    let vision_candidates = vision_candidates(vision, config);
    let hits = plant_id.iter().chain(inaturalist).map(Candidate::from);

    vision_candidates
        .into_iter()
        .chain(hits)
        .filter(|c| !normalize_name(&c.raw_name).is_empty())
        .filter(|c| c.confidence >= config.min_candidate_confidence)
        .collect()
}

fn vision_candidates(vision: &VisionBundle, config: &FusionConfig) -> Vec<Candidate> {
    let labels = vision
        .labels
        .iter()
        .map(|l| (l.description.as_str(), l.score * config.vision_prior));
    let guesses = vision
        .web_best_guesses
        .iter()
        .map(|g| (g.as_str(), config.web_guess_confidence));
    let crops = vision
        .crop_labels
        .iter()
        .map(|l| (l.description.as_str(), l.score * config.vision_prior));

    labels
        .chain(guesses)
        .chain(crops)
        .map(|(text, confidence)| {
            let confidence = if is_generic_term(text) {
                confidence * 0.5
            } else {
                confidence
            };
            Candidate {
                provider: Provider::Vision,
                raw_name: text.trim().to_string(),
                common_name: None,
                rank: None,
                confidence: confidence.clamp(0.0, 1.0),
                key: None,
                category_hint: infer_category([(text, 1.0)]),
            }
        })
        .collect()
}

/// Free-text queries for the iNaturalist search: specific guesses first, then labels
pub fn search_queries(vision: &VisionBundle) -> Vec<String> {
    let mut queries: Vec<String> = Vec::new();
    let texts = vision
        .web_best_guesses
        .iter()
        .map(String::as_str)
        .chain(vision.labels.iter().map(|l| l.description.as_str()))
        .chain(vision.crop_labels.iter().map(|l| l.description.as_str()));

    for text in texts {
        let text = text.trim();
        if text.is_empty() || is_generic_term(text) {
            continue;
        }
        if !queries.iter().any(|q| q.eq_ignore_ascii_case(text)) {
            queries.push(text.to_string());
        }
    }
    queries
}

/// Every word of `text` is a generic term
pub fn is_generic_term(text: &str) -> bool {
    let mut words = words(text).peekable();
    if words.peek().is_none() {
        return false;
    }
    words.all(|w| GENERIC_TERMS.contains(&singular(&w)))
}

/// Category suggested by weighted text; ties prefer bug, then animal, then flower
pub fn infer_category<'a>(texts: impl IntoIterator<Item = (&'a str, f64)>) -> Option<Category> {
    let mut flower = 0.0;
    let mut bug = 0.0;
    let mut animal = 0.0;

    for (text, weight) in texts {
        for word in words(text) {
            let word = singular(&word);
            if BUG_TERMS.contains(&word) {
                bug += weight;
            } else if ANIMAL_TERMS.contains(&word) {
                animal += weight;
            } else if PLANT_TERMS.contains(&word) {
                flower += weight;
            }
        }
    }

    [(Category::Bug, bug), (Category::Animal, animal), (Category::Flower, flower)]
        .into_iter()
        .filter(|(_, score)| *score > 0.0)
        .fold(None, |best: Option<(Category, f64)>, (category, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((category, score)),
        })
        .map(|(category, _)| category)
}

/// Category of a whole Vision bundle; labels weigh by score, guesses and crops by half
pub fn scene_category(vision: &VisionBundle) -> Option<Category> {
    let labels = vision
        .labels
        .iter()
        .map(|l| (l.description.as_str(), l.score));
    let crops = vision
        .crop_labels
        .iter()
        .map(|l| (l.description.as_str(), l.score * 0.5));
    let guesses = vision.web_best_guesses.iter().map(|g| (g.as_str(), 0.5));
    infer_category(labels.chain(crops).chain(guesses))
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Naive plural folding ("bees" → "bee", "butterflies" → "butterfly")
fn singular(word: &str) -> &str {
    match word {
        "butterflies" => "butterfly",
        "flies" => "fly",
        "dragonflies" => "dragonfly",
        "ladybugs" => "ladybug",
        "leaves" => "leaf",
        _ if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") => {
            &word[..word.len() - 1]
        }
        _ => word,
    }
}
