//! Google Cloud Vision adapter
//!
//! One `images:annotate` request per image with five features:
//! labels, web detection, safe search, object localization, image properties.
//! The response is flattened into a `VisionBundle`.
//!
//! # API Reference
//! - Endpoint: https://vision.googleapis.com/v1/images:annotate
//! - Documentation: https://cloud.google.com/vision/docs/reference/rest/v1/images/annotate

use super::{check_status, rate_limiter, DailyQuota, DirectRateLimiter, ProviderError, VisionProvider};
use crate::types::{Label, Likelihood, SafetyBlock, VisionBundle};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Vision API endpoint
const VISION_API_URL: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Web entities at or below this score are not treated as best guesses
const WEB_ENTITY_MIN_SCORE: f64 = 0.5;

/// At most this many matching-page titles are kept
const MAX_PAGE_TITLES: usize = 5;

/// At most this many dominant colors are kept
const MAX_DOMINANT_COLORS: usize = 5;

/// Google Cloud Vision client
pub struct GoogleVisionClient {
    http_client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    rate_limiter: DirectRateLimiter,
    quota: DailyQuota,
}

impl GoogleVisionClient {
    pub fn new(http_client: reqwest::Client, api_key: Option<String>, quota: DailyQuota) -> Self {
        Self {
            http_client,
            api_key,
            endpoint: VISION_API_URL.to_string(),
            rate_limiter: rate_limiter(10),
            quota,
        }
    }
}

#[async_trait]
impl VisionProvider for GoogleVisionClient {
    async fn fetch(&self, image: &[u8]) -> Result<VisionBundle, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("vision api key".to_string()))?;

        self.quota.try_acquire()?;
        self.rate_limiter.until_ready().await;

        let content = base64::engine::general_purpose::STANDARD.encode(image);
        let body = json!({
            "requests": [{
                "image": { "content": content },
                "features": [
                    { "type": "LABEL_DETECTION", "maxResults": 10 },
                    { "type": "WEB_DETECTION", "maxResults": 10 },
                    { "type": "SAFE_SEARCH_DETECTION" },
                    { "type": "OBJECT_LOCALIZATION", "maxResults": 5 },
                    { "type": "IMAGE_PROPERTIES", "maxResults": 5 }
                ]
            }]
        });

        debug!(image_bytes = image.len(), "Vision annotate request");

        let response = self
            .http_client
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let annotate: AnnotateResponse = response.json().await?;

        let first = annotate
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Decode("empty annotate response".to_string()))?;

        if let Some(error) = first.error {
            return Err(ProviderError::Status {
                status: error.code.unwrap_or(500),
                message: error.message.unwrap_or_default(),
            });
        }

        let bundle = bundle_from_response(first);
        debug!(
            labels = bundle.labels.len(),
            crop_labels = bundle.crop_labels.len(),
            web_guesses = bundle.web_best_guesses.len(),
            "Vision annotate complete"
        );
        Ok(bundle)
    }
}

// ============================================================================
// Response model
// ============================================================================

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct AnnotateImageResponse {
    label_annotations: Vec<EntityAnnotation>,
    web_detection: Option<WebDetection>,
    safe_search_annotation: Option<SafeSearchAnnotation>,
    localized_object_annotations: Vec<LocalizedObject>,
    image_properties_annotation: Option<ImageProperties>,
    error: Option<AnnotateError>,
}

#[derive(Debug, Deserialize)]
struct EntityAnnotation {
    #[serde(default)]
    description: String,
    #[serde(default)]
    score: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WebDetection {
    web_entities: Vec<WebEntity>,
    best_guess_labels: Vec<BestGuessLabel>,
    pages_with_matching_images: Vec<WebPage>,
}

#[derive(Debug, Deserialize)]
struct WebEntity {
    description: Option<String>,
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BestGuessLabel {
    #[serde(default)]
    label: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebPage {
    page_title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SafeSearchAnnotation {
    adult: Likelihood,
    violence: Likelihood,
    racy: Likelihood,
    medical: Likelihood,
}

#[derive(Debug, Deserialize)]
struct LocalizedObject {
    #[serde(default)]
    name: String,
    #[serde(default)]
    score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageProperties {
    dominant_colors: Option<DominantColors>,
}

#[derive(Debug, Deserialize)]
struct DominantColors {
    #[serde(default)]
    colors: Vec<ColorInfo>,
}

#[derive(Debug, Deserialize)]
struct ColorInfo {
    color: RgbColor,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RgbColor {
    red: f64,
    green: f64,
    blue: f64,
}

#[derive(Debug, Deserialize)]
struct AnnotateError {
    code: Option<u16>,
    message: Option<String>,
}

/// Flatten one annotate response into a bundle
pub(crate) fn bundle_from_response(response: AnnotateImageResponse) -> VisionBundle {
    let labels = response
        .label_annotations
        .into_iter()
        .filter(|a| !a.description.trim().is_empty())
        .map(|a| Label::new(a.description, a.score))
        .collect();

    let crop_labels = response
        .localized_object_annotations
        .into_iter()
        .filter(|o| !o.name.trim().is_empty())
        .map(|o| Label::new(o.name, o.score))
        .collect();

    let mut web_best_guesses: Vec<String> = Vec::new();
    let mut web_page_titles = Vec::new();
    if let Some(web) = response.web_detection {
        let guesses = web.best_guess_labels.into_iter().map(|g| g.label).chain(
            web.web_entities
                .into_iter()
                .filter(|e| e.score.unwrap_or(0.0) > WEB_ENTITY_MIN_SCORE)
                .filter_map(|e| e.description),
        );
        for guess in guesses {
            let guess = guess.trim().to_string();
            if !guess.is_empty()
                && !web_best_guesses
                    .iter()
                    .any(|g| g.eq_ignore_ascii_case(&guess))
            {
                web_best_guesses.push(guess);
            }
        }

        web_page_titles = web
            .pages_with_matching_images
            .into_iter()
            .filter_map(|p| p.page_title)
            .map(|t| strip_markup(&t))
            .filter(|t| !t.is_empty())
            .take(MAX_PAGE_TITLES)
            .collect();
    }

    let safety = response
        .safe_search_annotation
        .map(|s| SafetyBlock {
            adult: s.adult,
            violence: s.violence,
            racy: s.racy,
            medical: s.medical,
        })
        .unwrap_or_default();

    let dominant_colors = response
        .image_properties_annotation
        .and_then(|p| p.dominant_colors)
        .map(|d| {
            d.colors
                .into_iter()
                .take(MAX_DOMINANT_COLORS)
                .map(|c| rgb_string(&c.color))
                .collect()
        })
        .unwrap_or_default();

    VisionBundle {
        labels,
        crop_labels,
        web_best_guesses,
        web_page_titles,
        safety,
        dominant_colors,
    }
}

fn rgb_string(color: &RgbColor) -> String {
    let channel = |v: f64| v.round().clamp(0.0, 255.0) as u8;
    format!(
        "rgb({}, {}, {})",
        channel(color.red),
        channel(color.green),
        channel(color.blue)
    )
}

/// Remove `<b>`-style tags that Vision puts in page titles
fn strip_markup(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_tag = false;
    for ch in raw.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}
