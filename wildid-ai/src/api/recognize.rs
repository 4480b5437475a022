//! Recognition endpoint
//!
//! POST /recognize with a base64 image and optional category hint.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{ApiError, ApiResult},
    types::{CategoryHint, RecognitionReport},
    AppState,
};

/// POST /recognize request
#[derive(Debug, Serialize, Deserialize)]
pub struct RecognizeRequest {
    /// Base64 image, optionally as a `data:` URL
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub hint: CategoryHint,
}

/// POST /recognize
///
/// Returns 200 with a report whether or not the organism was identified.
/// 400 on a missing, undecodable or oversized image; 503 when the service is saturated.
pub async fn recognize(
    State(state): State<AppState>,
    payload: Result<Json<RecognizeRequest>, JsonRejection>,
) -> ApiResult<Json<RecognitionReport>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let encoded = request
        .image_base64
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("image_base64 is required".to_string()))?;

    let image = decode_image(encoded)?;
    if image.len() > state.max_image_bytes {
        return Err(ApiError::BadRequest(format!(
            "Image is {} bytes; limit is {} bytes",
            image.len(),
            state.max_image_bytes
        )));
    }

    let _permit = match tokio::time::timeout(
        state.queue_wait,
        state.permits.clone().acquire_owned(),
    )
    .await
    {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => return Err(ApiError::Internal("Request queue closed".to_string())),
        Err(_) => {
            let message = "Too many recognition requests in flight".to_string();
            warn!("{}", message);
            *state.last_error.write().await = Some(message.clone());
            return Err(ApiError::ServiceUnavailable(message));
        }
    };

    debug!(bytes = image.len(), hint = ?request.hint, "Recognition request accepted");

    let cancel = state.shutdown.child_token();
    let report = state
        .recognizer
        .recognize(&image, request.hint, &cancel)
        .await?;

    Ok(Json(report))
}

/// Decode standard base64, stripping a `data:<mime>;base64,` prefix
fn decode_image(encoded: &str) -> ApiResult<Vec<u8>> {
    let data = match encoded.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| ApiError::BadRequest("Malformed data URL".to_string()))?,
        None => encoded,
    };

    let image = STANDARD
        .decode(data.trim())
        .map_err(|e| ApiError::BadRequest(format!("Invalid base64 image: {}", e)))?;
    if image.is_empty() {
        return Err(ApiError::BadRequest("Image is empty".to_string()));
    }
    Ok(image)
}

/// Build recognition routes
pub fn recognize_routes() -> Router<AppState> {
    Router::new().route("/recognize", post(recognize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_and_data_url() {
        assert_eq!(decode_image("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(
            decode_image("data:image/jpeg;base64,aGVsbG8=").unwrap(),
            b"hello"
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_image("not base64!!"), Err(ApiError::BadRequest(_))));
        assert!(matches!(decode_image("data:image/png"), Err(ApiError::BadRequest(_))));
    }
}
