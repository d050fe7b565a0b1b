use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, Response};
use serde_json::Value;

use super::types::ProviderError;

pub fn with_bearer(req: RequestBuilder, api_key: &str) -> RequestBuilder {
    if api_key.is_empty() {
        req
    } else {
        req.header("Authorization", format!("Bearer {}", api_key))
    }
}

/// Pull a human readable message out of an error body. Accepts both
/// `{"error": {"message": ".."}}` and `{"error": ".."}`.
pub fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        let error = v.get("error")?;
        error
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| error.as_str())
            .map(str::to_string)
    });
    match detail {
        Some(message) => format!("HTTP {}: {}", status.as_u16(), message),
        None => format!("HTTP {}: Request failed", status.as_u16()),
    }
}

/// Turn a non-2xx response into the matching [`ProviderError`].
pub async fn ensure_success(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    let detail = parse_error_message(status, &body);

    tracing::warn!("Backend returned {}", detail);
    Err(ProviderError::from_status(status, retry_after, detail))
}
