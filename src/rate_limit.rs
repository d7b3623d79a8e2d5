use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::GatewayError;

pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Turn an exhausted-quota signal in upstream response headers into a
/// `RateLimited` error. Only an exact remaining count of "0" triggers it.
pub fn classify(headers: &HeaderMap) -> Option<GatewayError> {
    let remaining = headers.get(REMAINING_HEADER)?.to_str().ok()?;
    if remaining != "0" {
        return None;
    }

    let retry_after = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let mut message = "GitHub rate limit exceeded".to_string();
    if let Some(secs) = &retry_after {
        message.push_str(&format!("; retry after {secs}s"));
    }

    Some(GatewayError::RateLimited { message, retry_after })
}
