//! Failure classification for upstream RPC errors.
//!
//! [`classify`] is the only place that inspects transport-specific error
//! shapes. Everything else in the pipeline works with [`FailureClass`].

use serde_json::Value;

use crate::error::TransportError;

/// How the endpoint pool reacts to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The endpoint throttled us: cool it down and try another one.
    RateLimited,
    /// The endpoint cannot serve this workload: disable it for good.
    FatalEndpoint,
    /// Anything else: surface to the caller untouched.
    Other,
}

const RATE_LIMIT_CODES: &[i64] = &[429, -32005];

const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "too many requests",
    "status 429",
    "http status 429",
    "request limit exceeded",
    "exceeded rate limit",
    "context deadline exceeded",
];

const FATAL_CODES: &[i64] = &[-32601];

const FATAL_MARKERS: &[&str] = &[
    "invalid method",
    "method not found",
    "failed to detect network",
];

// Checked before the rate-limit table: providers reuse -32005 for both.
const LOG_LIMIT_MARKERS: &[&str] = &[
    "query returned more than",
    "log response size exceeded",
    "response size exceeded",
    "block range is too large",
    "block range too large",
    "exceed maximum block range",
    "query exceeds max results",
    "more than 10000 results",
];

/// Classify a failed RPC call.
pub fn classify(err: &TransportError) -> FailureClass {
    if is_log_limit_error(err) {
        return FailureClass::Other;
    }

    match err {
        TransportError::RateLimited { .. } => FailureClass::RateLimited,
        TransportError::HttpStatus { status: 429, .. } => FailureClass::RateLimited,
        TransportError::HttpStatus { status: 404, .. } => FailureClass::FatalEndpoint,
        TransportError::HttpStatus { body, .. } => classify_message(body),
        TransportError::Rpc(rpc) => {
            if RATE_LIMIT_CODES.contains(&rpc.code) || data_has_code(rpc.data.as_ref(), RATE_LIMIT_CODES) {
                FailureClass::RateLimited
            } else if FATAL_CODES.contains(&rpc.code) {
                FailureClass::FatalEndpoint
            } else {
                classify_message(&rpc.message)
            }
        }
        TransportError::Http(msg) | TransportError::Other(msg) => classify_message(msg),
        TransportError::AllProvidersDown
        | TransportError::EmptyPool
        | TransportError::Timeout { .. }
        | TransportError::Deserialization(_) => FailureClass::Other,
    }
}

/// Returns `true` when the upstream refused a `eth_getLogs` call because the
/// result would be too large. The caller should narrow the block range.
pub fn is_log_limit_error(err: &TransportError) -> bool {
    let text = match err {
        TransportError::Rpc(rpc) => {
            let data = rpc.data.as_ref().map(|d| d.to_string()).unwrap_or_default();
            format!("{} {}", rpc.message, data)
        }
        TransportError::HttpStatus { body, .. } => body.clone(),
        TransportError::Http(msg) | TransportError::Other(msg) => msg.clone(),
        _ => return false,
    };
    contains_any(&text, LOG_LIMIT_MARKERS)
}

fn classify_message(msg: &str) -> FailureClass {
    if contains_any(msg, RATE_LIMIT_MARKERS) || has_token(msg, "429") {
        FailureClass::RateLimited
    } else if contains_any(msg, FATAL_MARKERS) || has_token(msg, "404") {
        FailureClass::FatalEndpoint
    } else {
        FailureClass::Other
    }
}

fn contains_any(text: &str, markers: &[&str]) -> bool {
    let lower = text.to_ascii_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

/// `token` as a whole word: "(429 Too Many Requests)" matches "429",
/// "gas 14290" does not.
fn has_token(text: &str, token: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric()).any(|word| word == token)
}

/// Batch responses from some providers carry per-item errors in `data`.
fn data_has_code(data: Option<&Value>, codes: &[i64]) -> bool {
    match data {
        Some(Value::Array(items)) => items.iter().any(|item| {
            item.get("code")
                .and_then(Value::as_i64)
                .is_some_and(|code| codes.contains(&code))
        }),
        Some(Value::Object(_)) => data
            .and_then(|d| d.get("code"))
            .and_then(Value::as_i64)
            .is_some_and(|code| codes.contains(&code)),
        _ => false,
    }
}
