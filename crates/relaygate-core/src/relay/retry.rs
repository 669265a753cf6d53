use relaygate_common::message_with_request_id;
use relaygate_protocol::{ApiError, ErrorWithStatusCode};

pub const SATURATED_MESSAGE: &str = "upstream load is saturated, please try again later";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { remaining: u32 },
    Exhausted,
}

pub fn next_attempt(budget: u32) -> RetryDecision {
    match budget.checked_sub(1) {
        Some(remaining) => RetryDecision::Retry { remaining },
        None => RetryDecision::Exhausted,
    }
}

/// `retry` from the inbound query string, else the configured default.
pub fn parse_retry_budget(query: Option<&str>, default: u32) -> u32 {
    query
        .and_then(|query| serde_urlencoded::from_str::<Vec<(String, String)>>(query).ok())
        .and_then(|pairs| {
            pairs
                .into_iter()
                .find(|(key, _)| key == "retry")
                .and_then(|(_, value)| value.trim().parse::<u32>().ok())
        })
        .unwrap_or(default)
}

const TRANSIENT_KINDS: &[&str] = &["rate_limit_exceeded", "server_overloaded", "overloaded_error"];
const DISABLING_TYPES: &[&str] = &[
    "insufficient_quota",
    "authentication_error",
    "permission_error",
    "forbidden",
];
const DISABLING_CODES: &[&str] = &["invalid_api_key", "account_deactivated"];
const DISABLING_MESSAGES: &[&str] = &[
    "your credit balance is too low",
    "this organization has been disabled",
    "you exceeded your current quota",
    "incorrect api key provided",
    "api key not valid",
    "api key expired",
    "your access was terminated",
    "billing hard limit has been reached",
    "the security token included in the request is invalid",
];

/// Whether an upstream failure means the channel's credentials or billing
/// are permanently broken.
pub fn should_disable_channel(status: u16, error: &ApiError) -> bool {
    let code = error.code_str().unwrap_or_default();
    if TRANSIENT_KINDS
        .iter()
        .any(|kind| *kind == error.kind || *kind == code)
    {
        return false;
    }
    if status == 401 {
        return true;
    }
    if DISABLING_TYPES.contains(&error.kind.as_str()) || DISABLING_CODES.contains(&code) {
        return true;
    }
    let message = error.message.to_ascii_lowercase();
    DISABLING_MESSAGES
        .iter()
        .any(|needle| message.contains(needle))
}

/// Caller-facing form of a terminal error.
pub fn surface_error(err: ErrorWithStatusCode, request_id: &str) -> ErrorWithStatusCode {
    let err = if err.status_code() == 429 {
        err.with_message(SATURATED_MESSAGE)
    } else {
        err
    };
    let message = message_with_request_id(err.message(), request_id);
    err.with_message(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_strictly_decreases_to_exhaustion() {
        let mut budget = 3;
        let mut attempts = 1;
        while let RetryDecision::Retry { remaining } = next_attempt(budget) {
            assert_eq!(remaining, budget - 1);
            budget = remaining;
            attempts += 1;
        }
        assert_eq!(attempts, 4);
        assert_eq!(next_attempt(0), RetryDecision::Exhausted);
    }

    #[test]
    fn budget_from_query() {
        assert_eq!(parse_retry_budget(Some("retry=2"), 0), 2);
        assert_eq!(parse_retry_budget(Some("a=b&retry=5"), 1), 5);
        assert_eq!(parse_retry_budget(Some("retry=lots"), 1), 1);
        assert_eq!(parse_retry_budget(Some("retry=-1"), 1), 1);
        assert_eq!(parse_retry_budget(None, 3), 3);
    }

    #[test]
    fn disable_table() {
        let err = |kind: &str, code: &str, message: &str| ApiError::new(message, kind, code);
        assert!(should_disable_channel(401, &err("", "", "")));
        assert!(should_disable_channel(429, &err("insufficient_quota", "", "")));
        assert!(should_disable_channel(400, &err("", "invalid_api_key", "")));
        assert!(should_disable_channel(
            400,
            &err("invalid_request_error", "", "Your credit balance is too low to access the API")
        ));
        assert!(!should_disable_channel(429, &err("rate_limit_exceeded", "", "")));
        assert!(!should_disable_channel(401, &err("overloaded_error", "", "")));
        assert!(!should_disable_channel(503, &err("", "server_overloaded", "")));
        assert!(!should_disable_channel(500, &err("upstream_error", "bad_response_status_code", "")));
    }

    #[test]
    fn surfaced_errors_carry_request_id() {
        let err = ErrorWithStatusCode::wrap("Rate limit reached", "rate_limit", 429);
        let surfaced = surface_error(err, "abc");
        assert_eq!(
            surfaced.message(),
            "upstream load is saturated, please try again later (request id: abc)"
        );
        let err = ErrorWithStatusCode::wrap("boom", "do_request_failed", 500);
        assert_eq!(surface_error(err, "abc").message(), "boom (request id: abc)");
    }
}
