use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use http::HeaderMap;
use relaygate_protocol::{ApiError, ErrorWithStatusCode};

/// Identity of the caller for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenContext {
    pub token_id: i64,
    pub token_name: String,
    pub account_id: i64,
}

#[derive(Debug, Clone)]
pub struct TokenEntry {
    pub token_id: i64,
    pub account_id: i64,
    pub name: String,
    /// False when either the token or its account is disabled.
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TokenSnapshot {
    pub tokens_by_key: HashMap<String, TokenEntry>,
}

pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Result<TokenContext, ErrorWithStatusCode>;
}

/// Key lookup served from an in-memory snapshot.
#[derive(Debug)]
pub struct TokenAuth {
    snapshot: ArcSwap<TokenSnapshot>,
}

impl TokenAuth {
    pub fn new(snapshot: TokenSnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn replace_snapshot(&self, snapshot: TokenSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }
}

impl AuthProvider for TokenAuth {
    fn authenticate(&self, headers: &HeaderMap) -> Result<TokenContext, ErrorWithStatusCode> {
        let api_key = extract_api_key(headers).ok_or_else(|| auth_error(401, "missing api key"))?;

        let snapshot = self.snapshot.load();
        let entry = snapshot
            .tokens_by_key
            .get(api_key.as_str())
            .ok_or_else(|| auth_error(403, "invalid api key"))?;

        if !entry.enabled {
            return Err(auth_error(403, "api key disabled"));
        }

        Ok(TokenContext {
            token_id: entry.token_id,
            token_name: entry.name.clone(),
            account_id: entry.account_id,
        })
    }
}

fn auth_error(status: u16, message: &str) -> ErrorWithStatusCode {
    ErrorWithStatusCode::new(
        status,
        ApiError::new(message, "invalid_request_error", "invalid_api_key"),
    )
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = header_value(headers, "x-api-key") {
        return Some(value);
    }

    let auth = header_value(headers, "authorization")?;
    let auth = auth.trim();
    let token = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))?
        .trim();
    Some(token.to_string()).filter(|token| !token.is_empty())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn auth() -> TokenAuth {
        let mut snapshot = TokenSnapshot::default();
        snapshot.tokens_by_key.insert(
            "sk-live".to_string(),
            TokenEntry {
                token_id: 1,
                account_id: 10,
                name: "default".to_string(),
                enabled: true,
            },
        );
        snapshot.tokens_by_key.insert(
            "sk-off".to_string(),
            TokenEntry {
                token_id: 2,
                account_id: 10,
                name: "old".to_string(),
                enabled: false,
            },
        );
        TokenAuth::new(snapshot)
    }

    fn headers(name: &'static str, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn accepts_bearer_and_x_api_key() {
        let auth = auth();
        let ctx = auth
            .authenticate(&headers("authorization", "Bearer sk-live"))
            .unwrap();
        assert_eq!(ctx.account_id, 10);
        assert_eq!(
            auth.authenticate(&headers("x-api-key", "sk-live")).unwrap(),
            ctx
        );
    }

    #[test]
    fn rejects_missing_invalid_and_disabled_keys() {
        let auth = auth();
        assert_eq!(auth.authenticate(&HeaderMap::new()).unwrap_err().status_code(), 401);
        let err = auth
            .authenticate(&headers("authorization", "Bearer sk-nope"))
            .unwrap_err();
        assert_eq!((err.status_code(), err.message()), (403, "invalid api key"));
        let err = auth
            .authenticate(&headers("authorization", "bearer sk-off"))
            .unwrap_err();
        assert_eq!((err.status_code(), err.message()), (403, "api key disabled"));
    }
}
