use relaygate_protocol::{RelayMode, TextInput, UnifiedRequest};

use crate::error::RelayError;

const MAX_TOKENS_LIMIT: u32 = 1 << 20;
const DEFAULT_MODERATION_MODEL: &str = "text-moderation-latest";
const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

#[derive(Debug, Clone, Copy)]
enum PathRule {
    Prefix(&'static str),
    Suffix(&'static str),
}

impl PathRule {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathRule::Prefix(prefix) => path.starts_with(prefix),
            PathRule::Suffix(suffix) => path.ends_with(suffix),
        }
    }
}

/// Ordered; the first matching rule wins.
const RULES: &[(PathRule, RelayMode)] = &[
    (PathRule::Prefix("/v1/chat/completions"), RelayMode::ChatCompletions),
    (PathRule::Prefix("/v1/completions"), RelayMode::Completions),
    (PathRule::Prefix("/v1/embeddings"), RelayMode::Embeddings),
    (PathRule::Suffix("embeddings"), RelayMode::Embeddings),
    (PathRule::Prefix("/v1/moderations"), RelayMode::Moderations),
    (PathRule::Prefix("/v1/images/generations"), RelayMode::ImagesGenerations),
    (PathRule::Prefix("/v1/edits"), RelayMode::Edits),
    (PathRule::Prefix("/v1/audio"), RelayMode::Audio),
];

pub fn classify_path(path: &str) -> RelayMode {
    RULES
        .iter()
        .find(|(rule, _)| rule.matches(path))
        .map(|(_, mode)| *mode)
        .unwrap_or(RelayMode::Unknown)
}

/// Decodes the body, checks the per-mode required fields and fills defaults.
pub fn parse_relay_request(mode: RelayMode, body: &[u8]) -> Result<UnifiedRequest, RelayError> {
    let mut request = UnifiedRequest::from_slice(body)
        .map_err(|err| RelayError::InvalidRequest(format!("invalid request body: {err}")))?;

    if request.model.is_empty() {
        if mode == RelayMode::Moderations {
            request.model = DEFAULT_MODERATION_MODEL.to_string();
        } else {
            return Err(missing("model"));
        }
    }
    if request.max_tokens.is_some_and(|value| value > MAX_TOKENS_LIMIT) {
        return Err(RelayError::InvalidRequest("max_tokens is invalid".to_string()));
    }

    match mode {
        RelayMode::ChatCompletions if request.messages.is_empty() => return Err(missing("messages")),
        RelayMode::Completions if blank(&request.prompt) => return Err(missing("prompt")),
        RelayMode::Embeddings | RelayMode::Moderations if blank(&request.input) => {
            return Err(missing("input"));
        }
        RelayMode::Edits if request.instruction.as_deref().unwrap_or_default().is_empty() => {
            return Err(missing("instruction"));
        }
        RelayMode::ImagesGenerations => {
            if blank(&request.prompt) {
                return Err(missing("prompt"));
            }
            if request.n.unwrap_or(0) == 0 {
                request.n = Some(1);
            }
            if request.size.as_deref().unwrap_or_default().is_empty() {
                request.size = Some(DEFAULT_IMAGE_SIZE.to_string());
            }
        }
        _ => {}
    }
    Ok(request)
}

fn blank(value: &Option<TextInput>) -> bool {
    value.as_ref().is_none_or(TextInput::is_blank)
}

fn missing(field: &str) -> RelayError {
    RelayError::InvalidRequest(format!("field {field} is required"))
}
