//! Prompt and completion token counting.
//!
//! Encoders are chosen per model and fall back to `o200k_base` for names
//! tiktoken does not know. Built encoders are cached per encoding.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use relaygate_protocol::{ContentPart, ImageDetail, Messages, RelayMode, UnifiedRequest};
use tiktoken_rs::tokenizer::{Tokenizer, get_tokenizer};
use tiktoken_rs::{CoreBPE, get_bpe_from_model, o200k_base};
use tracing::warn;

const TOKENS_PER_MESSAGE: u64 = 3;
const TOKENS_PER_NAME: u64 = 1;
const REPLY_PRIMING_TOKENS: u64 = 3;
const LOW_DETAIL_IMAGE_TOKENS: u64 = 85;
const HIGH_DETAIL_IMAGE_TOKENS: u64 = 765;

static ENCODERS: OnceLock<RwLock<HashMap<Tokenizer, Arc<CoreBPE>>>> = OnceLock::new();

fn encoder(model: &str) -> Option<Arc<CoreBPE>> {
    let tokenizer = get_tokenizer(model).unwrap_or(Tokenizer::O200kBase);
    let cache = ENCODERS.get_or_init(|| RwLock::new(HashMap::new()));
    if let Ok(guard) = cache.read() {
        if let Some(bpe) = guard.get(&tokenizer) {
            return Some(bpe.clone());
        }
    }

    let built = match get_bpe_from_model(model) {
        Ok(bpe) => bpe,
        Err(_) => match o200k_base() {
            Ok(bpe) => bpe,
            Err(err) => {
                warn!(event = "tokenizer_unavailable", model = %model, error = %err);
                return None;
            }
        },
    };
    let bpe = Arc::new(built);
    if let Ok(mut guard) = cache.write() {
        guard.entry(tokenizer).or_insert_with(|| bpe.clone());
    }
    Some(bpe)
}

/// Token count of `text` under the encoding used by `model`.
///
/// Falls back to a four-bytes-per-token estimate when no encoder loads.
pub fn count_text(model: &str, text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    match encoder(model) {
        Some(bpe) => bpe.encode_ordinary(text).len() as u64,
        None => text.len().div_ceil(4) as u64,
    }
}

pub fn count_texts(model: &str, texts: &[String]) -> u64 {
    texts.iter().map(|text| count_text(model, text)).sum()
}

fn image_tokens(detail: Option<ImageDetail>) -> u64 {
    match detail {
        Some(ImageDetail::Low) => LOW_DETAIL_IMAGE_TOKENS,
        _ => HIGH_DETAIL_IMAGE_TOKENS,
    }
}

/// Chat prompt size: per-message overhead, role, name and content parts,
/// plus the reply priming tokens.
pub fn count_messages(model: &str, messages: &Messages) -> u64 {
    if messages.is_empty() {
        return 0;
    }
    let mut total = 0;
    for message in messages.vision_messages() {
        total += TOKENS_PER_MESSAGE;
        total += count_text(model, &message.role);
        for part in &message.content {
            total += match part {
                ContentPart::Text { text } => count_text(model, text),
                ContentPart::ImageUrl { image_url } => image_tokens(image_url.detail),
            };
        }
        if let Some(name) = message.name.as_deref() {
            total += TOKENS_PER_NAME + count_text(model, name);
        }
    }
    total + REPLY_PRIMING_TOKENS
}

/// Prompt tokens for a request of the given mode.
pub fn count_request(mode: RelayMode, request: &UnifiedRequest, model: &str) -> u64 {
    match mode {
        RelayMode::ChatCompletions => count_messages(model, &request.messages),
        RelayMode::Completions => count_texts(model, &request.parse_prompt()),
        RelayMode::Embeddings | RelayMode::Moderations => {
            count_texts(model, &request.parse_input())
        }
        RelayMode::Edits => request
            .instruction
            .as_deref()
            .map(|instruction| count_text(model, instruction))
            .unwrap_or(0),
        RelayMode::Unknown => {
            if request.prompt.is_some() {
                count_texts(model, &request.parse_prompt())
            } else {
                count_messages(model, &request.messages)
            }
        }
        RelayMode::ImagesGenerations | RelayMode::Audio => 0,
    }
}
