use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::Messages;

/// `prompt` / `input` accept either one string or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextInput {
    Single(String),
    List(Vec<Value>),
}

impl TextInput {
    /// String items only; non-string list entries (token arrays) are skipped.
    pub fn strings(&self) -> Vec<String> {
        match self {
            TextInput::Single(text) => vec![text.clone()],
            TextInput::List(items) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            TextInput::Single(text) => text.is_empty(),
            TextInput::List(items) => items.is_empty(),
        }
    }
}

/// Provider-agnostic inference request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Messages::is_none")]
    pub messages: Messages,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<TextInput>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<TextInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl UnifiedRequest {
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn messages_len(&self) -> usize {
        self.messages.len()
    }

    pub fn parse_input(&self) -> Vec<String> {
        self.input.as_ref().map(TextInput::strings).unwrap_or_default()
    }

    pub fn parse_prompt(&self) -> Vec<String> {
        self.prompt.as_ref().map(TextInput::strings).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unknown_fields_survive_reserialization() {
        let body = json!({
            "model": "gpt-4o",
            "messages": [{ "role": "user", "content": "hi" }],
            "frequency_penalty": 0,
            "response_format": { "type": "json_object" }
        });
        let request: UnifiedRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.messages_len(), 1);
        let value: Value = serde_json::from_slice(&request.to_vec().unwrap()).unwrap();
        assert_eq!(value["frequency_penalty"], json!(0));
        assert_eq!(value["response_format"]["type"], json!("json_object"));
        assert!(value.get("stream").is_none());
    }

    #[test]
    fn input_accepts_string_or_list() {
        let single: UnifiedRequest =
            serde_json::from_value(json!({ "model": "m", "input": "abc" })).unwrap();
        assert_eq!(single.parse_input(), vec!["abc".to_string()]);

        let list: UnifiedRequest =
            serde_json::from_value(json!({ "model": "m", "input": ["a", 3, "b"] })).unwrap();
        assert_eq!(list.parse_input(), vec!["a".to_string(), "b".to_string()]);

        let none: UnifiedRequest = serde_json::from_value(json!({ "model": "m" })).unwrap();
        assert!(none.parse_input().is_empty());
    }

    #[test]
    fn null_messages_are_none() {
        let request: UnifiedRequest =
            serde_json::from_value(json!({ "model": "m", "messages": null, "prompt": "x" }))
                .unwrap();
        assert!(request.messages.is_none());
        assert_eq!(request.parse_prompt(), vec!["x".to_string()]);
    }
}
