use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TextMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            name: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ImageDetail>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    Auto,
}

/// The `messages` field of a unified request.
///
/// The shape is decided once at parse time: plain text messages first, then
/// vision messages with typed content parts, then any list of JSON objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Messages {
    #[default]
    None,
    Text(Vec<TextMessage>),
    Vision(Vec<VisionMessage>),
    Unstructured(Vec<Map<String, Value>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagesShapeError(&'static str);

impl fmt::Display for MessagesShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid messages: {}", self.0)
    }
}

impl std::error::Error for MessagesShapeError {}

impl Messages {
    pub fn from_value(value: Value) -> Result<Self, MessagesShapeError> {
        let items = match value {
            Value::Null => return Ok(Messages::None),
            Value::Array(items) => items,
            _ => return Err(MessagesShapeError("expected an array")),
        };
        if let Ok(text) = serde_json::from_value::<Vec<TextMessage>>(Value::Array(items.clone())) {
            return Ok(Messages::Text(text));
        }
        if let Ok(vision) =
            serde_json::from_value::<Vec<VisionMessage>>(Value::Array(items.clone()))
        {
            return Ok(Messages::Vision(vision));
        }
        let mut maps = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Object(map) => maps.push(map),
                _ => return Err(MessagesShapeError("every message must be an object")),
            }
        }
        Ok(Messages::Unstructured(maps))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Messages::None)
    }

    pub fn len(&self) -> usize {
        match self {
            Messages::None => 0,
            Messages::Text(items) => items.len(),
            Messages::Vision(items) => items.len(),
            Messages::Unstructured(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Plain-text view of every message. Image parts are dropped and text
    /// parts are joined with a newline.
    pub fn text_messages(&self) -> Vec<TextMessage> {
        match self {
            Messages::None => Vec::new(),
            Messages::Text(items) => items.clone(),
            Messages::Vision(items) => items
                .iter()
                .map(|message| TextMessage {
                    role: message.role.clone(),
                    content: join_text_parts(&message.content),
                    name: message.name.clone(),
                    extra: message.extra.clone(),
                })
                .collect(),
            Messages::Unstructured(items) => items.iter().map(text_from_map).collect(),
        }
    }

    /// Content-part view of every message; plain content becomes one text part.
    pub fn vision_messages(&self) -> Vec<VisionMessage> {
        match self {
            Messages::None => Vec::new(),
            Messages::Vision(items) => items.clone(),
            Messages::Text(items) => items.iter().map(vision_from_text).collect(),
            Messages::Unstructured(items) => items
                .iter()
                .map(|map| {
                    let parts = map
                        .get("content")
                        .and_then(|value| {
                            serde_json::from_value::<Vec<ContentPart>>(value.clone()).ok()
                        });
                    match parts {
                        Some(content) => VisionMessage {
                            role: string_field(map, "role"),
                            content,
                            name: map.get("name").and_then(Value::as_str).map(str::to_string),
                            extra: BTreeMap::new(),
                        },
                        None => vision_from_text(&text_from_map(map)),
                    }
                })
                .collect(),
        }
    }
}

impl From<Vec<TextMessage>> for Messages {
    fn from(value: Vec<TextMessage>) -> Self {
        Messages::Text(value)
    }
}

impl From<Vec<VisionMessage>> for Messages {
    fn from(value: Vec<VisionMessage>) -> Self {
        Messages::Vision(value)
    }
}

impl Serialize for Messages {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Messages::None => serializer.serialize_none(),
            Messages::Text(items) => items.serialize(serializer),
            Messages::Vision(items) => items.serialize(serializer),
            Messages::Unstructured(items) => items.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Messages {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Messages::from_value(value.unwrap_or(Value::Null)).map_err(serde::de::Error::custom)
    }
}

fn join_text_parts(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(text.as_str()),
            ContentPart::ImageUrl { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn vision_from_text(message: &TextMessage) -> VisionMessage {
    VisionMessage {
        role: message.role.clone(),
        content: vec![ContentPart::Text {
            text: message.content.clone(),
        }],
        name: message.name.clone(),
        extra: message.extra.clone(),
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn text_from_map(map: &Map<String, Value>) -> TextMessage {
    let content = match map.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };
    TextMessage {
        role: string_field(map, "role"),
        content,
        name: map.get("name").and_then(Value::as_str).map(str::to_string),
        extra: BTreeMap::new(),
    }
}
