use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub type ChannelId = i64;

/// Upstream wire family; selects the adaptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiType {
    OpenAI,
    Azure,
    Anthropic,
    Gemini,
}

impl ApiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::OpenAI => "openai",
            ApiType::Azure => "azure",
            ApiType::Anthropic => "anthropic",
            ApiType::Gemini => "gemini",
        }
    }
}

/// Vendor of a channel. Several vendors share one API type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    OpenAI,
    Azure,
    Anthropic,
    Baichuan,
    Gemini,
    /// Any OpenAI-compatible endpoint.
    Custom,
}

impl ChannelType {
    pub fn parse(value: &str) -> Option<Self> {
        let ty = match value.trim().to_ascii_lowercase().as_str() {
            "openai" => ChannelType::OpenAI,
            "azure" => ChannelType::Azure,
            "anthropic" | "claude" => ChannelType::Anthropic,
            "baichuan" => ChannelType::Baichuan,
            "gemini" => ChannelType::Gemini,
            "custom" => ChannelType::Custom,
            _ => return None,
        };
        Some(ty)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::OpenAI => "openai",
            ChannelType::Azure => "azure",
            ChannelType::Anthropic => "anthropic",
            ChannelType::Baichuan => "baichuan",
            ChannelType::Gemini => "gemini",
            ChannelType::Custom => "custom",
        }
    }

    pub fn api_type(&self) -> ApiType {
        match self {
            ChannelType::OpenAI | ChannelType::Baichuan | ChannelType::Custom => ApiType::OpenAI,
            ChannelType::Azure => ApiType::Azure,
            ChannelType::Anthropic => ApiType::Anthropic,
            ChannelType::Gemini => ApiType::Gemini,
        }
    }

    /// Vendors whose OpenAI-compatible endpoint rejects some client bodies
    /// verbatim; requests to them are always re-serialized.
    pub fn forces_body_rewrite(&self) -> bool {
        matches!(self, ChannelType::Baichuan)
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ChannelType::OpenAI | ChannelType::Custom => "https://api.openai.com",
            ChannelType::Azure => "",
            ChannelType::Anthropic => "https://api.anthropic.com",
            ChannelType::Baichuan => "https://api.baichuan-ai.com",
            ChannelType::Gemini => "https://generativelanguage.googleapis.com",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Enabled,
    ManuallyDisabled,
    AutoDisabled,
}

impl ChannelStatus {
    pub fn as_i32(&self) -> i32 {
        match self {
            ChannelStatus::Enabled => 1,
            ChannelStatus::ManuallyDisabled => 2,
            ChannelStatus::AutoDisabled => 3,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => ChannelStatus::Enabled,
            3 => ChannelStatus::AutoDisabled,
            _ => ChannelStatus::ManuallyDisabled,
        }
    }
}

/// Per-channel settings stored as JSON next to the channel row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub model_mapping: HashMap<String, String>,
    /// Models served by this channel; empty means any model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub channel_type: ChannelType,
    pub base_url: String,
    pub key: String,
    pub config: ChannelConfig,
    /// Group/channel cost multiplier.
    pub ratio: f64,
    pub weight: u32,
    pub priority: i32,
    pub status: ChannelStatus,
}

impl Channel {
    pub fn api_type(&self) -> ApiType {
        self.channel_type.api_type()
    }

    pub fn is_enabled(&self) -> bool {
        self.status == ChannelStatus::Enabled
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.config.models.is_empty() || self.config.models.iter().any(|item| item == model)
    }

    pub fn base_url(&self) -> &str {
        let base = self.base_url.trim();
        if base.is_empty() {
            self.channel_type.default_base_url()
        } else {
            base.trim_end_matches('/')
        }
    }

    /// Applies the channel's model mapping; returns the upstream model name
    /// and whether it differs from the requested one.
    pub fn map_model(&self, model: &str) -> (String, bool) {
        match self.config.model_mapping.get(model) {
            Some(mapped) if !mapped.is_empty() && mapped != model => (mapped.clone(), true),
            _ => (model.to_string(), false),
        }
    }
}
