use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

/// Ratio applied to models missing from the table.
pub const DEFAULT_MODEL_RATIO: f64 = 30.0;

/// One ratio unit is $0.002 per 1K tokens.
const MODEL_RATIOS: &[(&str, f64)] = &[
    ("gpt-3.5-turbo", 0.75),
    ("gpt-3.5-turbo-0125", 0.25),
    ("gpt-3.5-turbo-instruct", 0.75),
    ("gpt-4", 15.0),
    ("gpt-4-turbo", 5.0),
    ("gpt-4o", 2.5),
    ("gpt-4o-mini", 0.075),
    ("text-embedding-ada-002", 0.05),
    ("text-embedding-3-small", 0.01),
    ("text-embedding-3-large", 0.065),
    ("text-moderation-latest", 0.1),
    ("text-moderation-stable", 0.1),
    ("text-davinci-edit-001", 10.0),
    ("dall-e-2", 8.0),
    ("dall-e-3", 20.0),
    ("claude-3-haiku-20240307", 0.125),
    ("claude-3-5-sonnet-20240620", 1.5),
    ("claude-3-opus-20240229", 7.5),
];

const COMPLETION_RATIO_PREFIXES: &[(&str, f64)] = &[
    ("gpt-3.5", 4.0 / 3.0),
    ("gpt-4o", 4.0),
    ("gpt-4", 2.0),
    ("claude-3", 5.0),
];

#[derive(Debug, thiserror::Error)]
pub enum RatioError {
    #[error("read ratio file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse ratio file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Default, Deserialize)]
struct RatioFile {
    #[serde(default)]
    model_ratio: HashMap<String, f64>,
    #[serde(default)]
    completion_ratio: HashMap<String, f64>,
}

/// Pricing multipliers per model.
#[derive(Debug, Clone)]
pub struct RatioTable {
    model_ratio: HashMap<String, f64>,
    completion_ratio: HashMap<String, f64>,
}

impl Default for RatioTable {
    fn default() -> Self {
        Self {
            model_ratio: MODEL_RATIOS
                .iter()
                .map(|(model, ratio)| (model.to_string(), *ratio))
                .collect(),
            completion_ratio: HashMap::new(),
        }
    }
}

impl RatioTable {
    pub fn empty() -> Self {
        Self {
            model_ratio: HashMap::new(),
            completion_ratio: HashMap::new(),
        }
    }

    /// Defaults with the entries of a JSON ratio file layered on top.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RatioError> {
        let raw = std::fs::read(path)?;
        let file: RatioFile = serde_json::from_slice(&raw)?;
        let mut table = Self::default();
        table.model_ratio.extend(file.model_ratio);
        table.completion_ratio.extend(file.completion_ratio);
        Ok(table)
    }

    pub fn with_model_ratio(mut self, model: impl Into<String>, ratio: f64) -> Self {
        self.model_ratio.insert(model.into(), ratio);
        self
    }

    pub fn with_completion_ratio(mut self, model: impl Into<String>, ratio: f64) -> Self {
        self.completion_ratio.insert(model.into(), ratio);
        self
    }

    pub fn model_ratio(&self, model: &str) -> f64 {
        self.model_ratio
            .get(model)
            .copied()
            .unwrap_or(DEFAULT_MODEL_RATIO)
    }

    /// Explicit entries win; otherwise the family prefix decides, then 1.
    pub fn completion_ratio(&self, model: &str) -> f64 {
        if let Some(ratio) = self.completion_ratio.get(model) {
            return *ratio;
        }
        COMPLETION_RATIO_PREFIXES
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix))
            .map(|(_, ratio)| *ratio)
            .unwrap_or(1.0)
    }
}
