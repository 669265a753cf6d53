use std::fmt;

/// Kind of operation an inbound request represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RelayMode {
    #[default]
    Unknown,
    ChatCompletions,
    Completions,
    Embeddings,
    Moderations,
    ImagesGenerations,
    Edits,
    Audio,
}

impl RelayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayMode::Unknown => "unknown",
            RelayMode::ChatCompletions => "chat_completions",
            RelayMode::Completions => "completions",
            RelayMode::Embeddings => "embeddings",
            RelayMode::Moderations => "moderations",
            RelayMode::ImagesGenerations => "images_generations",
            RelayMode::Edits => "edits",
            RelayMode::Audio => "audio",
        }
    }

    /// Modes metered by token count rather than per item.
    pub fn is_token_metered(&self) -> bool {
        !matches!(self, RelayMode::ImagesGenerations | RelayMode::Audio)
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
