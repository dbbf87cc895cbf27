use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColloquyError {
    // Collaborator errors
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("Search failed: {0}")]
    Search(String),

    // LLM transport errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM request failed: HTTP {status}: {body}")]
    LlmHttp { status: u16, body: String },

    #[error("LLM provider unreachable: {0}")]
    LlmUnavailable(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Workflow errors
    #[error("All {} interview branches failed: {}", failed.len(), failed.join(", "))]
    TotalFanOutFailure { failed: Vec<String> },

    #[error("Stage {stage} failed: {message}")]
    Stage { stage: String, message: String },

    #[error("Cannot resume: {0}")]
    InvalidResume(String),

    // Publish errors
    #[error("Publish error: {channel}: {message}")]
    Publish { channel: String, message: String },

    // Checkpoint errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("No checkpoint for thread: {0}")]
    CheckpointNotFound(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ColloquyError {
    /// Re-tag a transport failure as a generation failure.
    ///
    /// Errors that already carry workflow meaning pass through unchanged.
    pub fn into_generation(self) -> Self {
        self.transport_message().map_or_else(|other| other, Self::Generation)
    }

    /// Re-tag a transport failure as a summarization failure.
    pub fn into_summarization(self) -> Self {
        self.transport_message().map_or_else(|other| other, Self::Summarization)
    }

    fn transport_message(self) -> std::result::Result<String, Self> {
        match self {
            Self::LlmRequest(msg)
            | Self::LlmParse(msg)
            | Self::LlmUnavailable(msg)
            | Self::UnsupportedProvider(msg) => Ok(msg),
            Self::LlmHttp { status, body } => Ok(format!("HTTP {}: {}", status, body)),
            other => Err(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ColloquyError>;
