use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ColloquyError, Result};
use crate::types::Stage;

/// Top-level Colloquy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    /// Model used for report sections and introductions. Falls back to `model`.
    #[serde(default)]
    pub report_model: Option<ModelConfig>,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub interview: InterviewConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub interrupts: InterruptConfig,
    #[serde(default)]
    pub web_search: Option<WebSearchConfig>,
    #[serde(default)]
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Extra HTTP headers sent with every request.
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Panel and fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Upper bound on generated participants.
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,
    /// Branches allowed to run at once (0 = unbounded).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Kickoff message for every branch; `{topic}` is substituted.
    #[serde(default = "default_opening")]
    pub opening: String,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_participants: default_max_participants(),
            max_concurrency: default_max_concurrency(),
            opening: default_opening(),
        }
    }
}

impl ResearchConfig {
    /// The kickoff message for `topic`.
    pub fn opening_for(&self, topic: &str) -> String {
        self.opening.replace("{topic}", topic)
    }
}

fn default_max_participants() -> usize { 3 }
fn default_max_concurrency() -> usize { 4 }
fn default_opening() -> String { "So you said you were writing an article on {topic}?".to_string() }

/// Per-branch interview settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewConfig {
    /// Maximum responder turns per interview.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Case-sensitive substring that ends an interview when the asker says it.
    #[serde(default = "default_termination_phrase")]
    pub termination_phrase: String,
    /// Run one supplementary search after the last answer.
    #[serde(default = "default_reflect")]
    pub reflect: bool,
    /// Search with each question before answering it. Needs a searcher.
    #[serde(default = "default_ground_answers")]
    pub ground_answers: bool,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            termination_phrase: default_termination_phrase(),
            reflect: default_reflect(),
            ground_answers: default_ground_answers(),
        }
    }
}

fn default_max_turns() -> usize { 3 }
fn default_termination_phrase() -> String { "Thank you so much for your help".to_string() }
fn default_reflect() -> bool { true }
fn default_ground_answers() -> bool { true }

/// Checkpoint / resume configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Persist checkpoints (default: true).
    #[serde(default = "default_checkpoint_enabled")]
    pub enabled: bool,
    /// SQLite database path.
    #[serde(default = "default_checkpoint_path")]
    pub path: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: default_checkpoint_enabled(),
            path: default_checkpoint_path(),
        }
    }
}

impl CheckpointConfig {
    /// Resolve the database path (expand ~).
    pub fn db_path(&self) -> PathBuf {
        if let Some(rest) = self.path.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.path)
    }
}

fn default_checkpoint_enabled() -> bool { true }
fn default_checkpoint_path() -> String { "state_db/colloquy.db".to_string() }

/// Named pause points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptConfig {
    #[serde(default = "default_interrupt_before")]
    pub before: Vec<Stage>,
    #[serde(default = "default_interrupt_after")]
    pub after: Vec<Stage>,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            before: default_interrupt_before(),
            after: default_interrupt_after(),
        }
    }
}

impl InterruptConfig {
    /// No pause points at all.
    pub fn none() -> Self {
        Self {
            before: vec![],
            after: vec![],
        }
    }
}

fn default_interrupt_before() -> Vec<Stage> { vec![Stage::Publish] }
fn default_interrupt_after() -> Vec<Stage> { vec![Stage::GenerateParticipants] }

/// Web search provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "default_search_provider")]
    pub provider: String,
    pub api_key: String,
    #[serde(default = "default_search_results")]
    pub max_results: u32,
}

fn default_search_provider() -> String { "tavily".to_string() }
fn default_search_results() -> u32 { 4 }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub slack: Option<SlackConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Incoming webhook URL.
    pub webhook_url: String,
    /// Text of the header block prepended to each message.
    #[serde(default = "default_slack_header")]
    pub header: String,
}

fn default_slack_header() -> String { ":robot_face: Colloquy has been busy ...".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ColloquyError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| ColloquyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config around a single model with every other section defaulted.
    pub fn with_model(model: ModelConfig) -> Self {
        Self {
            model,
            report_model: None,
            fallback_models: vec![],
            research: ResearchConfig::default(),
            interview: InterviewConfig::default(),
            checkpoint: CheckpointConfig::default(),
            interrupts: InterruptConfig::default(),
            web_search: None,
            publish: PublishConfig::default(),
        }
    }

    /// Reject settings the workflow cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.interview.max_turns == 0 {
            return Err(ColloquyError::Config(
                "interview.max_turns must be at least 1".into(),
            ));
        }
        if self.interview.termination_phrase.is_empty() {
            return Err(ColloquyError::Config(
                "interview.termination_phrase must not be empty".into(),
            ));
        }
        if self.research.max_participants == 0 {
            return Err(ColloquyError::Config(
                "research.max_participants must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The model used for sections and introductions.
    pub fn report_model(&self) -> &ModelConfig {
        self.report_model.as_ref().unwrap_or(&self.model)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep the reference if unset
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
