use std::sync::Arc;

use futures::future::BoxFuture;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use colloquy_core::config::{AppConfig, ModelConfig};
use colloquy_core::error::{ColloquyError, Result};
use colloquy_core::traits::{
    GenerationTask, Generator, LlmClient, ParticipantGenerator, ParticipantRequest, SummaryRequest,
    Summarizer,
};
use colloquy_core::types::Participant;

use crate::prompts;

/// Interview collaborators backed by a chat model.
///
/// Questions, answers, and panels use `model`; sections and introductions use
/// `report_model`.
pub struct LlmResearcher {
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    report_model: ModelConfig,
    termination_phrase: String,
}

impl LlmResearcher {
    pub fn new(llm: Arc<dyn LlmClient>, model: ModelConfig) -> Self {
        Self {
            llm,
            report_model: model.clone(),
            model,
            termination_phrase: "Thank you so much for your help".to_string(),
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, config: &AppConfig) -> Self {
        Self::new(llm, config.model.clone())
            .with_report_model(config.report_model().clone())
            .with_termination_phrase(config.interview.termination_phrase.clone())
    }

    pub fn with_report_model(mut self, model: ModelConfig) -> Self {
        self.report_model = model;
        self
    }

    pub fn with_termination_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.termination_phrase = phrase.into();
        self
    }
}

impl Generator for LlmResearcher {
    fn generate<'a>(&'a self, task: GenerationTask<'a>) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let (config, messages) = match task {
                GenerationTask::Question {
                    opening,
                    participant,
                    log,
                    ..
                } => (
                    &self.model,
                    prompts::question_messages(opening, participant, log, &self.termination_phrase),
                ),
                GenerationTask::Answer {
                    topic, log, sources, ..
                } => (&self.model, prompts::answer_messages(topic, log, sources)),
                GenerationTask::SearchQuery { topic, log, .. } => {
                    (&self.model, prompts::search_query_messages(topic, log))
                }
                GenerationTask::Introduction { topic, body } => (
                    &self.report_model,
                    prompts::introduction_messages(topic, body),
                ),
            };

            debug!(task = task.label(), model = %config.model_id, "Generating");
            let text = self
                .llm
                .chat(config, messages)
                .await
                .map_err(ColloquyError::into_generation)?;

            match task {
                GenerationTask::SearchQuery { .. } => parse_search_query(&text),
                _ => Ok(text),
            }
        })
    }
}

impl Summarizer for LlmResearcher {
    fn summarize<'a>(&'a self, request: SummaryRequest<'a>) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let messages = prompts::section_messages(
                request.participant,
                request.log,
                request.sources,
                request.editor_feedback,
            );
            debug!(participant = %request.participant.name, "Writing section");
            self.llm
                .chat(&self.report_model, messages)
                .await
                .map_err(ColloquyError::into_summarization)
        })
    }
}

impl ParticipantGenerator for LlmResearcher {
    fn generate_participants<'a>(
        &'a self,
        request: ParticipantRequest<'a>,
    ) -> BoxFuture<'a, Result<Vec<Participant>>> {
        Box::pin(async move {
            let messages =
                prompts::participant_messages(request.topic, request.max_participants, request.feedback);
            let raw = self
                .llm
                .chat(&self.model, messages)
                .await
                .map_err(ColloquyError::into_generation)?;

            let mut participants = parse_participants(&raw)?;
            if participants.len() > request.max_participants {
                warn!(
                    returned = participants.len(),
                    max = request.max_participants,
                    "Model returned too many participants, truncating"
                );
                participants.truncate(request.max_participants);
            }
            Ok(participants)
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PanelPayload {
    List(Vec<Participant>),
    Wrapped {
        #[serde(alias = "analysts")]
        participants: Vec<Participant>,
    },
}

/// The contents of the first markdown code fence, or the trimmed input.
fn unfenced(raw: &str) -> Result<&str> {
    let fence = Regex::new(r"(?s)```(?:json|text)?\s*(.*?)\s*```")
        .map_err(|e| ColloquyError::Generation(e.to_string()))?;
    Ok(fence
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| raw.trim()))
}

#[derive(Deserialize)]
struct QueryPayload {
    search_query: String,
}

/// Parse a search query from model output.
///
/// Takes the first non-empty line with surrounding quotes removed. A JSON
/// object with a `search_query` field is also accepted.
pub fn parse_search_query(raw: &str) -> Result<String> {
    let body = unfenced(raw)?;
    let query = match serde_json::from_str::<QueryPayload>(body) {
        Ok(payload) => payload.search_query,
        Err(_) => body
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string(),
    };

    let query = query.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`').trim();
    if query.is_empty() {
        return Err(ColloquyError::Generation("model returned an empty search query".into()));
    }
    Ok(query.to_string())
}

/// Parse a participant panel from model output.
///
/// Accepts a bare JSON array or an object with a `participants`/`analysts`
/// field, optionally wrapped in a markdown code fence.
pub fn parse_participants(raw: &str) -> Result<Vec<Participant>> {
    let body = unfenced(raw)?;

    let payload: PanelPayload = serde_json::from_str(body)
        .map_err(|e| ColloquyError::Generation(format!("invalid participant JSON: {}", e)))?;
    let participants = match payload {
        PanelPayload::List(list) => list,
        PanelPayload::Wrapped { participants } => participants,
    };

    if participants.is_empty() {
        return Err(ColloquyError::Generation("model returned no participants".into()));
    }
    Ok(participants)
}
