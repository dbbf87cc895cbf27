use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// What a [`Generator`] is asked to produce.
#[derive(Debug, Clone, Copy)]
pub enum GenerationTask<'a> {
    /// The next interviewer question for `participant`.
    ///
    /// `opening` is the kickoff message every branch starts from; it is not
    /// part of `log`.
    Question {
        topic: &'a str,
        opening: &'a str,
        participant: &'a Participant,
        log: &'a ConversationLog,
    },
    /// An answer to the last question in `log`, limited to `sources`.
    Answer {
        topic: &'a str,
        participant: &'a Participant,
        log: &'a ConversationLog,
        sources: &'a [String],
    },
    /// A web search query distilled from the conversation so far, focused on
    /// the last question in `log`.
    SearchQuery {
        topic: &'a str,
        participant: &'a Participant,
        log: &'a ConversationLog,
    },
    /// An introduction for the combined report body.
    Introduction { topic: &'a str, body: &'a str },
}

impl GenerationTask<'_> {
    /// Short label used in logs and errors.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Question { .. } => "question",
            Self::Answer { .. } => "answer",
            Self::SearchQuery { .. } => "search_query",
            Self::Introduction { .. } => "introduction",
        }
    }
}

/// Input for condensing one interview into a report section.
#[derive(Debug, Clone, Copy)]
pub struct SummaryRequest<'a> {
    pub topic: &'a str,
    pub participant: &'a Participant,
    pub log: &'a ConversationLog,
    pub sources: &'a [String],
    pub editor_feedback: Option<&'a str>,
}

/// Input for creating the participant panel.
#[derive(Debug, Clone, Copy)]
pub struct ParticipantRequest<'a> {
    pub topic: &'a str,
    pub max_participants: usize,
    pub feedback: Option<&'a str>,
}

/// Text generation for questions, answers, search queries, and introductions.
pub trait Generator: Send + Sync + 'static {
    fn generate<'a>(&'a self, task: GenerationTask<'a>) -> BoxFuture<'a, Result<String>>;
}

/// Supplementary lookup for a query.
pub trait Searcher: Send + Sync + 'static {
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Condenses a finished interview into one artifact.
pub trait Summarizer: Send + Sync + 'static {
    fn summarize<'a>(&'a self, request: SummaryRequest<'a>) -> BoxFuture<'a, Result<String>>;
}

/// Produces the panel of participants for a topic.
pub trait ParticipantGenerator: Send + Sync + 'static {
    fn generate_participants<'a>(
        &'a self,
        request: ParticipantRequest<'a>,
    ) -> BoxFuture<'a, Result<Vec<Participant>>>;
}

/// Checkpoint persistence, one writer per thread.
pub trait CheckpointStore: Send + Sync + 'static {
    /// Persist a checkpoint, replacing any earlier one for the thread.
    fn save<'a>(&'a self, checkpoint: &'a Checkpoint) -> BoxFuture<'a, Result<()>>;

    /// Load the latest checkpoint for a thread.
    fn load<'a>(&'a self, thread_id: &'a ThreadId) -> BoxFuture<'a, Result<Option<Checkpoint>>>;

    /// Remove every checkpoint for a thread. Returns how many were removed.
    fn delete<'a>(&'a self, thread_id: &'a ThreadId) -> BoxFuture<'a, Result<usize>>;
}

/// Sends a finished report to an external channel.
pub trait Publisher: Send + Sync + 'static {
    /// Channel name (e.g., "slack").
    fn name(&self) -> &str;

    fn publish<'a>(&'a self, report: &'a AggregateResult) -> BoxFuture<'a, Result<()>>;
}

/// Plain chat completion against one configured model.
pub trait LlmClient: Send + Sync + 'static {
    fn chat(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>>;
}
