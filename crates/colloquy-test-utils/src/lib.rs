//! Deterministic collaborators for exercising the interview workflow without a model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use colloquy_core::config::{AppConfig, InterruptConfig, ModelConfig};
use colloquy_core::error::{ColloquyError, Result};
use colloquy_core::traits::{
    GenerationTask, Generator, ParticipantGenerator, ParticipantRequest, Publisher, Searcher,
    SummaryRequest, Summarizer,
};
use colloquy_core::types::{AggregateResult, Participant};

/// Termination phrase the scripted asker uses when it wants to stop.
pub const THANKS: &str = "Thank you so much for your help!";

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Produces predictable questions, answers, search queries, and introductions.
///
/// Every text is tagged with the participant name so tests can detect
/// cross-branch contamination.
#[derive(Default)]
pub struct ScriptedGenerator {
    /// Ask this many questions, then thank the responder on the next one.
    finish_after: Option<usize>,
    fail_introduction: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen_sources: Mutex<HashMap<String, Vec<String>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// After `questions` ordinary questions, the next question carries [`THANKS`].
    pub fn finishing_after(mut self, questions: usize) -> Self {
        self.finish_after = Some(questions);
        self
    }

    pub fn with_failing_introduction(mut self) -> Self {
        self.fail_introduction = true;
        self
    }

    /// Sleep before every reply, so branches interleave.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Total number of generate calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Sources handed to the last answer for `participant`.
    pub fn sources_seen(&self, participant: &str) -> Vec<String> {
        self.seen_sources
            .lock()
            .unwrap()
            .get(participant)
            .cloned()
            .unwrap_or_default()
    }

    fn reply(&self, task: GenerationTask<'_>) -> Result<String> {
        match task {
            GenerationTask::Question {
                topic,
                participant,
                log,
                ..
            } => {
                let n = log.turns().len() / 2 + 1;
                if self.finish_after.is_some_and(|k| n > k) {
                    Ok(format!("[{}] {}", participant.name, THANKS))
                } else {
                    Ok(format!("[{}] Q{} about {}?", participant.name, n, topic))
                }
            }
            GenerationTask::Answer {
                participant,
                log,
                sources,
                ..
            } => {
                self.seen_sources
                    .lock()
                    .unwrap()
                    .insert(participant.name.clone(), sources.to_vec());
                let n = log.responder_turns() + 1;
                Ok(format!("[{}] A{}", participant.name, n))
            }
            GenerationTask::SearchQuery {
                participant, log, ..
            } => {
                let asked = log.len() - log.responder_turns();
                Ok(format!("{} query {}", participant.name, asked))
            }
            GenerationTask::Introduction { topic, .. } => {
                if self.fail_introduction {
                    Err(ColloquyError::Generation("introduction unavailable".into()))
                } else {
                    Ok(format!("# Report on {}", topic))
                }
            }
        }
    }
}

impl Generator for ScriptedGenerator {
    fn generate<'a>(&'a self, task: GenerationTask<'a>) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply(task)
        })
    }
}

/// Behaves like [`ScriptedGenerator`] except for one participant, whose
/// branch errors (or panics) on its first question.
pub struct FailingGenerator {
    inner: ScriptedGenerator,
    target: String,
    panic: bool,
}

impl FailingGenerator {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            inner: ScriptedGenerator::new(),
            target: target.into(),
            panic: false,
        }
    }

    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }
}

impl Generator for FailingGenerator {
    fn generate<'a>(&'a self, task: GenerationTask<'a>) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            if let GenerationTask::Question { participant, .. } = task {
                if participant.name == self.target {
                    if self.panic {
                        panic!("scripted panic for {}", self.target);
                    }
                    return Err(ColloquyError::Generation(format!(
                        "scripted failure for {}",
                        self.target
                    )));
                }
            }
            self.inner.generate(task).await
        })
    }
}

// ---------------------------------------------------------------------------
// Summarizer
// ---------------------------------------------------------------------------

/// Returns `## <participant>` followed by the transcript.
#[derive(Default)]
pub struct EchoSummarizer {
    fail_for: Option<String>,
    feedback: Mutex<Vec<Option<String>>>,
}

impl EchoSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, participant: impl Into<String>) -> Self {
        self.fail_for = Some(participant.into());
        self
    }

    /// Editor feedback seen by each call, in call order.
    pub fn feedback_seen(&self) -> Vec<Option<String>> {
        self.feedback.lock().unwrap().clone()
    }
}

impl Summarizer for EchoSummarizer {
    fn summarize<'a>(&'a self, request: SummaryRequest<'a>) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.feedback
                .lock()
                .unwrap()
                .push(request.editor_feedback.map(str::to_string));
            if self.fail_for.as_deref() == Some(request.participant.name.as_str()) {
                return Err(ColloquyError::Summarization(format!(
                    "scripted failure for {}",
                    request.participant.name
                )));
            }
            Ok(format!(
                "## {}\n{}",
                request.participant.name,
                request.log.transcript()
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// Searcher
// ---------------------------------------------------------------------------

/// Answers every query with `result for <query>` and records queries.
#[derive(Default)]
pub struct CountingSearcher {
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
    fail: bool,
    fixed: Option<String>,
}

impl CountingSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every search errors.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Every search returns the same text.
    pub fn fixed(text: impl Into<String>) -> Self {
        Self {
            fixed: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every query received, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl Searcher for CountingSearcher {
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queries.lock().unwrap().push(query.to_string());
            if self.fail {
                return Err(ColloquyError::Search("search backend down".into()));
            }
            Ok(self
                .fixed
                .clone()
                .unwrap_or_else(|| format!("result for {}", query)))
        })
    }
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

/// Returns a fixed panel, or a revised panel once feedback arrives.
pub struct StaticParticipants {
    panel: Vec<Participant>,
    revised: Option<Vec<Participant>>,
    requests: Mutex<Vec<Option<String>>>,
}

impl StaticParticipants {
    pub fn new(panel: Vec<Participant>) -> Self {
        Self {
            panel,
            revised: None,
            requests: Mutex::new(vec![]),
        }
    }

    pub fn with_revision(mut self, revised: Vec<Participant>) -> Self {
        self.revised = Some(revised);
        self
    }

    /// Feedback passed to each call, in call order.
    pub fn requests(&self) -> Vec<Option<String>> {
        self.requests.lock().unwrap().clone()
    }
}

impl ParticipantGenerator for StaticParticipants {
    fn generate_participants<'a>(
        &'a self,
        request: ParticipantRequest<'a>,
    ) -> BoxFuture<'a, Result<Vec<Participant>>> {
        Box::pin(async move {
            self.requests
                .lock()
                .unwrap()
                .push(request.feedback.map(str::to_string));
            let panel = match (&self.revised, request.feedback) {
                (Some(revised), Some(_)) => revised.clone(),
                _ => self.panel.clone(),
            };
            Ok(panel.into_iter().take(request.max_participants).collect())
        })
    }
}

// ---------------------------------------------------------------------------
// Publishers
// ---------------------------------------------------------------------------

/// Keeps every published report.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<AggregateResult>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<AggregateResult> {
        self.published.lock().unwrap().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn name(&self) -> &str {
        "recording"
    }

    fn publish<'a>(&'a self, report: &'a AggregateResult) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.published.lock().unwrap().push(report.clone());
            Ok(())
        })
    }
}

/// Always fails to publish.
pub struct FailingPublisher;

impl Publisher for FailingPublisher {
    fn name(&self) -> &str {
        "failing"
    }

    fn publish<'a>(&'a self, _report: &'a AggregateResult) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            Err(ColloquyError::Publish {
                channel: "failing".into(),
                message: "webhook returned 500".into(),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// `n` participants named `P1`..`Pn`.
pub fn participants(n: usize) -> Vec<Participant> {
    (1..=n)
        .map(|i| {
            Participant::new(
                format!("P{}", i),
                format!("Analyst {}", i),
                format!("Focuses on theme {}", i),
            )
        })
        .collect()
}

pub fn test_model_config() -> ModelConfig {
    ModelConfig {
        provider: "openai".into(),
        model_id: "test-model".into(),
        api_key: None,
        base_url: None,
        max_tokens: 1024,
        temperature: 0.0,
        retry: None,
        extra_headers: HashMap::new(),
    }
}

/// A config with no pause points and no persistence.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::with_model(test_model_config());
    config.interrupts = InterruptConfig::none();
    config.checkpoint.enabled = false;
    config
}
