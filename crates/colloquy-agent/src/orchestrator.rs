use std::sync::Arc;

use tracing::{debug, info, warn};

use colloquy_core::config::{AppConfig, InterruptConfig};
use colloquy_core::error::{ColloquyError, Result};
use colloquy_core::event::EventBus;
use colloquy_core::traits::{
    CheckpointStore, Generator, ParticipantGenerator, ParticipantRequest, Publisher, Searcher,
    Summarizer,
};
use colloquy_core::types::{
    Checkpoint, Cursor, FanOutStatus, Participant, ResearchReport, Stage, ThreadId, WorkflowEvent,
    WorkflowState,
};

use crate::aggregate::Aggregator;
use crate::dispatch::{join_all, Dispatcher};
use crate::interview::BranchContext;

/// What a caller starts a research run with.
#[derive(Debug, Clone, Default)]
pub struct ResearchInput {
    pub topic: String,
    /// Overrides `research.max_participants`.
    pub max_participants: Option<usize>,
    /// Interview these participants instead of generating a panel.
    pub participants: Option<Vec<Participant>>,
    pub participant_feedback: Option<String>,
    pub editor_feedback: Option<String>,
}

impl ResearchInput {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_participants(mut self, participants: Vec<Participant>) -> Self {
        self.participants = Some(participants);
        self
    }

    pub fn with_max_participants(mut self, max: usize) -> Self {
        self.max_participants = Some(max);
        self
    }

    pub fn with_editor_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.editor_feedback = Some(feedback.into());
        self
    }
}

/// How to continue a paused thread.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeCommand {
    /// Proceed with the saved state as-is.
    Continue,
    /// Regenerate the panel using reviewer feedback.
    ReviseParticipants { feedback: String },
    /// Interview exactly these participants.
    ReplaceParticipants(Vec<Participant>),
    /// Pass editor feedback to every section summary.
    EditorFeedback(String),
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Stopped at a pause point; resume with this checkpoint or its thread id.
    Paused(Checkpoint),
    Completed(ResearchReport),
}

/// Wires collaborators into an [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: AppConfig,
    generator: Option<Arc<dyn Generator>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    participant_generator: Option<Arc<dyn ParticipantGenerator>>,
    searcher: Option<Arc<dyn Searcher>>,
    store: Option<Arc<dyn CheckpointStore>>,
    publishers: Vec<Arc<dyn Publisher>>,
    event_bus: Option<Arc<EventBus>>,
    interrupts: Option<InterruptConfig>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            generator: None,
            summarizer: None,
            participant_generator: None,
            searcher: None,
            store: None,
            publishers: vec![],
            event_bus: None,
            interrupts: None,
        }
    }

    /// Use one collaborator for generation, summaries, and the panel.
    pub fn with_researcher<R>(self, researcher: Arc<R>) -> Self
    where
        R: Generator + Summarizer + ParticipantGenerator,
    {
        self.with_generator(researcher.clone())
            .with_summarizer(researcher.clone())
            .with_participant_generator(researcher)
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_participant_generator(mut self, generator: Arc<dyn ParticipantGenerator>) -> Self {
        self.participant_generator = Some(generator);
        self
    }

    pub fn with_searcher(mut self, searcher: Arc<dyn Searcher>) -> Self {
        self.searcher = Some(searcher);
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Override the pause points from the config.
    pub fn with_interrupts(mut self, interrupts: InterruptConfig) -> Self {
        self.interrupts = Some(interrupts);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let generator = self
            .generator
            .ok_or_else(|| ColloquyError::Config("orchestrator needs a generator".into()))?;
        let summarizer = self
            .summarizer
            .ok_or_else(|| ColloquyError::Config("orchestrator needs a summarizer".into()))?;
        self.config.validate()?;

        let interrupts = self
            .interrupts
            .unwrap_or_else(|| self.config.interrupts.clone());
        Ok(Orchestrator {
            config: self.config,
            generator,
            summarizer,
            participant_generator: self.participant_generator,
            searcher: self.searcher,
            store: self.store,
            publishers: self.publishers,
            event_bus: self.event_bus.unwrap_or_default(),
            interrupts,
        })
    }
}

/// Runs the staged research workflow and pauses at configured boundaries.
///
/// Stages run in order: generate participants, conduct interviews,
/// aggregate, publish. State between stages lives in [`WorkflowState`]; the
/// position is a [`Cursor`]. Together they form a [`Checkpoint`].
pub struct Orchestrator {
    config: AppConfig,
    generator: Arc<dyn Generator>,
    summarizer: Arc<dyn Summarizer>,
    participant_generator: Option<Arc<dyn ParticipantGenerator>>,
    searcher: Option<Arc<dyn Searcher>>,
    store: Option<Arc<dyn CheckpointStore>>,
    publishers: Vec<Arc<dyn Publisher>>,
    event_bus: Arc<EventBus>,
    interrupts: InterruptConfig,
}

impl Orchestrator {
    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// Start a new run on `thread_id`.
    pub async fn start(&self, thread_id: ThreadId, input: ResearchInput) -> Result<RunOutcome> {
        let supplied = input.participants.is_some();
        let state = WorkflowState {
            topic: input.topic,
            max_participants: input
                .max_participants
                .unwrap_or(self.config.research.max_participants),
            participant_feedback: input.participant_feedback,
            editor_feedback: input.editor_feedback,
            participants: input.participants.unwrap_or_default(),
            participants_supplied: supplied,
            ..Default::default()
        };

        info!(thread_id = %thread_id, topic = %state.topic, "Research run started");
        self.drive(thread_id, state, Cursor::Before(Stage::GenerateParticipants), false)
            .await
    }

    /// Resume a thread from its stored checkpoint.
    pub async fn resume(&self, thread_id: &ThreadId, command: ResumeCommand) -> Result<RunOutcome> {
        let checkpoint = self
            .status(thread_id)
            .await?
            .ok_or_else(|| ColloquyError::CheckpointNotFound(thread_id.to_string()))?;
        self.resume_from(checkpoint, command).await
    }

    /// Resume from a checkpoint the caller kept.
    pub async fn resume_from(
        &self,
        checkpoint: Checkpoint,
        command: ResumeCommand,
    ) -> Result<RunOutcome> {
        let Checkpoint {
            thread_id,
            cursor,
            mut state,
            ..
        } = checkpoint;

        let cursor = apply_command(&mut state, cursor, command)?;
        info!(thread_id = %thread_id, cursor = %cursor, "Resuming research run");
        self.drive(thread_id, state, cursor, true).await
    }

    /// The latest checkpoint for a thread.
    pub async fn status(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| ColloquyError::Config("no checkpoint store configured".into()))?;
        store.load(thread_id).await
    }

    async fn drive(
        &self,
        thread_id: ThreadId,
        mut state: WorkflowState,
        mut cursor: Cursor,
        mut resumed: bool,
    ) -> Result<RunOutcome> {
        loop {
            match cursor {
                Cursor::Before(stage) => {
                    if !resumed && self.interrupts.before.contains(&stage) {
                        return self.pause(thread_id, cursor, state).await;
                    }
                    resumed = false;

                    self.event_bus.publish(WorkflowEvent::StageStarted {
                        thread_id: thread_id.clone(),
                        stage,
                    });
                    if let Err(e) = self.run_stage(stage, &mut state).await {
                        // Keep what the stage recorded so it can be retried
                        self.persist(&thread_id, cursor, &state).await;
                        return Err(e);
                    }
                    self.event_bus.publish(WorkflowEvent::StageCompleted {
                        thread_id: thread_id.clone(),
                        stage,
                    });

                    cursor = Cursor::After(stage);
                    self.persist(&thread_id, cursor, &state).await;
                }
                Cursor::After(stage) => {
                    if !resumed && self.interrupts.after.contains(&stage) {
                        return self.pause(thread_id, cursor, state).await;
                    }
                    resumed = false;
                    cursor = stage.next().map_or(Cursor::Done, Cursor::Before);
                }
                Cursor::Done => {
                    self.persist(&thread_id, cursor, &state).await;
                    return Ok(RunOutcome::Completed(finish(thread_id, state)));
                }
            }
        }
    }

    async fn run_stage(&self, stage: Stage, state: &mut WorkflowState) -> Result<()> {
        debug!(stage = %stage, "Running stage");
        match stage {
            Stage::GenerateParticipants => self.generate_participants(state).await,
            Stage::ConductInterviews => self.conduct_interviews(state).await,
            Stage::Aggregate => {
                let aggregator = Aggregator::new(self.generator.clone());
                let aggregate = aggregator
                    .aggregate(&state.topic, &state.results)
                    .await
                    .map_err(|e| stage_error(stage, e))?;
                state.aggregate = Some(aggregate);
                Ok(())
            }
            Stage::Publish => {
                self.publish(state).await;
                Ok(())
            }
        }
    }

    async fn generate_participants(&self, state: &mut WorkflowState) -> Result<()> {
        if state.participants_supplied {
            debug!(count = state.participants.len(), "Using supplied participants");
            return Ok(());
        }
        let generator = self.participant_generator.as_ref().ok_or_else(|| {
            stage_error(
                Stage::GenerateParticipants,
                "no participant generator configured and no participants supplied",
            )
        })?;

        let mut panel = generator
            .generate_participants(ParticipantRequest {
                topic: &state.topic,
                max_participants: state.max_participants,
                feedback: state.participant_feedback.as_deref(),
            })
            .await
            .map_err(|e| stage_error(Stage::GenerateParticipants, e))?;
        panel.truncate(state.max_participants);

        info!(
            count = panel.len(),
            names = %panel.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", "),
            "Participants generated"
        );
        state.participants = panel;
        Ok(())
    }

    async fn conduct_interviews(&self, state: &mut WorkflowState) -> Result<()> {
        let ctx = BranchContext::new(
            state.topic.clone(),
            self.generator.clone(),
            self.summarizer.clone(),
        )
        .with_config(&self.config)?
        .with_searcher(self.searcher.clone())
        .with_editor_feedback(state.editor_feedback.clone())
        .with_event_bus(self.event_bus.clone());

        let dispatcher =
            Dispatcher::new(Arc::new(ctx)).with_max_concurrency(self.config.research.max_concurrency);
        let handles = dispatcher.dispatch(state.participants.clone());
        let (results, failures) = join_all(handles).await;

        info!(
            completed = results.len(),
            failed = failures.len(),
            "Interviews finished"
        );
        state.results = results;
        state.failures = failures;
        state.aggregate = None;
        state.published = false;

        if !state.participants.is_empty() && state.results.is_empty() {
            return Err(ColloquyError::TotalFanOutFailure {
                failed: state.failures.iter().map(|f| f.participant.clone()).collect(),
            });
        }
        Ok(())
    }

    async fn publish(&self, state: &mut WorkflowState) {
        let Some(aggregate) = state.aggregate.as_ref() else {
            return;
        };
        if aggregate.is_empty() || self.publishers.is_empty() {
            debug!("Nothing to publish");
            return;
        }

        let mut all_ok = true;
        for publisher in &self.publishers {
            match publisher.publish(aggregate).await {
                Ok(()) => {
                    info!(channel = publisher.name(), "Report published");
                    self.event_bus.publish(WorkflowEvent::Published {
                        channel: publisher.name().to_string(),
                    });
                }
                Err(e) => {
                    all_ok = false;
                    warn!(channel = publisher.name(), error = %e, "Publish failed");
                    self.event_bus.publish(WorkflowEvent::PublishFailed {
                        channel: publisher.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        state.published = all_ok;
    }

    async fn pause(
        &self,
        thread_id: ThreadId,
        cursor: Cursor,
        state: WorkflowState,
    ) -> Result<RunOutcome> {
        let checkpoint = Checkpoint::new(thread_id, cursor, state);
        if let Some(store) = &self.store {
            store.save(&checkpoint).await?;
        }
        info!(thread_id = %checkpoint.thread_id, cursor = %cursor, "Research run paused");
        self.event_bus.publish(WorkflowEvent::Paused {
            thread_id: checkpoint.thread_id.clone(),
            cursor,
        });
        Ok(RunOutcome::Paused(checkpoint))
    }

    /// Save a stage-boundary checkpoint. Failures are logged, not fatal.
    async fn persist(&self, thread_id: &ThreadId, cursor: Cursor, state: &WorkflowState) {
        if !self.config.checkpoint.enabled {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        let checkpoint = Checkpoint::new(thread_id.clone(), cursor, state.clone());
        if let Err(e) = store.save(&checkpoint).await {
            warn!(thread_id = %thread_id, cursor = %cursor, error = %e, "Failed to save checkpoint");
        }
    }
}

fn stage_error(stage: Stage, error: impl std::fmt::Display) -> ColloquyError {
    ColloquyError::Stage {
        stage: stage.to_string(),
        message: error.to_string(),
    }
}

/// Whether the interviews have not yet run at `cursor`.
fn before_interviews(cursor: Cursor) -> bool {
    matches!(
        cursor,
        Cursor::Before(Stage::GenerateParticipants)
            | Cursor::After(Stage::GenerateParticipants)
            | Cursor::Before(Stage::ConductInterviews)
    )
}

/// Apply a resume command to saved state and return the cursor to continue from.
fn apply_command(state: &mut WorkflowState, cursor: Cursor, command: ResumeCommand) -> Result<Cursor> {
    if cursor == Cursor::Done {
        return Err(ColloquyError::InvalidResume("thread already completed".into()));
    }

    match command {
        ResumeCommand::Continue => Ok(cursor),
        ResumeCommand::ReviseParticipants { feedback } => {
            if !before_interviews(cursor) {
                return Err(ColloquyError::InvalidResume(format!(
                    "cannot revise participants {}",
                    cursor
                )));
            }
            state.participant_feedback = Some(feedback);
            state.participants_supplied = false;
            Ok(Cursor::Before(Stage::GenerateParticipants))
        }
        ResumeCommand::ReplaceParticipants(participants) => {
            if !before_interviews(cursor) {
                return Err(ColloquyError::InvalidResume(format!(
                    "cannot replace participants {}",
                    cursor
                )));
            }
            state.participants = participants;
            state.participants_supplied = true;
            Ok(cursor)
        }
        ResumeCommand::EditorFeedback(feedback) => {
            if !before_interviews(cursor) {
                return Err(ColloquyError::InvalidResume(format!(
                    "editor feedback must be given before interviews run, thread is {}",
                    cursor
                )));
            }
            state.editor_feedback = Some(feedback);
            Ok(cursor)
        }
    }
}

fn finish(thread_id: ThreadId, state: WorkflowState) -> ResearchReport {
    let status = if state.participants.is_empty() {
        FanOutStatus::Empty
    } else if state.failures.is_empty() {
        FanOutStatus::Complete
    } else {
        FanOutStatus::Partial {
            failed: state.failures.iter().map(|f| f.participant.clone()).collect(),
        }
    };
    info!(thread_id = %thread_id, ?status, published = state.published, "Research run completed");

    ResearchReport {
        thread_id,
        aggregate: state.aggregate.unwrap_or_default(),
        status,
        failures: state.failures,
        published: state.published,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_test_utils::{participants, test_config, EchoSummarizer, ScriptedGenerator};

    fn state_with(n: usize) -> WorkflowState {
        WorkflowState {
            topic: "t".into(),
            max_participants: 3,
            participants: participants(n),
            ..Default::default()
        }
    }

    #[test]
    fn test_revise_restarts_generation() {
        let mut state = state_with(2);
        state.participants_supplied = true;
        let cursor = apply_command(
            &mut state,
            Cursor::After(Stage::GenerateParticipants),
            ResumeCommand::ReviseParticipants {
                feedback: "add a skeptic".into(),
            },
        )
        .unwrap();
        assert_eq!(cursor, Cursor::Before(Stage::GenerateParticipants));
        assert_eq!(state.participant_feedback.as_deref(), Some("add a skeptic"));
        assert!(!state.participants_supplied);
    }

    #[test]
    fn test_replace_keeps_cursor() {
        let mut state = state_with(3);
        let cursor = apply_command(
            &mut state,
            Cursor::After(Stage::GenerateParticipants),
            ResumeCommand::ReplaceParticipants(participants(1)),
        )
        .unwrap();
        assert_eq!(cursor, Cursor::After(Stage::GenerateParticipants));
        assert_eq!(state.participants.len(), 1);
        assert!(state.participants_supplied);
    }

    #[test]
    fn test_late_commands_are_rejected() {
        let mut state = state_with(1);
        let err = apply_command(
            &mut state,
            Cursor::Before(Stage::Publish),
            ResumeCommand::EditorFeedback("shorter".into()),
        )
        .unwrap_err();
        assert!(matches!(err, ColloquyError::InvalidResume(_)));

        let err = apply_command(&mut state, Cursor::Done, ResumeCommand::Continue).unwrap_err();
        assert!(matches!(err, ColloquyError::InvalidResume(_)));
    }

    #[test]
    fn test_finish_status() {
        let report = finish(ThreadId::from_str("t"), state_with(0));
        assert_eq!(report.status, FanOutStatus::Empty);
        assert_eq!(report.aggregate.document(), "");

        let report = finish(ThreadId::from_str("t"), state_with(2));
        assert_eq!(report.status, FanOutStatus::Complete);
    }

    #[test]
    fn test_build_requires_collaborators() {
        assert!(OrchestratorBuilder::new(test_config()).build().is_err());

        let built = OrchestratorBuilder::new(test_config())
            .with_generator(Arc::new(ScriptedGenerator::new()))
            .with_summarizer(Arc::new(EchoSummarizer::new()))
            .build();
        assert!(built.is_ok());
    }

    #[tokio::test]
    async fn test_status_needs_store() {
        let orchestrator = OrchestratorBuilder::new(test_config())
            .with_generator(Arc::new(ScriptedGenerator::new()))
            .with_summarizer(Arc::new(EchoSummarizer::new()))
            .build()
            .unwrap();
        let err = orchestrator.status(&ThreadId::from_str("x")).await.unwrap_err();
        assert!(matches!(err, ColloquyError::Config(_)));
    }
}
