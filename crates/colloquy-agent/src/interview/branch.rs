use std::sync::Arc;

use tracing::{debug, info, warn};

use colloquy_core::config::{AppConfig, InterviewConfig, ResearchConfig};
use colloquy_core::event::EventBus;
use colloquy_core::traits::{GenerationTask, Generator, Searcher, Summarizer, SummaryRequest};
use colloquy_core::types::{
    BranchFailure, BranchResult, BranchStage, ConversationLog, Participant, Speaker, WorkflowEvent,
};

use super::state::{transition, BranchEvent, BranchState};
use crate::tracker::{TurnTracker, Verdict};

/// A branch ends with exactly one of these.
pub type BranchOutcome = std::result::Result<BranchResult, BranchFailure>;

/// Everything a branch reads and nothing it writes.
///
/// One context is shared by every branch of a fan-out.
pub struct BranchContext {
    pub topic: String,
    /// Kickoff message handed to the first question.
    pub opening: String,
    pub editor_feedback: Option<String>,
    pub tracker: TurnTracker,
    pub reflect: bool,
    pub ground_answers: bool,
    pub generator: Arc<dyn Generator>,
    pub summarizer: Arc<dyn Summarizer>,
    pub searcher: Option<Arc<dyn Searcher>>,
    pub event_bus: Arc<EventBus>,
}

impl BranchContext {
    pub fn new(
        topic: impl Into<String>,
        generator: Arc<dyn Generator>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        let topic = topic.into();
        let research = ResearchConfig::default();
        let interview = InterviewConfig::default();
        Self {
            opening: research.opening_for(&topic),
            topic,
            editor_feedback: None,
            tracker: TurnTracker::default(),
            reflect: interview.reflect,
            ground_answers: interview.ground_answers,
            generator,
            summarizer,
            searcher: None,
            event_bus: Arc::new(EventBus::default()),
        }
    }

    /// Apply the interview and research sections of `config`.
    pub fn with_config(mut self, config: &AppConfig) -> colloquy_core::Result<Self> {
        self.opening = config.research.opening_for(&self.topic);
        self.tracker = TurnTracker::from_config(&config.interview)?;
        self.reflect = config.interview.reflect;
        self.ground_answers = config.interview.ground_answers;
        Ok(self)
    }

    pub fn with_tracker(mut self, tracker: TurnTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_searcher(mut self, searcher: Option<Arc<dyn Searcher>>) -> Self {
        self.searcher = searcher;
        self
    }

    pub fn with_editor_feedback(mut self, feedback: Option<String>) -> Self {
        self.editor_feedback = feedback;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    pub fn with_reflect(mut self, reflect: bool) -> Self {
        self.reflect = reflect;
        self
    }

    pub fn with_grounded_answers(mut self, ground: bool) -> Self {
        self.ground_answers = ground;
        self
    }
}

/// Insertion-ordered set of source documents.
#[derive(Debug, Default, Clone)]
pub struct SourceSet {
    items: Vec<String>,
}

impl SourceSet {
    /// Add `source` unless an identical entry exists. Returns whether it was added.
    pub fn insert(&mut self, source: String) -> bool {
        if self.items.contains(&source) {
            return false;
        }
        self.items.push(source);
        true
    }

    pub fn as_slice(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One participant's interview, run to completion or failure.
pub struct BranchWorkflow {
    ctx: Arc<BranchContext>,
    index: usize,
    participant: Participant,
    log: ConversationLog,
    sources: SourceSet,
}

impl BranchWorkflow {
    pub fn new(ctx: Arc<BranchContext>, index: usize, participant: Participant) -> Self {
        Self {
            ctx,
            index,
            participant,
            log: ConversationLog::new(),
            sources: SourceSet::default(),
        }
    }

    pub async fn run(mut self) -> BranchOutcome {
        info!(index = self.index, participant = %self.participant.name, "Interview started");
        self.ctx.event_bus.publish(WorkflowEvent::BranchStarted {
            index: self.index,
            participant: self.participant.name.clone(),
        });

        let mut state = BranchState::Ask;
        let mut section = None;
        let mut last_stage = BranchStage::Ask;
        let mut fault = None;

        while !state.is_terminal() {
            if let Some(stage) = state.stage() {
                last_stage = stage;
            }
            let step = match state {
                BranchState::Ask => self.ask().await.map(|_| BranchEvent::Asked),
                BranchState::Answer => self.answer().await.map(BranchEvent::Answered),
                BranchState::Reflect => {
                    self.reflect().await;
                    Ok(BranchEvent::Reflected)
                }
                BranchState::Finish => self.finish().await.map(|text| {
                    section = Some(text);
                    BranchEvent::Summarized
                }),
                BranchState::Completed | BranchState::Failed => break,
            };

            state = match step {
                Ok(event) => transition(state, event),
                Err(e) => {
                    fault = Some(e.to_string());
                    transition(state, BranchEvent::Faulted)
                }
            };
        }

        match (state, section) {
            (BranchState::Completed, Some(text)) => Ok(self.complete(text)),
            _ => {
                let error = fault.unwrap_or_else(|| "invalid branch transition".to_string());
                Err(self.fail(last_stage, error))
            }
        }
    }

    async fn ask(&mut self) -> colloquy_core::Result<()> {
        let question = self
            .ctx
            .generator
            .generate(GenerationTask::Question {
                topic: &self.ctx.topic,
                opening: &self.ctx.opening,
                participant: &self.participant,
                log: &self.log,
            })
            .await?;
        self.append(Speaker::Asker, question);
        Ok(())
    }

    async fn answer(&mut self) -> colloquy_core::Result<Verdict> {
        if self.ctx.ground_answers {
            self.search_conversation().await;
        }

        let answer = self
            .ctx
            .generator
            .generate(GenerationTask::Answer {
                topic: &self.ctx.topic,
                participant: &self.participant,
                log: &self.log,
                sources: self.sources.as_slice(),
            })
            .await?;
        self.append(Speaker::Responder, answer);

        let verdict = self.ctx.tracker.evaluate(&self.log);
        debug!(
            participant = %self.participant.name,
            turn = self.log.responder_turns(),
            ?verdict,
            "Turn evaluated"
        );
        Ok(verdict)
    }

    async fn reflect(&mut self) {
        if self.ctx.reflect {
            self.search_conversation().await;
        }
    }

    async fn finish(&self) -> colloquy_core::Result<String> {
        self.ctx
            .summarizer
            .summarize(SummaryRequest {
                topic: &self.ctx.topic,
                participant: &self.participant,
                log: &self.log,
                sources: self.sources.as_slice(),
                editor_feedback: self.ctx.editor_feedback.as_deref(),
            })
            .await
    }

    /// Rewrite the conversation into a query and search for it. A failed
    /// rewrite falls back to the raw question; a failed search is skipped.
    async fn search_conversation(&mut self) {
        let Some(searcher) = self.ctx.searcher.as_ref() else {
            return;
        };
        let Some(question) = self.log.last_asker().map(|t| t.content.clone()) else {
            return;
        };

        let query = match self
            .ctx
            .generator
            .generate(GenerationTask::SearchQuery {
                topic: &self.ctx.topic,
                participant: &self.participant,
                log: &self.log,
            })
            .await
        {
            Ok(query) => query,
            Err(e) => {
                warn!(participant = %self.participant.name, error = %e, "Query rewrite failed, searching with the question");
                question
            }
        };

        debug!(participant = %self.participant.name, query = %query, "Searching");
        match searcher.search(&query).await {
            Ok(result) => {
                if self.sources.insert(result) {
                    debug!(participant = %self.participant.name, sources = self.sources.len(), "Source added");
                }
            }
            Err(e) => {
                warn!(participant = %self.participant.name, error = %e, "Search failed, continuing without it");
            }
        }
    }

    fn append(&mut self, speaker: Speaker, content: String) {
        match speaker {
            Speaker::Asker => self.log.push_asker(content),
            Speaker::Responder => self.log.push_responder(content),
        }
        self.ctx.event_bus.publish(WorkflowEvent::TurnAppended {
            participant: self.participant.name.clone(),
            speaker,
            turn: self.log.len(),
        });
    }

    fn complete(self, text: String) -> BranchResult {
        let responder_turns = self.log.responder_turns();
        info!(
            index = self.index,
            participant = %self.participant.name,
            responder_turns,
            "Interview completed"
        );
        self.ctx.event_bus.publish(WorkflowEvent::BranchCompleted {
            index: self.index,
            participant: self.participant.name.clone(),
            responder_turns,
        });
        BranchResult {
            participant: self.participant.name,
            text,
            transcript: self.log.transcript(),
            responder_turns,
        }
    }

    fn fail(&self, stage: BranchStage, error: String) -> BranchFailure {
        warn!(
            index = self.index,
            participant = %self.participant.name,
            ?stage,
            error = %error,
            "Interview failed"
        );
        self.ctx.event_bus.publish(WorkflowEvent::BranchFailed {
            index: self.index,
            participant: self.participant.name.clone(),
            error: error.clone(),
        });
        BranchFailure {
            index: self.index,
            participant: self.participant.name.clone(),
            stage,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::error::ColloquyError;
    use colloquy_test_utils::{
        participants, test_config, CountingSearcher, EchoSummarizer, FailingGenerator,
        ScriptedGenerator, THANKS,
    };
    use futures::future::BoxFuture;

    /// Scripted replies, except that query rewriting always fails.
    struct NoQueryRewrite(ScriptedGenerator);

    impl Generator for NoQueryRewrite {
        fn generate<'a>(
            &'a self,
            task: GenerationTask<'a>,
        ) -> BoxFuture<'a, colloquy_core::Result<String>> {
            Box::pin(async move {
                match task {
                    GenerationTask::SearchQuery { .. } => {
                        Err(ColloquyError::Generation("no query today".into()))
                    }
                    _ => self.0.generate(task).await,
                }
            })
        }
    }

    fn ctx(generator: Arc<dyn Generator>, max_turns: usize) -> BranchContext {
        BranchContext::new("open models", generator, Arc::new(EchoSummarizer::new()))
            .with_tracker(TurnTracker::new(max_turns, "Thank you so much for your help").unwrap())
    }

    async fn run_one(ctx: BranchContext) -> BranchOutcome {
        let p = participants(1).remove(0);
        BranchWorkflow::new(Arc::new(ctx), 0, p).run().await
    }

    #[tokio::test]
    async fn test_single_turn_interview_has_two_turns() {
        let result = run_one(ctx(Arc::new(ScriptedGenerator::new()), 1))
            .await
            .unwrap();
        assert_eq!(result.responder_turns, 1);
        assert_eq!(
            result.transcript,
            "Asker: [P1] Q1 about open models?\nResponder: [P1] A1"
        );
        assert!(result.text.starts_with("## P1\n"));
    }

    #[tokio::test]
    async fn test_respects_turn_cap() {
        let result = run_one(ctx(Arc::new(ScriptedGenerator::new()), 3))
            .await
            .unwrap();
        assert_eq!(result.responder_turns, 3);
        assert_eq!(result.transcript.lines().count(), 6);
    }

    #[tokio::test]
    async fn test_phrase_ends_interview_early() {
        let generator = Arc::new(ScriptedGenerator::new().finishing_after(1));
        let result = run_one(ctx(generator, 5)).await.unwrap();
        assert_eq!(result.responder_turns, 2);
        assert!(result.transcript.contains(THANKS));
    }

    #[tokio::test]
    async fn test_generation_error_fails_branch() {
        let failure = run_one(ctx(Arc::new(FailingGenerator::new("P1")), 2))
            .await
            .unwrap_err();
        assert_eq!(failure.stage, BranchStage::Ask);
        assert_eq!(failure.participant, "P1");
        assert!(failure.error.contains("scripted failure"));
    }

    #[tokio::test]
    async fn test_summary_error_fails_at_finish() {
        let ctx = BranchContext::new(
            "t",
            Arc::new(ScriptedGenerator::new()),
            Arc::new(EchoSummarizer::new().failing_for("P1")),
        )
        .with_tracker(TurnTracker::new(1, "Thank you so much for your help").unwrap());
        let failure = run_one(ctx).await.unwrap_err();
        assert_eq!(failure.stage, BranchStage::Finish);
    }

    #[tokio::test]
    async fn test_reflect_adds_source_without_turn() {
        let searcher = Arc::new(CountingSearcher::new());
        let ctx = ctx(Arc::new(ScriptedGenerator::new()), 1)
            .with_grounded_answers(false)
            .with_searcher(Some(searcher.clone() as Arc<dyn Searcher>));
        let result = run_one(ctx).await.unwrap();
        assert_eq!(searcher.calls(), 1);
        assert_eq!(searcher.queries(), vec!["P1 query 1".to_string()]);
        assert_eq!(result.responder_turns, 1);
        assert!(result.text.contains("Responder: [P1] A1"));
    }

    #[tokio::test]
    async fn test_answers_are_grounded_on_rewritten_queries_by_default() {
        let generator = Arc::new(ScriptedGenerator::new());
        let searcher = Arc::new(CountingSearcher::new());
        let ctx = ctx(generator.clone(), 2)
            .with_searcher(Some(searcher.clone() as Arc<dyn Searcher>));
        assert!(ctx.ground_answers);

        run_one(ctx).await.unwrap();
        assert_eq!(
            searcher.queries(),
            vec!["P1 query 1", "P1 query 2", "P1 query 2"]
        );
        assert_eq!(
            generator.sources_seen("P1"),
            vec![
                "result for P1 query 1".to_string(),
                "result for P1 query 2".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_rewrite_searches_with_question() {
        let searcher = Arc::new(CountingSearcher::new());
        let ctx = ctx(Arc::new(NoQueryRewrite(ScriptedGenerator::new())), 1)
            .with_reflect(false)
            .with_searcher(Some(searcher.clone() as Arc<dyn Searcher>));
        let result = run_one(ctx).await.unwrap();
        assert_eq!(result.responder_turns, 1);
        assert_eq!(searcher.queries(), vec!["[P1] Q1 about open models?"]);
    }

    #[test]
    fn test_zero_turn_config_is_rejected() {
        let mut config = test_config();
        config.interview.max_turns = 0;
        let ctx = BranchContext::new(
            "t",
            Arc::new(ScriptedGenerator::new()),
            Arc::new(EchoSummarizer::new()),
        )
        .with_config(&config);
        assert!(ctx.is_err());
    }

    #[tokio::test]
    async fn test_search_failure_is_not_fatal() {
        let ctx = ctx(Arc::new(ScriptedGenerator::new()), 2)
            .with_grounded_answers(true)
            .with_searcher(Some(Arc::new(CountingSearcher::failing()) as Arc<dyn Searcher>));
        let result = run_one(ctx).await.unwrap();
        assert_eq!(result.responder_turns, 2);
    }

    #[tokio::test]
    async fn test_grounding_dedupes_sources() {
        let generator = Arc::new(ScriptedGenerator::new());
        let searcher = Arc::new(CountingSearcher::fixed("same doc"));
        let ctx = ctx(generator.clone(), 3)
            .with_grounded_answers(true)
            .with_searcher(Some(searcher.clone() as Arc<dyn Searcher>));
        run_one(ctx).await.unwrap();
        // three grounding searches plus one reflection
        assert_eq!(searcher.calls(), 4);
        assert_eq!(generator.sources_seen("P1"), vec!["same doc".to_string()]);
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let ctx = ctx(Arc::new(ScriptedGenerator::new()), 1).with_event_bus(bus);
        run_one(ctx).await.unwrap();

        let mut turns = 0;
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                WorkflowEvent::TurnAppended { .. } => turns += 1,
                WorkflowEvent::BranchCompleted { responder_turns, .. } => {
                    completed = true;
                    assert_eq!(responder_turns, 1);
                }
                _ => {}
            }
        }
        assert_eq!(turns, 2);
        assert!(completed);
    }

    #[test]
    fn test_source_set_keeps_order() {
        let mut set = SourceSet::default();
        assert!(set.insert("b".into()));
        assert!(set.insert("a".into()));
        assert!(!set.insert("b".into()));
        assert_eq!(set.as_slice(), &["b".to_string(), "a".to_string()]);
    }
}
