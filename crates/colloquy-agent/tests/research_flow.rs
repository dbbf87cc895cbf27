use std::sync::Arc;

use colloquy_agent::{OrchestratorBuilder, ResearchInput, ResumeCommand, RunOutcome};
use colloquy_core::config::InterruptConfig;
use colloquy_core::error::ColloquyError;
use colloquy_core::traits::{CheckpointStore, Generator};
use colloquy_core::types::{
    BranchStage, Cursor, FanOutStatus, Participant, ResearchReport, Stage, ThreadId, WorkflowEvent,
};
use colloquy_memory::{MemoryCheckpointStore, SqliteCheckpointStore};
use colloquy_test_utils::{
    participants, test_config, CountingSearcher, EchoSummarizer, FailingGenerator,
    FailingPublisher, RecordingPublisher, ScriptedGenerator, StaticParticipants,
};

fn single_turn_config() -> colloquy_core::AppConfig {
    let mut config = test_config();
    config.interview.max_turns = 1;
    config.interview.reflect = false;
    config
}

fn completed(outcome: RunOutcome) -> ResearchReport {
    match outcome {
        RunOutcome::Completed(report) => report,
        RunOutcome::Paused(cp) => panic!("expected completion, paused at {}", cp.cursor),
    }
}

#[tokio::test]
async fn three_participants_single_turn() {
    let publisher = Arc::new(RecordingPublisher::new());
    let orchestrator = OrchestratorBuilder::new(single_turn_config())
        .with_generator(Arc::new(ScriptedGenerator::new()))
        .with_summarizer(Arc::new(EchoSummarizer::new()))
        .with_publisher(publisher.clone())
        .build()
        .unwrap();

    let input = ResearchInput::new("open models").with_participants(participants(3));
    let report = completed(orchestrator.start(ThreadId::new(), input).await.unwrap());

    assert_eq!(report.status, FanOutStatus::Complete);
    assert_eq!(report.aggregate.sections.len(), 3);
    assert_eq!(report.aggregate.header, "# Report on open models");
    for (i, section) in report.aggregate.sections.iter().enumerate() {
        let name = format!("P{}", i + 1);
        assert_eq!(
            *section,
            format!(
                "## {n}\nAsker: [{n}] Q1 about open models?\nResponder: [{n}] A1",
                n = name
            )
        );
    }
    assert_eq!(
        report.aggregate.body,
        report.aggregate.sections.join("\n\n")
    );
    assert!(report.published);
    assert_eq!(publisher.published().len(), 1);
}

#[tokio::test]
async fn one_failing_branch_is_partial() {
    let orchestrator = OrchestratorBuilder::new(single_turn_config())
        .with_generator(Arc::new(FailingGenerator::new("P2")))
        .with_summarizer(Arc::new(EchoSummarizer::new()))
        .build()
        .unwrap();

    let input = ResearchInput::new("open models").with_participants(participants(3));
    let report = completed(orchestrator.start(ThreadId::new(), input).await.unwrap());

    assert_eq!(
        report.status,
        FanOutStatus::Partial {
            failed: vec!["P2".into()]
        }
    );
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, BranchStage::Ask);
    assert_eq!(report.aggregate.sections.len(), 2);
    assert!(report.aggregate.sections[0].starts_with("## P1"));
    assert!(report.aggregate.sections[1].starts_with("## P3"));
    assert!(!report.aggregate.body.contains("[P2]"));
}

#[tokio::test]
async fn all_branches_failing_is_an_error() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let mut config = single_turn_config();
    config.checkpoint.enabled = true;
    let orchestrator = OrchestratorBuilder::new(config)
        .with_generator(Arc::new(FailingGenerator::new("P1")))
        .with_summarizer(Arc::new(EchoSummarizer::new()))
        .with_checkpoint_store(store.clone())
        .build()
        .unwrap();

    let thread = ThreadId::from_str("doomed");
    let input = ResearchInput::new("t").with_participants(participants(1));
    let err = orchestrator.start(thread.clone(), input).await.unwrap_err();
    match err {
        ColloquyError::TotalFanOutFailure { failed } => assert_eq!(failed, vec!["P1"]),
        other => panic!("unexpected error: {}", other),
    }

    // The failed stage stays retryable
    let saved = store.load(&thread).await.unwrap().unwrap();
    assert_eq!(saved.cursor, Cursor::Before(Stage::ConductInterviews));
    assert_eq!(saved.state.failures.len(), 1);
    assert!(saved.state.aggregate.is_none());
}

#[tokio::test]
async fn no_participants_gives_empty_report() {
    let generator = Arc::new(ScriptedGenerator::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let orchestrator = OrchestratorBuilder::new(single_turn_config())
        .with_generator(generator.clone())
        .with_summarizer(Arc::new(EchoSummarizer::new()))
        .with_publisher(publisher.clone())
        .build()
        .unwrap();

    let input = ResearchInput::new("t").with_participants(vec![]);
    let report = completed(orchestrator.start(ThreadId::new(), input).await.unwrap());

    assert_eq!(report.status, FanOutStatus::Empty);
    assert_eq!(report.aggregate.header, "");
    assert!(report.aggregate.sections.is_empty());
    assert_eq!(report.aggregate.body, "");
    assert_eq!(generator.calls(), 0);
    assert!(publisher.published().is_empty());
    assert!(!report.published);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn branches_never_see_each_other() {
    let mut config = test_config();
    config.interview.max_turns = 3;
    let generator = ScriptedGenerator::new().with_delay(std::time::Duration::from_millis(3));
    let orchestrator = OrchestratorBuilder::new(config)
        .with_generator(Arc::new(generator))
        .with_summarizer(Arc::new(EchoSummarizer::new()))
        .build()
        .unwrap();

    let input = ResearchInput::new("t").with_participants(participants(6));
    let report = completed(orchestrator.start(ThreadId::new(), input).await.unwrap());

    assert_eq!(report.aggregate.sections.len(), 6);
    for (i, section) in report.aggregate.sections.iter().enumerate() {
        let own = format!("[P{}]", i + 1);
        for line in section.lines().skip(1) {
            assert!(line.contains(&own), "foreign turn in section {}: {}", i + 1, line);
        }
        assert_eq!(section.lines().count(), 1 + 6);
    }
}

#[tokio::test]
async fn publish_failure_keeps_aggregate() {
    let orchestrator = OrchestratorBuilder::new(single_turn_config())
        .with_generator(Arc::new(ScriptedGenerator::new()))
        .with_summarizer(Arc::new(EchoSummarizer::new()))
        .with_publisher(Arc::new(FailingPublisher))
        .build()
        .unwrap();

    let bus = orchestrator.event_bus();
    let mut rx = bus.subscribe();
    let input = ResearchInput::new("t").with_participants(participants(2));
    let report = completed(orchestrator.start(ThreadId::new(), input).await.unwrap());

    assert!(!report.published);
    assert_eq!(report.aggregate.sections.len(), 2);

    let mut saw_failure = false;
    while let Ok(event) = rx.try_recv() {
        if let WorkflowEvent::PublishFailed { channel, .. } = event {
            assert_eq!(channel, "failing");
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn pauses_and_resumes_with_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteCheckpointStore::open(&dir.path().join("colloquy.db")).unwrap());
    let panel = StaticParticipants::new(participants(3)).with_revision(vec![
        Participant::new("Skeptic", "Reviewer", "Doubts the benchmarks"),
    ]);
    let panel = Arc::new(panel);

    let mut config = single_turn_config();
    config.checkpoint.enabled = true;
    config.interrupts = InterruptConfig::default();
    let summarizer = Arc::new(EchoSummarizer::new());
    let publisher = Arc::new(RecordingPublisher::new());

    let orchestrator = OrchestratorBuilder::new(config)
        .with_generator(Arc::new(ScriptedGenerator::new()))
        .with_summarizer(summarizer.clone())
        .with_participant_generator(panel.clone())
        .with_checkpoint_store(store.clone())
        .with_publisher(publisher.clone())
        .build()
        .unwrap();

    let thread = ThreadId::from_str("thread-1");

    // Pause after the panel is generated
    let outcome = orchestrator
        .start(thread.clone(), ResearchInput::new("agents"))
        .await
        .unwrap();
    let RunOutcome::Paused(cp) = outcome else {
        panic!("expected a pause");
    };
    assert_eq!(cp.cursor, Cursor::After(Stage::GenerateParticipants));
    assert_eq!(cp.state.participants.len(), 3);

    // Reviewer feedback regenerates the panel and pauses again
    let outcome = orchestrator
        .resume(
            &thread,
            ResumeCommand::ReviseParticipants {
                feedback: "add a skeptic".into(),
            },
        )
        .await
        .unwrap();
    let RunOutcome::Paused(cp) = outcome else {
        panic!("expected a second pause");
    };
    assert_eq!(cp.cursor, Cursor::After(Stage::GenerateParticipants));
    assert_eq!(cp.state.participants[0].name, "Skeptic");
    assert_eq!(panel.requests(), vec![None, Some("add a skeptic".to_string())]);

    // Editor feedback, then run interviews until the publish gate
    let outcome = orchestrator
        .resume(&thread, ResumeCommand::EditorFeedback("Keep it short".into()))
        .await
        .unwrap();
    let RunOutcome::Paused(cp) = outcome else {
        panic!("expected the publish gate");
    };
    assert_eq!(cp.cursor, Cursor::Before(Stage::Publish));
    assert!(cp.state.aggregate.is_some());
    assert!(publisher.published().is_empty());
    assert_eq!(summarizer.feedback_seen(), vec![Some("Keep it short".to_string())]);

    // Approve publishing
    let report = completed(
        orchestrator
            .resume(&thread, ResumeCommand::Continue)
            .await
            .unwrap(),
    );
    assert!(report.published);
    assert_eq!(report.aggregate.sections.len(), 1);
    assert_eq!(publisher.published().len(), 1);

    // The finished thread stays inspectable but cannot be resumed
    let status = orchestrator.status(&thread).await.unwrap().unwrap();
    assert_eq!(status.cursor, Cursor::Done);
    let err = orchestrator
        .resume(&thread, ResumeCommand::Continue)
        .await
        .unwrap_err();
    assert!(matches!(err, ColloquyError::InvalidResume(_)));
}

#[tokio::test]
async fn resume_from_caller_held_checkpoint() {
    let mut config = single_turn_config();
    config.interrupts = InterruptConfig {
        before: vec![Stage::Aggregate],
        after: vec![],
    };
    let orchestrator = OrchestratorBuilder::new(config)
        .with_generator(Arc::new(ScriptedGenerator::new()))
        .with_summarizer(Arc::new(EchoSummarizer::new()))
        .build()
        .unwrap();

    let input = ResearchInput::new("t").with_participants(participants(2));
    let RunOutcome::Paused(cp) = orchestrator.start(ThreadId::new(), input).await.unwrap() else {
        panic!("expected a pause before aggregation");
    };
    assert_eq!(cp.state.results.len(), 2);
    assert!(cp.state.aggregate.is_none());

    let report = completed(
        orchestrator
            .resume_from(cp, ResumeCommand::Continue)
            .await
            .unwrap(),
    );
    assert_eq!(report.aggregate.sections.len(), 2);
    assert_eq!(report.status, FanOutStatus::Complete);
}

#[tokio::test]
async fn reflection_searches_once_per_branch() {
    let mut config = test_config();
    config.interview.max_turns = 2;
    config.interview.ground_answers = false;
    let searcher = Arc::new(CountingSearcher::new());
    let generator: Arc<dyn Generator> = Arc::new(ScriptedGenerator::new());
    let orchestrator = OrchestratorBuilder::new(config)
        .with_generator(generator)
        .with_summarizer(Arc::new(EchoSummarizer::new()))
        .with_searcher(searcher.clone())
        .build()
        .unwrap();

    let input = ResearchInput::new("t").with_participants(participants(3));
    let report = completed(orchestrator.start(ThreadId::new(), input).await.unwrap());
    assert_eq!(searcher.calls(), 3);
    assert!(report
        .aggregate
        .sections
        .iter()
        .all(|s| s.lines().count() == 1 + 4));
}

#[tokio::test]
async fn missing_panel_generator_is_a_stage_error() {
    let orchestrator = OrchestratorBuilder::new(single_turn_config())
        .with_generator(Arc::new(ScriptedGenerator::new()))
        .with_summarizer(Arc::new(EchoSummarizer::new()))
        .build()
        .unwrap();
    let err = orchestrator
        .start(ThreadId::new(), ResearchInput::new("t"))
        .await
        .unwrap_err();
    assert!(matches!(err, ColloquyError::Stage { .. }));
}

#[tokio::test]
async fn default_config_grounds_every_answer() {
    let mut config = test_config();
    config.interview.max_turns = 2;
    let searcher = Arc::new(CountingSearcher::new());
    let generator = Arc::new(ScriptedGenerator::new());
    let orchestrator = OrchestratorBuilder::new(config)
        .with_generator(generator.clone())
        .with_summarizer(Arc::new(EchoSummarizer::new()))
        .with_searcher(searcher.clone())
        .build()
        .unwrap();

    let input = ResearchInput::new("t").with_participants(participants(2));
    completed(orchestrator.start(ThreadId::new(), input).await.unwrap());

    // two grounded answers plus one reflection per branch
    assert_eq!(searcher.calls(), 6);
    assert!(searcher.queries().iter().all(|q| q.contains(" query ")));
    for name in ["P1", "P2"] {
        assert_eq!(
            generator.sources_seen(name),
            vec![
                format!("result for {} query 1", name),
                format!("result for {} query 2", name)
            ]
        );
    }
}
