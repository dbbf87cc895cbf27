use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use colloquy_core::types::{BranchFailure, BranchResult, BranchStage, Participant};

use crate::interview::{BranchContext, BranchOutcome, BranchWorkflow};

/// A running interview branch.
pub struct BranchHandle {
    pub index: usize,
    pub participant: String,
    handle: JoinHandle<BranchOutcome>,
}

impl BranchHandle {
    /// Wait for the branch. A panicked or aborted task becomes a failure.
    pub async fn join(self) -> BranchOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = if e.is_panic() {
                    "branch task panicked".to_string()
                } else {
                    format!("branch task did not finish: {}", e)
                };
                warn!(index = self.index, participant = %self.participant, error = %error, "Branch task lost");
                Err(BranchFailure {
                    index: self.index,
                    participant: self.participant,
                    stage: BranchStage::Task,
                    error,
                })
            }
        }
    }
}

/// Starts one independent branch per participant.
pub struct Dispatcher {
    ctx: Arc<BranchContext>,
    limit: Option<Arc<Semaphore>>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<BranchContext>) -> Self {
        Self { ctx, limit: None }
    }

    /// Run at most `max` branches at once. Zero means unbounded.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.limit = (max > 0).then(|| Arc::new(Semaphore::new(max)));
        self
    }

    /// Spawn a branch per participant, in order. Each starts from an empty log.
    pub fn dispatch(&self, participants: Vec<Participant>) -> Vec<BranchHandle> {
        info!(branches = participants.len(), topic = %self.ctx.topic, "Dispatching interviews");

        participants
            .into_iter()
            .enumerate()
            .map(|(index, participant)| {
                let name = participant.name.clone();
                let ctx = self.ctx.clone();
                let limit = self.limit.clone();

                let handle = tokio::spawn(async move {
                    let _permit = match limit {
                        Some(sem) => match sem.acquire_owned().await {
                            Ok(permit) => Some(permit),
                            Err(_) => {
                                return Err(BranchFailure {
                                    index,
                                    participant: participant.name,
                                    stage: BranchStage::Task,
                                    error: "concurrency limiter closed".into(),
                                })
                            }
                        },
                        None => None,
                    };
                    BranchWorkflow::new(ctx, index, participant).run().await
                });

                BranchHandle {
                    index,
                    participant: name,
                    handle,
                }
            })
            .collect()
    }
}

/// Wait for every branch, then split outcomes in dispatch order.
pub async fn join_all(handles: Vec<BranchHandle>) -> (Vec<BranchResult>, Vec<BranchFailure>) {
    let outcomes = futures::future::join_all(handles.into_iter().map(BranchHandle::join)).await;

    let mut results = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(result) => results.push(result),
            Err(failure) => failures.push(failure),
        }
    }
    (results, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use colloquy_core::traits::Generator;
    use colloquy_test_utils::{participants, EchoSummarizer, FailingGenerator, ScriptedGenerator};

    use crate::tracker::TurnTracker;

    fn ctx(generator: Arc<dyn Generator>) -> Arc<BranchContext> {
        Arc::new(
            BranchContext::new("rust", generator, Arc::new(EchoSummarizer::new()))
                .with_tracker(TurnTracker::new(1, "Thank you so much for your help").unwrap()),
        )
    }

    #[tokio::test]
    async fn test_empty_dispatch() {
        let dispatcher = Dispatcher::new(ctx(Arc::new(ScriptedGenerator::new())));
        let handles = dispatcher.dispatch(vec![]);
        assert!(handles.is_empty());
        let (results, failures) = join_all(handles).await;
        assert!(results.is_empty() && failures.is_empty());
    }

    #[tokio::test]
    async fn test_results_keep_dispatch_order() {
        let generator = ScriptedGenerator::new().with_delay(Duration::from_millis(5));
        let dispatcher = Dispatcher::new(ctx(Arc::new(generator)));
        let (results, failures) = join_all(dispatcher.dispatch(participants(4))).await;
        assert!(failures.is_empty());
        let names: Vec<_> = results.iter().map(|r| r.participant.as_str()).collect();
        assert_eq!(names, vec!["P1", "P2", "P3", "P4"]);
    }

    #[tokio::test]
    async fn test_branches_do_not_share_logs() {
        let dispatcher = Dispatcher::new(ctx(Arc::new(ScriptedGenerator::new())));
        let (results, _) = join_all(dispatcher.dispatch(participants(3))).await;
        for r in &results {
            let foreign = ["P1", "P2", "P3"]
                .iter()
                .filter(|n| **n != r.participant)
                .any(|n| r.transcript.contains(&format!("[{}]", n)));
            assert!(!foreign, "{} saw another branch's turns", r.participant);
        }
    }

    #[tokio::test]
    async fn test_panicking_branch_becomes_failure() {
        let generator = FailingGenerator::new("P2").panicking();
        let dispatcher = Dispatcher::new(ctx(Arc::new(generator)));
        let (results, failures) = join_all(dispatcher.dispatch(participants(3))).await;
        assert_eq!(results.len(), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].participant, "P2");
        assert_eq!(failures[0].stage, BranchStage::Task);
        assert_eq!(failures[0].index, 1);
    }

    #[tokio::test]
    async fn test_bounded_concurrency_completes_all() {
        let generator = ScriptedGenerator::new().with_delay(Duration::from_millis(2));
        let dispatcher =
            Dispatcher::new(ctx(Arc::new(generator))).with_max_concurrency(2);
        let (results, failures) = join_all(dispatcher.dispatch(participants(5))).await;
        assert_eq!(results.len(), 5);
        assert!(failures.is_empty());
    }
}
