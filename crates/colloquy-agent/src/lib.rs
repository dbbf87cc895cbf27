pub mod aggregate;
pub mod dispatch;
pub mod interview;
pub mod orchestrator;
pub mod tracker;

pub use aggregate::Aggregator;
pub use dispatch::{BranchHandle, Dispatcher};
pub use interview::{BranchContext, BranchOutcome, BranchWorkflow};
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, ResearchInput, ResumeCommand, RunOutcome,
};
pub use tracker::{TerminationReason, TurnTracker, Verdict};
