//! A single interview: one participant, one log, one result.

mod branch;
pub mod state;

pub use branch::{BranchContext, BranchOutcome, BranchWorkflow, SourceSet};
pub use state::{transition, BranchEvent, BranchState};
