use tracing::warn;

use colloquy_core::types::BranchStage;

use crate::tracker::Verdict;

/// Where a branch is in its ASK → ANSWER → REFLECT → FINISH cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    Ask,
    Answer,
    Reflect,
    Finish,
    Completed,
    Failed,
}

/// What just happened in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchEvent {
    Asked,
    Answered(Verdict),
    Reflected,
    Summarized,
    Faulted,
}

impl BranchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The stage reported when a branch fails in this state.
    pub fn stage(&self) -> Option<BranchStage> {
        match self {
            Self::Ask => Some(BranchStage::Ask),
            Self::Answer => Some(BranchStage::Answer),
            Self::Reflect => Some(BranchStage::Reflect),
            Self::Finish => Some(BranchStage::Finish),
            Self::Completed | Self::Failed => None,
        }
    }
}

/// Next state for `event` in `state`. Unexpected pairs fail the branch.
pub fn transition(state: BranchState, event: BranchEvent) -> BranchState {
    use BranchEvent::*;
    use BranchState::*;

    match (state, event) {
        (_, Faulted) => Failed,
        (Ask, Asked) => Answer,
        (Answer, Answered(Verdict::Continue)) => Ask,
        (Answer, Answered(Verdict::Terminate(_))) => Reflect,
        (Reflect, Reflected) => Finish,
        (Finish, Summarized) => Completed,
        (state, event) => {
            warn!(?state, ?event, "Invalid branch transition");
            Failed
        }
    }
}
