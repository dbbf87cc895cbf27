use colloquy_core::config::InterviewConfig;
use colloquy_core::error::{ColloquyError, Result};
use colloquy_core::types::ConversationLog;

/// Why an interview should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The responder has answered `max_turns` times.
    MaxTurns,
    /// The asker's latest turn contained the termination phrase.
    Phrase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Terminate(TerminationReason),
}

/// Decides whether an interview continues after each answer.
#[derive(Debug, Clone)]
pub struct TurnTracker {
    max_turns: usize,
    termination_phrase: String,
}

impl TurnTracker {
    /// A cap of zero is rejected: every interview asks at least once.
    pub fn new(max_turns: usize, termination_phrase: impl Into<String>) -> Result<Self> {
        if max_turns == 0 {
            return Err(ColloquyError::Config(
                "interview.max_turns must be at least 1".into(),
            ));
        }
        Ok(Self {
            max_turns,
            termination_phrase: termination_phrase.into(),
        })
    }

    pub fn from_config(config: &InterviewConfig) -> Result<Self> {
        Self::new(config.max_turns, config.termination_phrase.clone())
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Terminate once the responder reached the cap, or once the asker
    /// signalled it is done. The phrase match is exact and case-sensitive;
    /// it is not consulted until the log holds at least one full exchange.
    pub fn evaluate(&self, log: &ConversationLog) -> Verdict {
        if log.responder_turns() >= self.max_turns {
            return Verdict::Terminate(TerminationReason::MaxTurns);
        }
        if log.len() < 2 || self.termination_phrase.is_empty() {
            return Verdict::Continue;
        }
        match log.last_asker() {
            Some(turn) if turn.content.contains(&self.termination_phrase) => {
                Verdict::Terminate(TerminationReason::Phrase)
            }
            _ => Verdict::Continue,
        }
    }
}

impl Default for TurnTracker {
    fn default() -> Self {
        let interview = InterviewConfig::default();
        Self {
            max_turns: interview.max_turns,
            termination_phrase: interview.termination_phrase,
        }
    }
}
