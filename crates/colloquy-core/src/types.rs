use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one resumable orchestrator run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persona that parameterizes one interview branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub affiliation: String,
    pub description: String,
}

impl Participant {
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            affiliation: String::new(),
            description: description.into(),
        }
    }

    pub fn with_affiliation(mut self, affiliation: impl Into<String>) -> Self {
        self.affiliation = affiliation.into();
        self
    }

    /// Multi-line rendering used when prompting as this participant.
    pub fn persona(&self) -> String {
        format!(
            "Name: {}\nRole: {}\nAffiliation: {}\nDescription: {}\n",
            self.name, self.role, self.affiliation, self.description
        )
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Asker,
    Responder,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asker => write!(f, "Asker"),
            Self::Responder => write!(f, "Responder"),
        }
    }
}

/// One speaker-tagged utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Turn {
    pub fn asker(content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Asker,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn responder(content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Responder,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Append-only record of one branch's interview.
///
/// A log is owned by a single branch; nothing hands out mutable access
/// except the append methods.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationLog {
    turns: Vec<Turn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn push_asker(&mut self, content: impl Into<String>) {
        self.push(Turn::asker(content));
    }

    pub fn push_responder(&mut self, content: impl Into<String>) {
        self.push(Turn::responder(content));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of responder turns so far.
    pub fn responder_turns(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| t.speaker == Speaker::Responder)
            .count()
    }

    /// The most recent asker turn, if any.
    pub fn last_asker(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.speaker == Speaker::Asker)
    }

    /// Render the log as a `Speaker: text` buffer, one turn per line.
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("{}: {}", t.speaker, t.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The single artifact a completed branch produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchResult {
    /// Name of the participant this branch interviewed.
    pub participant: String,
    /// The report section written from the interview.
    pub text: String,
    /// The saved interview transcript.
    pub transcript: String,
    pub responder_turns: usize,
}

/// Where in a branch a failure happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BranchStage {
    Ask,
    Answer,
    Reflect,
    Finish,
    /// The branch task itself died (panic or abort).
    Task,
}

/// A branch that terminated without a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchFailure {
    /// Position of the branch in dispatch order.
    pub index: usize,
    pub participant: String,
    pub stage: BranchStage,
    pub error: String,
}

/// The combined document built after every branch has terminated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub header: String,
    pub sections: Vec<String>,
    pub body: String,
}

impl AggregateResult {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Header followed by the body, separated by a blank line.
    pub fn document(&self) -> String {
        if self.header.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n\n{}", self.header, self.body)
        }
    }
}

/// Cumulative outcome of the fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FanOutStatus {
    /// No participants were dispatched.
    Empty,
    /// Every branch produced a result.
    Complete,
    /// Some branches failed; the aggregate covers the survivors.
    Partial { failed: Vec<String> },
}

/// Final output of a completed orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub thread_id: ThreadId,
    pub aggregate: AggregateResult,
    pub status: FanOutStatus,
    pub failures: Vec<BranchFailure>,
    pub published: bool,
}

/// Named orchestrator stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    GenerateParticipants,
    ConductInterviews,
    Aggregate,
    Publish,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::GenerateParticipants,
        Stage::ConductInterviews,
        Stage::Aggregate,
        Stage::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateParticipants => "generate_participants",
            Self::ConductInterviews => "conduct_interviews",
            Self::Aggregate => "aggregate",
            Self::Publish => "publish",
        }
    }

    /// The stage that runs after this one.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::GenerateParticipants => Some(Self::ConductInterviews),
            Self::ConductInterviews => Some(Self::Aggregate),
            Self::Aggregate => Some(Self::Publish),
            Self::Publish => None,
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of the orchestrator relative to its stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "at", content = "stage", rename_all = "snake_case")]
pub enum Cursor {
    Before(Stage),
    After(Stage),
    Done,
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before(stage) => write!(f, "before {}", stage),
            Self::After(stage) => write!(f, "after {}", stage),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Everything the orchestrator needs to continue a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub topic: String,
    pub max_participants: usize,
    /// Reviewer feedback used when (re)generating participants.
    #[serde(default)]
    pub participant_feedback: Option<String>,
    /// Editor feedback passed to every section summary.
    #[serde(default)]
    pub editor_feedback: Option<String>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Participants came from the caller; skip generation.
    #[serde(default)]
    pub participants_supplied: bool,
    #[serde(default)]
    pub results: Vec<BranchResult>,
    #[serde(default)]
    pub failures: Vec<BranchFailure>,
    #[serde(default)]
    pub aggregate: Option<AggregateResult>,
    #[serde(default)]
    pub published: bool,
}

/// A persisted snapshot taken at a stage boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub cursor: Cursor,
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(thread_id: ThreadId, cursor: Cursor, state: WorkflowState) -> Self {
        Self {
            thread_id,
            cursor,
            state,
            created_at: Utc::now(),
        }
    }
}

/// Role in an LLM chat request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A plain-text chat message for the LLM transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Progress events broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    StageStarted { thread_id: ThreadId, stage: Stage },
    StageCompleted { thread_id: ThreadId, stage: Stage },
    BranchStarted { index: usize, participant: String },
    TurnAppended { participant: String, speaker: Speaker, turn: usize },
    BranchCompleted { index: usize, participant: String, responder_turns: usize },
    BranchFailed { index: usize, participant: String, error: String },
    Paused { thread_id: ThreadId, cursor: Cursor },
    Published { channel: String },
    PublishFailed { channel: String, error: String },
}
