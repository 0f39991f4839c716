use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

pub type SessionId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Created,
    Planning,
    Generating,
    Reviewing,
    Ready,
    Refining,
    Committed,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Planning => "planning",
            Self::Generating => "generating",
            Self::Reviewing => "reviewing",
            Self::Ready => "ready",
            Self::Refining => "refining",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }

    /// True while a runner is actively driving the session.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::Planning | Self::Generating | Self::Reviewing | Self::Refining
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "planning" => Ok(Self::Planning),
            "generating" => Ok(Self::Generating),
            "reviewing" => Ok(Self::Reviewing),
            "ready" => Ok(Self::Ready),
            "refining" => Ok(Self::Refining),
            "committed" => Ok(Self::Committed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid stage: {}", s)),
        }
    }
}

/// Validate that a stage transition is valid.
///
/// Covers the generation pipeline, the refinement loop, commits, and the
/// forced failure edge out of any running stage.
pub fn is_valid_transition(from: Stage, to: Stage) -> bool {
    use Stage::*;
    matches!(
        (from, to),
        (Created, Planning)
            | (Planning, Generating)
            | (Generating, Reviewing)
            | (Reviewing, Ready)
            | (Ready, Refining)
            | (Refining, Ready)
            | (Ready, Committed)
            | (Committed, Committed)
            | (Failed, Committed)
    ) || (from.is_running() && to == Failed)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Artifact,
    Description,
    Done,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Artifact => "artifact",
            Self::Description => "description",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

/// One ordered unit of progress for a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub session_id: SessionId,
    pub seq: u64,
    pub kind: EventKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn is_done(&self) -> bool {
        self.kind == EventKind::Done
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub spec: String,
    pub repo: String,
    stage: Stage,
    pub artifact: String,
    pub description: String,
    pub tasks: Vec<String>,
    pub url: Option<String>,
    locked: bool,
    #[serde(skip)]
    committing: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, spec: String, repo: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            spec,
            repo,
            stage: Stage::Created,
            artifact: String::new(),
            description: String::new(),
            tasks: Vec::new(),
            url: None,
            locked: false,
            committing: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_committing(&self) -> bool {
        self.committing
    }

    /// Move to `to`, rejecting anything outside the stage state machine.
    pub fn set_stage(&mut self, to: Stage) -> Result<(), SessionError> {
        if !is_valid_transition(self.stage, to) {
            return Err(SessionError::InvalidTransition {
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        Ok(())
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub(crate) fn set_committing(&mut self, committing: bool) {
        self.committing = committing;
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
