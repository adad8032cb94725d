use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::facts::{Discrepancy, EntityFact};
use crate::domain::tool::{ToolCall, ToolResult};
use crate::errors::{AbortReason, ErrorKind};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn generate() -> Self {
        Self(format!("turn-{}", Uuid::new_v4()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnStatus {
    InProgress,
    Answered,
    Aborted { reason: AbortReason },
}

impl TurnStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub index: usize,
    /// Opaque planner annotation. Never inspected for control flow.
    pub reasoning: Option<String>,
    pub calls: Vec<ToolCall>,
    pub results: Vec<ToolResult>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub agent: String,
    pub question: String,
    pub steps: Vec<Step>,
    pub facts: Vec<EntityFact>,
    pub discrepancies: Vec<Discrepancy>,
    pub answer: Option<String>,
    pub status: TurnStatus,
    pub started_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(agent: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            id: TurnId::generate(),
            agent: agent.into(),
            question: question.into(),
            steps: Vec::new(),
            facts: Vec::new(),
            discrepancies: Vec::new(),
            answer: None,
            status: TurnStatus::InProgress,
            started_at: Utc::now(),
        }
    }

    /// Steps that dispatched at least one tool call.
    pub fn tool_step_count(&self) -> usize {
        self.steps.iter().filter(|step| !step.calls.is_empty()).count()
    }

    pub fn results(&self) -> impl Iterator<Item = &ToolResult> {
        self.steps.iter().flat_map(|step| step.results.iter())
    }

    pub fn failure_count(&self, kind: ErrorKind) -> usize {
        self.results().filter(|result| result.failure_kind() == Some(kind)).count()
    }

    pub fn policy_suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();
        for result in self.results() {
            let Some(failure) = result.failure_detail() else {
                continue;
            };
            if failure.kind != ErrorKind::PolicyBlocked {
                continue;
            }
            if let Some(suggestion) = &failure.suggestion {
                if !suggestions.contains(suggestion) {
                    suggestions.push(suggestion.clone());
                }
            }
        }
        suggestions
    }

    pub fn response(&self) -> TurnResponse {
        let status = match self.status {
            TurnStatus::Aborted { .. } => ResponseStatus::Aborted,
            TurnStatus::Answered | TurnStatus::InProgress => ResponseStatus::Answered,
        };
        TurnResponse {
            turn_id: self.id.clone(),
            answer: self.answer.clone().unwrap_or_default(),
            discrepancies: self.discrepancies.clone(),
            status,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Answered,
    Aborted,
}

/// What the caller receives for one question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub turn_id: TurnId,
    pub answer: String,
    pub discrepancies: Vec<Discrepancy>,
    pub status: ResponseStatus,
}
