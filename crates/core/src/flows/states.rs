use serde::{Deserialize, Serialize};

use crate::errors::AbortReason;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnState {
    Thinking,
    ToolDispatch,
    Observing,
    Answering,
    Done,
    Aborted,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnEvent {
    ToolCallsPlanned { count: usize },
    CallsResolved,
    ObservationsRecorded { discrepancies: usize },
    AnswerDrafted,
    AnswerDelivered,
    Abort(AbortReason),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TurnState,
    pub to: TurnState,
    pub event: TurnEvent,
}
