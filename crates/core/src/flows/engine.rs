use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{TransitionOutcome, TurnEvent, TurnState};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: TurnState, event: TurnEvent },
    #[error("turn already finished in {state:?}")]
    Terminal { state: TurnState },
}

/// Transition table of a single turn.
#[derive(Clone, Debug, Default)]
pub struct TurnStateMachine;

impl TurnStateMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_state(&self) -> TurnState {
        TurnState::Thinking
    }

    pub fn apply(
        &self,
        current: TurnState,
        event: &TurnEvent,
    ) -> Result<TransitionOutcome, TransitionError> {
        use TurnEvent::{
            Abort, AnswerDelivered, AnswerDrafted, CallsResolved, ObservationsRecorded,
            ToolCallsPlanned,
        };
        use TurnState::{Aborted, Answering, Done, Observing, Thinking, ToolDispatch};

        if current.is_terminal() {
            return Err(TransitionError::Terminal { state: current });
        }

        let to = match (current, event) {
            (Thinking, ToolCallsPlanned { count }) if *count > 0 => ToolDispatch,
            (Thinking, AnswerDrafted) => Answering,
            (ToolDispatch, CallsResolved) => Observing,
            (Observing, ObservationsRecorded { .. }) => Thinking,
            (Answering, AnswerDelivered) => Done,
            (_, Abort(_)) => Aborted,
            _ => {
                return Err(TransitionError::InvalidTransition {
                    state: current,
                    event: event.clone(),
                })
            }
        };

        Ok(TransitionOutcome { from: current, to, event: event.clone() })
    }

    pub fn apply_with_audit<S>(
        &self,
        current: TurnState,
        event: &TurnEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, TransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "turn.transition_applied",
                        AuditCategory::Turn,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "turn.transition_rejected",
                        AuditCategory::Turn,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}
