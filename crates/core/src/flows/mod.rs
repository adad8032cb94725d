pub mod engine;
pub mod states;

pub use engine::{TransitionError, TurnStateMachine};
pub use states::{TransitionOutcome, TurnEvent, TurnState};
