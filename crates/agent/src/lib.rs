//! Agent runtime: the orchestration loop and everything it calls.
//!
//! A turn moves through a constrained loop:
//! 1. **Triage** (`conversation`) - vague questions get a clarification reply
//! 2. **Planning** (`planner`, `prompt`, `llm`) - the planner answers or emits tool calls
//! 3. **Guarding** (`guardrails`) - destructive, credential and halt requests are blocked
//! 4. **Execution** (`tools`) - calls run against the system of record and the knowledge store
//! 5. **Reconciliation** - facts from both sources are compared before answering
//!
//! # Safety Principle
//!
//! The planner only proposes. Statement rules, audit columns and answer
//! filtering are enforced in code, whatever the planner produces.

pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod planner;
pub mod prompt;
pub mod runtime;
pub mod tools;

pub use conversation::{triage, Triage};
pub use guardrails::{SafetyGuard, Verdict};
pub use llm::{HttpLlmClient, LlmClient};
pub use planner::{
    LlmPlanner, Planner, PlannerError, PlannerOutput, PlanningContext, ScriptedPlanner,
    ScriptedStep,
};
pub use runtime::AgentRuntime;
pub use tools::{SqlToolExecutor, ToolExecutor};
