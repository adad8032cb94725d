pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod extract;
pub mod flows;
pub mod profile;
pub mod reconcile;
pub mod registry;
pub mod sql;
pub mod stores;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    TracingAuditSink,
};
pub use domain::facts::{Discrepancy, EntityFact, FactSource};
pub use domain::tool::{
    Citation, ColumnSpec, ParamType, ParamValue, Passage, Row, RowSet, ToolCall, ToolFailure,
    ToolOutcome, ToolOutput, ToolResult,
};
pub use domain::turn::{ResponseStatus, Step, Turn, TurnId, TurnResponse, TurnStatus};
pub use errors::{AbortReason, ApplicationError, DomainError, ErrorKind, RecoveryPolicy};
pub use extract::FactExtractor;
pub use flows::{TransitionError, TransitionOutcome, TurnEvent, TurnState, TurnStateMachine};
pub use profile::{AgentProfile, ModelSettings};
pub use reconcile::{MatchPolicy, ReconciliationEngine};
pub use registry::{ParamSpec, RegistryError, ToolCallError, ToolRegistry, ToolSpec};
pub use sql::{AuditColumns, StatementKind};
pub use stores::{CollectionId, KnowledgeRetriever, RelationalStore, RetrievalError, StoreError};
