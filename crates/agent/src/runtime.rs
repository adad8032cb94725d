use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use plantwise_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use plantwise_core::domain::tool::{ToolCall, ToolFailure, ToolOutput, ToolResult};
use plantwise_core::domain::turn::{Step, Turn, TurnStatus};
use plantwise_core::errors::{AbortReason, ApplicationError, DomainError, ErrorKind, RecoveryPolicy};
use plantwise_core::extract::FactExtractor;
use plantwise_core::flows::{TransitionError, TurnEvent, TurnState, TurnStateMachine};
use plantwise_core::profile::AgentProfile;
use plantwise_core::reconcile::ReconciliationEngine;
use plantwise_core::registry::{ToolRegistry, DESCRIBE_TABLES, EXECUTE_STATEMENT, LIST_TABLES};
use plantwise_core::sql::{cast_comparisons_to_text, normalize_statement, uppercase_text_comparisons};
use plantwise_core::stores::{KnowledgeRetriever, RelationalStore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::conversation::{triage, Triage};
use crate::guardrails::{SafetyGuard, Verdict};
use crate::planner::{Planner, PlannerOutput, PlanningContext};
use crate::tools::{ToolExecutor, RECORD_NOT_FOUND};

const ACTOR: &str = "agent-runtime";
const CHECK_RECORD: &str = "Check the identifier or name of the record and ask again.";

/// Drives one question at a time through plan, dispatch, observe and answer.
/// A runtime holds no per-turn state, so any number of turns may run on it
/// concurrently.
pub struct AgentRuntime {
    profile: AgentProfile,
    registry: ToolRegistry,
    planner: Arc<dyn Planner>,
    executor: ToolExecutor,
    guard: SafetyGuard,
    extractor: FactExtractor,
    reconciler: ReconciliationEngine,
    machine: TurnStateMachine,
    audit: Arc<dyn AuditSink>,
}

impl AgentRuntime {
    pub fn new(
        profile: AgentProfile,
        planner: Arc<dyn Planner>,
        relational: Option<Arc<dyn RelationalStore>>,
        knowledge: Arc<dyn KnowledgeRetriever>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ApplicationError> {
        let registry = ToolRegistry::from_enabled(&profile.tools).map_err(DomainError::from)?;

        let uses_sql = [LIST_TABLES, DESCRIBE_TABLES, EXECUTE_STATEMENT]
            .iter()
            .any(|tool| profile.uses_tool(tool));
        if uses_sql && relational.is_none() {
            return Err(ApplicationError::Configuration(format!(
                "agent `{}` enables SQL tools but no relational store was provided",
                profile.name
            )));
        }
        if !profile.match_policy.is_valid() {
            return Err(ApplicationError::Configuration(format!(
                "agent `{}` has an invalid reconciliation threshold",
                profile.name
            )));
        }
        if profile.max_steps == 0 {
            return Err(ApplicationError::Configuration(format!(
                "agent `{}` must allow at least one tool step",
                profile.name
            )));
        }

        Ok(Self {
            executor: ToolExecutor::new(&profile, relational, knowledge),
            extractor: FactExtractor::new(profile.subject_columns.clone()),
            reconciler: ReconciliationEngine::new(profile.match_policy.clone()),
            guard: SafetyGuard::new(),
            machine: TurnStateMachine::new(),
            registry,
            planner,
            audit,
            profile,
        })
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn run_turn(&self, question: &str) -> Turn {
        self.run_turn_with_cancel(question, CancellationToken::new()).await
    }

    /// Runs a turn that stops scheduling work once `cancel` fires. Calls
    /// already in flight finish, but their results are dropped.
    pub async fn run_turn_with_cancel(&self, question: &str, cancel: CancellationToken) -> Turn {
        let mut turn = Turn::new(self.profile.name.clone(), question);
        let audit = AuditContext::new(turn.id.0.clone(), self.profile.name.clone(), ACTOR);
        let span = tracing::info_span!(
            "turn",
            correlation_id = %turn.id.0,
            agent = %self.profile.name
        );

        async {
            tracing::info!(event_name = "turn.started", correlation_id = %turn.id.0, "turn started");
            if let Err(error) = self.drive(&mut turn, &audit, &cancel).await {
                tracing::error!(
                    event_name = "turn.invariant_violated",
                    correlation_id = %turn.id.0,
                    error = %error,
                    "turn state machine rejected a transition"
                );
                let reason = AbortReason::PlannerUnavailable;
                turn.answer = Some(reason.user_message().to_string());
                turn.status = TurnStatus::Aborted { reason };
            }
        }
        .instrument(span)
        .await;

        turn
    }

    async fn drive(
        &self,
        turn: &mut Turn,
        audit: &AuditContext,
        cancel: &CancellationToken,
    ) -> Result<(), TransitionError> {
        let mut state = self.machine.initial_state();

        if let Triage::Clarify(reply) = triage(&turn.question, &self.profile) {
            tracing::info!(
                event_name = "turn.clarification_requested",
                correlation_id = %turn.id.0,
                "question too vague to plan"
            );
            return self.deliver(turn, &mut state, audit, reply);
        }

        loop {
            if cancel.is_cancelled() {
                return self.abort(turn, &mut state, audit, AbortReason::Cancelled);
            }

            let planned = self
                .planner
                .plan(&PlanningContext { profile: &self.profile, registry: &self.registry, turn })
                .await;
            let (reasoning, calls) = match planned {
                Ok(PlannerOutput::Answer { text, .. }) => {
                    return self.deliver(turn, &mut state, audit, text);
                }
                Ok(PlannerOutput::Calls { reasoning, calls }) if !calls.is_empty() => {
                    (reasoning, calls)
                }
                Ok(PlannerOutput::Calls { .. }) => {
                    tracing::warn!(
                        event_name = "planner.empty_plan",
                        correlation_id = %turn.id.0,
                        "planner returned no calls and no answer"
                    );
                    return self.abort(turn, &mut state, audit, AbortReason::PlannerUnavailable);
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "planner.failed",
                        correlation_id = %turn.id.0,
                        error = %error,
                        "planner failed"
                    );
                    return self.abort(turn, &mut state, audit, AbortReason::PlannerUnavailable);
                }
            };

            if cancel.is_cancelled() {
                return self.abort(turn, &mut state, audit, AbortReason::Cancelled);
            }
            if turn.tool_step_count() >= self.profile.max_steps {
                return self.abort(turn, &mut state, audit, AbortReason::StepBudgetExceeded);
            }

            let index = turn.steps.len();
            let calls = calls
                .into_iter()
                .enumerate()
                .map(|(position, mut call)| {
                    if call.call_id.is_empty() {
                        call.call_id = format!("call-{index}-{position}");
                    }
                    call
                })
                .collect::<Vec<_>>();
            self.transition(
                &mut state,
                TurnEvent::ToolCallsPlanned { count: calls.len() },
                audit,
            )?;

            let settled = settled_statements(turn);
            let results = join_all(
                calls.iter().cloned().map(|call| self.dispatch(call, audit, &settled)),
            )
            .await;

            if cancel.is_cancelled() {
                tracing::info!(
                    event_name = "turn.results_discarded",
                    correlation_id = %turn.id.0,
                    results = results.len(),
                    "turn cancelled during dispatch"
                );
                return self.abort(turn, &mut state, audit, AbortReason::Cancelled);
            }
            self.transition(&mut state, TurnEvent::CallsResolved, audit)?;

            let unreachable = results.iter().filter_map(ToolResult::failure_kind).find(|kind| {
                matches!(kind, ErrorKind::ConnectivityError | ErrorKind::RetrievalUnavailable)
            });
            turn.steps.push(Step { index, reasoning, calls, results });

            if let Some(error) = unreachable {
                return self.abort(turn, &mut state, audit, AbortReason::ToolFailure { error });
            }
            if turn.failure_count(ErrorKind::SqlSyntaxError) >= 2 {
                return self.abort(
                    turn,
                    &mut state,
                    audit,
                    AbortReason::ToolFailure { error: ErrorKind::SqlSyntaxError },
                );
            }

            let discrepancies = self.observe(turn, audit);
            self.transition(&mut state, TurnEvent::ObservationsRecorded { discrepancies }, audit)?;

            let repeats_settled = turn.steps.last().is_some_and(|step| {
                step.results.iter().all(|result| {
                    result.attempts == 0 && result.failure_kind() == Some(ErrorKind::NoRowsAffected)
                })
            });
            if repeats_settled {
                tracing::info!(
                    event_name = "turn.not_found_settled",
                    correlation_id = %turn.id.0,
                    "planner re-issued statements that already matched no record"
                );
                let reply = format!(
                    "I couldn't find a matching record, so nothing was changed. {CHECK_RECORD}"
                );
                return self.deliver(turn, &mut state, audit, reply);
            }
        }
    }

    fn transition(
        &self,
        state: &mut TurnState,
        event: TurnEvent,
        audit: &AuditContext,
    ) -> Result<(), TransitionError> {
        let outcome = self.machine.apply_with_audit(*state, &event, self.audit.as_ref(), audit)?;
        *state = outcome.to;
        Ok(())
    }

    /// Validate, guard, then execute. Rejected calls never reach a store, and
    /// neither does a statement this turn already found matches no record.
    async fn dispatch(
        &self,
        call: ToolCall,
        audit: &AuditContext,
        settled: &BTreeSet<String>,
    ) -> ToolResult {
        if let Err(error) = self.registry.validate(&call) {
            tracing::warn!(
                event_name = "tool.call_invalid",
                correlation_id = %audit.correlation_id,
                call_id = %call.call_id,
                error = %error,
                "tool call rejected by registry"
            );
            return ToolResult::failure(
                call,
                ToolFailure::new(ErrorKind::InvalidToolCall, error.to_string()),
                0,
            );
        }

        if let Verdict::Block { reason_code, user_message, suggestion } =
            self.guard.evaluate_call(&call)
        {
            self.audit.emit(
                AuditEvent::new(
                    audit,
                    "tool.call_blocked",
                    AuditCategory::Policy,
                    AuditOutcome::Rejected,
                )
                .with_metadata("call_id", &call.call_id)
                .with_metadata("tool", &call.tool)
                .with_metadata("reason_code", reason_code),
            );
            return ToolResult::failure(
                call,
                ToolFailure::new(ErrorKind::PolicyBlocked, user_message).with_suggestion(suggestion),
                0,
            );
        }

        let already_not_found = call.tool == EXECUTE_STATEMENT
            && call
                .param_str("sql_statement")
                .is_some_and(|sql| settled.contains(&normalize_statement(sql)));
        let result = if already_not_found {
            ToolResult::failure(call, record_not_found(), 0)
        } else {
            self.execute_with_recovery(call).await
        };
        let (event_type, outcome) = match result.failure_kind() {
            None => ("tool.call_succeeded", AuditOutcome::Success),
            Some(ErrorKind::PolicyBlocked | ErrorKind::AuditFieldMissing) => {
                ("tool.call_rejected", AuditOutcome::Rejected)
            }
            Some(_) => ("tool.call_failed", AuditOutcome::Failed),
        };
        let mut event = AuditEvent::new(audit, event_type, AuditCategory::ToolCall, outcome)
            .with_metadata("call_id", &result.call.call_id)
            .with_metadata("tool", &result.call.tool)
            .with_metadata("attempts", result.attempts.to_string());
        if let Some(kind) = result.failure_kind() {
            event = event.with_metadata("error_kind", kind.code());
        }
        self.audit.emit(event);
        result
    }

    /// Applies the local recovery each failure kind allows: one rewrite for
    /// zero-row updates and type mismatches, one delayed retry for
    /// unreachable stores.
    async fn execute_with_recovery(&self, call: ToolCall) -> ToolResult {
        let mut current = call;
        let mut attempts = 0;
        let mut rewritten = false;
        let mut retried = false;

        loop {
            attempts += 1;
            let failure = match self.invoke_with_timeout(&current).await {
                Ok(output) => return ToolResult::success(current, output, attempts),
                Err(failure) => failure,
            };

            let next = match failure.kind.recovery() {
                RecoveryPolicy::LocalRewrite if !rewritten => {
                    rewritten = true;
                    rewrite_statement(&current, failure.kind)
                }
                RecoveryPolicy::RetryWithBackoff if !retried => {
                    retried = true;
                    tokio::time::sleep(Duration::from_millis(self.profile.retry_backoff_ms)).await;
                    Some(current.clone())
                }
                _ => None,
            };

            match next {
                Some(next) => {
                    tracing::debug!(
                        event_name = "tool.call_retry",
                        call_id = %current.call_id,
                        error_kind = failure.kind.code(),
                        attempt = attempts,
                        "retrying tool call"
                    );
                    current = next;
                }
                None if failure.kind == ErrorKind::NoRowsAffected => {
                    return ToolResult::failure(current, record_not_found(), attempts);
                }
                None => return ToolResult::failure(current, failure, attempts),
            }
        }
    }

    async fn invoke_with_timeout(&self, call: &ToolCall) -> Result<ToolOutput, ToolFailure> {
        let limit = self.executor.timeout();
        match tokio::time::timeout(limit, self.executor.invoke(call)).await {
            Ok(result) => result,
            Err(_) => Err(ToolFailure::new(
                ErrorKind::ConnectivityError,
                format!("`{}` did not finish within {}s", call.tool, limit.as_secs()),
            )),
        }
    }

    /// Rebuilds the turn's facts from every successful result so far and
    /// reconciles them. Returns the number of discrepancies.
    fn observe(&self, turn: &mut Turn, audit: &AuditContext) -> usize {
        let outputs = turn.results().filter_map(ToolResult::output).collect::<Vec<_>>();

        let mut facts = Vec::new();
        for output in outputs.iter().filter(|output| matches!(output, ToolOutput::Rows(_))) {
            for fact in self.extractor.from_output(output, &[]) {
                if !facts.contains(&fact) {
                    facts.push(fact);
                }
            }
        }
        let known = facts.clone();
        for output in outputs.iter().filter(|output| matches!(output, ToolOutput::Passages(_))) {
            for fact in self.extractor.from_output(output, &known) {
                if !facts.contains(&fact) {
                    facts.push(fact);
                }
            }
        }

        let discrepancies = self.reconciler.reconcile(&facts);
        for discrepancy in discrepancies.iter().filter(|found| !turn.discrepancies.contains(found)) {
            self.audit.emit(
                AuditEvent::new(
                    audit,
                    "reconciliation.discrepancy_found",
                    AuditCategory::Reconciliation,
                    AuditOutcome::Success,
                )
                .with_metadata("subject", &discrepancy.subject)
                .with_metadata("attribute", &discrepancy.attribute)
                .with_metadata("system_of_record", &discrepancy.system_of_record.value)
                .with_metadata("knowledge_store", &discrepancy.knowledge_store.value),
            );
        }

        tracing::debug!(
            event_name = "turn.observations_recorded",
            correlation_id = %turn.id.0,
            facts = facts.len(),
            discrepancies = discrepancies.len(),
            "observations recorded"
        );
        turn.facts = facts;
        turn.discrepancies = discrepancies;
        turn.discrepancies.len()
    }

    fn deliver(
        &self,
        turn: &mut Turn,
        state: &mut TurnState,
        audit: &AuditContext,
        draft: String,
    ) -> Result<(), TransitionError> {
        self.transition(state, TurnEvent::AnswerDrafted, audit)?;

        let mut answer = self.guard_answer(draft.trim().to_string(), audit);
        let mut appended = false;
        for suggestion in turn.policy_suggestions() {
            if !answer.contains(&suggestion) {
                answer.push_str("\n\n");
                answer.push_str(&suggestion);
                appended = true;
            }
        }
        for discrepancy in &turn.discrepancies {
            answer.push_str("\n\n");
            answer.push_str(&discrepancy.notice());
            appended = true;
        }
        // Notices quote retrieved documents; the composed text is guarded as a whole.
        if appended {
            answer = self.guard_answer(answer, audit);
        }

        turn.answer = Some(answer);
        self.transition(state, TurnEvent::AnswerDelivered, audit)?;
        turn.status = TurnStatus::Answered;
        tracing::info!(
            event_name = "turn.answered",
            correlation_id = %turn.id.0,
            steps = turn.steps.len(),
            discrepancies = turn.discrepancies.len(),
            "turn answered"
        );
        Ok(())
    }

    fn guard_answer(&self, answer: String, audit: &AuditContext) -> String {
        let verdict = self.guard.evaluate_answer(&answer);
        if let Some(reason_code) = verdict.reason_code() {
            self.audit.emit(
                AuditEvent::new(audit, "answer.guarded", AuditCategory::Policy, AuditOutcome::Rejected)
                    .with_metadata("reason_code", reason_code),
            );
        }
        match verdict {
            Verdict::Allow => answer,
            Verdict::Block { user_message, suggestion, .. } => format!("{user_message} {suggestion}"),
            Verdict::Rewrite { replacement, .. } => replacement,
        }
    }

    fn abort(
        &self,
        turn: &mut Turn,
        state: &mut TurnState,
        audit: &AuditContext,
        reason: AbortReason,
    ) -> Result<(), TransitionError> {
        self.transition(state, TurnEvent::Abort(reason.clone()), audit)?;
        tracing::warn!(
            event_name = "turn.aborted",
            correlation_id = %turn.id.0,
            reason = reason.code(),
            steps = turn.steps.len(),
            "turn aborted"
        );
        turn.answer = Some(reason.user_message().to_string());
        turn.status = TurnStatus::Aborted { reason };
        Ok(())
    }
}

fn record_not_found() -> ToolFailure {
    ToolFailure::new(ErrorKind::NoRowsAffected, RECORD_NOT_FOUND).with_suggestion(CHECK_RECORD)
}

/// Statements, as issued and as rewritten, that already matched no record
/// earlier in the turn.
fn settled_statements(turn: &Turn) -> BTreeSet<String> {
    turn.steps
        .iter()
        .flat_map(|step| step.calls.iter().zip(&step.results))
        .filter(|(_, result)| result.failure_kind() == Some(ErrorKind::NoRowsAffected))
        .flat_map(|(call, result)| [call, &result.call])
        .filter(|call| call.tool == EXECUTE_STATEMENT)
        .filter_map(|call| call.param_str("sql_statement"))
        .map(normalize_statement)
        .collect()
}

/// Rewritten statement for a failure that allows a local retry, if the
/// rewrite changes anything.
fn rewrite_statement(call: &ToolCall, kind: ErrorKind) -> Option<ToolCall> {
    if call.tool != EXECUTE_STATEMENT {
        return None;
    }
    let sql = call.param_str("sql_statement")?;
    let rewritten = match kind {
        ErrorKind::NoRowsAffected => uppercase_text_comparisons(sql),
        ErrorKind::TypeMismatchError => cast_comparisons_to_text(sql),
        _ => None,
    }?;
    Some(call.clone().with_param("sql_statement", rewritten))
}

#[cfg(test)]
mod tests {
    use plantwise_core::domain::tool::ToolCall;
    use plantwise_core::errors::ErrorKind;

    use super::rewrite_statement;

    #[test]
    fn zero_row_update_is_rewritten_case_insensitively() {
        let call = ToolCall::new("execute_statement").with_param(
            "sql_statement",
            "UPDATE equipment SET status = 'inactive' WHERE equipname = 'biodiesel feed tank k-901'",
        );
        let rewritten = rewrite_statement(&call, ErrorKind::NoRowsAffected).expect("rewrite");
        let sql = rewritten.param_str("sql_statement").unwrap_or_default();
        assert!(sql.contains("UPPER(equipname) = UPPER('biodiesel feed tank k-901')"), "{sql}");
    }

    #[test]
    fn only_statement_calls_are_rewritten() {
        let call = ToolCall::new("retrieve").with_param("query", "pump = 'P-102'");
        assert!(rewrite_statement(&call, ErrorKind::NoRowsAffected).is_none());
        let call = ToolCall::new("execute_statement")
            .with_param("sql_statement", "SELECT equipid FROM equipment WHERE equipid = 'P-102'");
        assert!(rewrite_statement(&call, ErrorKind::SqlSyntaxError).is_none());
    }
}
