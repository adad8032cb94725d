use std::path::PathBuf;
use std::sync::Arc;

use plantwise_agent::{AgentRuntime, HttpLlmClient, LlmPlanner, Planner, ScriptedPlanner};
use plantwise_core::audit::TracingAuditSink;
use plantwise_core::config::LoadOptions;
use plantwise_core::domain::turn::{ResponseStatus, TurnResponse};
use plantwise_core::registry::{DESCRIBE_TABLES, EXECUTE_STATEMENT, LIST_TABLES};
use plantwise_core::stores::RelationalStore;
use plantwise_db::{connect, migrations, SqliteRelationalStore};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::commands::{async_runtime, load_config, load_knowledge, CommandResult};

/// Exit code of a turn that ended without an answer.
const ABORTED_EXIT_CODE: u8 = 7;

#[derive(Clone, Debug)]
pub struct AskArgs {
    pub question: String,
    pub agent: String,
    /// Replay a JSON plan instead of calling the configured model.
    pub plan_script: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct AskOutcome {
    command: &'static str,
    agent: String,
    response: TurnResponse,
}

type AskFailure = (&'static str, String, u8);

pub fn run(options: &LoadOptions, args: &AskArgs) -> CommandResult {
    let config = match load_config("ask", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let mut profile = match config.resolved_agent(&args.agent) {
        Ok(profile) => profile,
        Err(error) => {
            return CommandResult::failure("ask", "config_validation", error.to_string(), 2);
        }
    };
    profile.retrieve_limit = profile.retrieve_limit.min(config.knowledge.top_k);

    let runtime = match async_runtime("ask") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let knowledge = load_knowledge(config.knowledge.documents_dir.as_deref())
            .await
            .map_err(|error| ("knowledge_load", error.to_string(), 4u8))?;

        let uses_sql = [LIST_TABLES, DESCRIBE_TABLES, EXECUTE_STATEMENT]
            .iter()
            .any(|tool| profile.uses_tool(tool));
        let relational = if uses_sql {
            let pool = connect(&config.database)
                .await
                .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
            migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), 5u8))?;
            Some(Arc::new(SqliteRelationalStore::new(pool)) as Arc<dyn RelationalStore>)
        } else {
            None
        };

        let planner: Arc<dyn Planner> = match &args.plan_script {
            Some(path) => Arc::new(
                ScriptedPlanner::from_file(path)
                    .map_err(|error| ("plan_script", error.to_string(), 2u8))?,
            ),
            None => {
                let client = HttpLlmClient::from_config(&config.llm)
                    .map_err(|error| ("llm_client", format!("{error:#}"), 3u8))?;
                Arc::new(LlmPlanner::new(client))
            }
        };

        let agent = AgentRuntime::new(
            profile,
            planner,
            relational,
            Arc::new(knowledge),
            Arc::new(TracingAuditSink),
        )
        .map_err(|error| (error.error_class(), error.to_string(), 2u8))?;

        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };
        let turn = agent.run_turn_with_cancel(&args.question, cancel).await;
        interrupt.abort();
        info!(
            event_name = "cli.ask.finished",
            correlation_id = %turn.id.0,
            agent = %args.agent,
            steps = turn.steps.len(),
            status = ?turn.status,
            "ask command finished"
        );

        Ok::<TurnResponse, AskFailure>(turn.response())
    });

    match result {
        Ok(response) => {
            let exit_code = match response.status {
                ResponseStatus::Answered => 0,
                ResponseStatus::Aborted => ABORTED_EXIT_CODE,
            };
            CommandResult::payload(
                exit_code,
                &AskOutcome { command: "ask", agent: args.agent.clone(), response },
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("ask", error_class, message, exit_code)
        }
    }
}
