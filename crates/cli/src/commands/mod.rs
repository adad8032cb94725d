pub mod ask;
pub mod config;
pub mod doctor;
pub mod migrate;
pub mod seed;
pub mod tools;

use std::path::Path;

use plantwise_core::config::{AppConfig, LoadOptions};
use plantwise_db::{InMemoryKnowledgeStore, KnowledgeFixtures, KnowledgeLoadError};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(&payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(&payload) }
    }

    /// Command-specific JSON payload.
    pub fn payload<T>(exit_code: u8, payload: &T) -> Self
    where
        T: Serialize,
    {
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload<T>(payload: &T) -> String
where
    T: Serialize,
{
    serde_json::to_string(payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Loads configuration or yields the failure every command reports for it.
pub(crate) fn load_config(command: &str, options: &LoadOptions) -> Result<AppConfig, CommandResult> {
    AppConfig::load(options.clone()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

pub(crate) fn async_runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Documents from the configured directory, or the bundled set when none is
/// configured.
pub(crate) async fn load_knowledge(
    documents_dir: Option<&Path>,
) -> Result<InMemoryKnowledgeStore, KnowledgeLoadError> {
    match documents_dir {
        Some(dir) => InMemoryKnowledgeStore::load_dir(dir).await,
        None => Ok(KnowledgeFixtures::store()),
    }
}
