use plantwise_core::config::LoadOptions;
use plantwise_core::registry::{ToolRegistry, ToolSpec};
use serde::Serialize;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ToolsOutcome<'a> {
    command: &'static str,
    agent: &'a str,
    collection: &'a str,
    max_steps: usize,
    tools: &'a [ToolSpec],
}

/// Lists the tools an agent profile may call, with their parameter schemas.
pub fn run(options: &LoadOptions, agent: &str) -> CommandResult {
    let config = match load_config("tools", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let profile = match config.agent(agent) {
        Ok(profile) => profile,
        Err(error) => {
            return CommandResult::failure("tools", "config_validation", error.to_string(), 2);
        }
    };
    let registry = match ToolRegistry::from_enabled(&profile.tools) {
        Ok(registry) => registry,
        Err(error) => {
            return CommandResult::failure("tools", "tool_registry", error.to_string(), 2);
        }
    };

    CommandResult::payload(
        0,
        &ToolsOutcome {
            command: "tools",
            agent,
            collection: profile.collection.as_str(),
            max_steps: profile.max_steps,
            tools: registry.describe(),
        },
    )
}
