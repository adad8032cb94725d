//! Orchestration prompt rendering.
//!
//! The planner speaks a small XML dialect: reasoning in `<thinking>`, tool
//! calls in `<function_calls>`/`<invoke>` blocks and the final reply in
//! `<answer>`. Previous steps of the turn are replayed as a scratchpad so the
//! model sees every call it made and what came back.

use std::fmt::Write as _;

use plantwise_core::domain::tool::{ToolOutcome, ToolOutput};
use plantwise_core::domain::turn::Turn;
use plantwise_core::profile::AgentProfile;
use plantwise_core::registry::ToolRegistry;

/// Rendered results are cut off beyond this many characters per call.
const MAX_RESULT_CHARS: usize = 4_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub question: String,
    /// Assistant-side transcript of earlier steps in this turn.
    pub scratchpad: String,
}

pub fn render(profile: &AgentProfile, registry: &ToolRegistry, turn: &Turn) -> Prompt {
    Prompt {
        system: system_prompt(profile, registry),
        question: turn.question.clone(),
        scratchpad: scratchpad(turn),
    }
}

fn system_prompt(profile: &AgentProfile, registry: &ToolRegistry) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", profile.instruction.trim());
    out.push_str(
        "You have been provided with a set of functions to answer the user's question.\n\
         You must call the functions in the format below:\n\
         <function_calls>\n<invoke>\n<tool_name>$TOOL_NAME</tool_name>\n<parameters>\n\
         <$PARAMETER_NAME>$PARAMETER_VALUE</$PARAMETER_NAME>\n...\n</parameters>\n</invoke>\n\
         </function_calls>\n\
         Array parameters are written as JSON arrays of strings.\n\
         Here are the functions available:\n<functions>\n",
    );
    for spec in registry.describe() {
        let _ = writeln!(out, "<function>\n<name>{}</name>", spec.name);
        let _ = writeln!(out, "<description>{}</description>", spec.description);
        out.push_str("<parameters>\n");
        for param in &spec.params {
            let _ = writeln!(
                out,
                "<parameter><name>{}</name><type>{}</type><required>{}</required><description>{}</description></parameter>",
                param.name, param.param_type, param.required, param.description
            );
        }
        out.push_str("</parameters>\n</function>\n");
    }
    out.push_str("</functions>\n");

    out.push_str(
        "You will ALWAYS follow the below guidelines when you are answering a question:\n<guidelines>\n",
    );
    out.push_str(
        "- Think through the user's question and extract all data from the question before \
         creating a plan.\n",
    );
    for guideline in &profile.guidelines {
        let _ = writeln!(out, "- {guideline}");
    }
    out.push_str(
        "- If the question is ambiguous, ask the user to be more specific.\n\
         - Provide your final answer to the user's question within <answer></answer> xml tags.\n\
         - Always output your thoughts within <thinking></thinking> xml tags before and after you \
         invoke a function or before you respond to the user.\n\
         </guidelines>\n",
    );
    out
}

fn scratchpad(turn: &Turn) -> String {
    let mut out = String::new();
    for step in &turn.steps {
        if let Some(reasoning) = &step.reasoning {
            let _ = writeln!(out, "<thinking>{}</thinking>", reasoning.trim());
        }
        out.push_str("<function_calls>\n");
        for call in &step.calls {
            let _ = writeln!(out, "<invoke>\n<tool_name>{}</tool_name>\n<parameters>", call.tool);
            for (name, value) in &call.params {
                let _ = writeln!(out, "<{name}>{}</{name}>", value.render());
            }
            out.push_str("</parameters>\n</invoke>\n");
        }
        out.push_str("</function_calls>\n<function_results>\n");
        for result in &step.results {
            match &result.outcome {
                ToolOutcome::Success { output } => {
                    let _ = writeln!(
                        out,
                        "<result>\n<tool_name>{}</tool_name>\n<stdout>\n{}\n</stdout>\n</result>",
                        result.call.tool,
                        render_output(output)
                    );
                }
                ToolOutcome::Failure { failure } => {
                    let _ = writeln!(
                        out,
                        "<error>\n<tool_name>{}</tool_name>\n<kind>{}</kind>\n<message>{}</message>",
                        result.call.tool,
                        failure.kind.code(),
                        failure.message
                    );
                    if let Some(suggestion) = &failure.suggestion {
                        let _ = writeln!(out, "<suggestion>{suggestion}</suggestion>");
                    }
                    out.push_str("</error>\n");
                }
            }
        }
        out.push_str("</function_results>\n");
    }
    out
}

fn render_output(output: &ToolOutput) -> String {
    let rendered = match output {
        ToolOutput::Tables(tables) => serde_json::to_string(tables),
        ToolOutput::Columns(columns) => serde_json::to_string(columns),
        ToolOutput::Rows(rows) if rows.rows.is_empty() && rows.columns.is_empty() => {
            Ok(format!("{{\"rows_affected\":{}}}", rows.rows_affected))
        }
        ToolOutput::Rows(rows) => serde_json::to_string(&rows.rows),
        ToolOutput::Passages(passages) => Ok(passages
            .iter()
            .map(|passage| format!("[{}] {}", passage.citation, passage.text))
            .collect::<Vec<_>>()
            .join("\n")),
        ToolOutput::Suggestions(questions) => Ok(questions.join("\n")),
    }
    .unwrap_or_default();

    if rendered.chars().count() > MAX_RESULT_CHARS {
        let truncated = rendered.chars().take(MAX_RESULT_CHARS).collect::<String>();
        format!("{truncated}... (truncated)")
    } else {
        rendered
    }
}
