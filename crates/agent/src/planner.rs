use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use plantwise_core::domain::tool::{ParamType, ParamValue, ToolCall};
use plantwise_core::domain::turn::Turn;
use plantwise_core::profile::AgentProfile;
use plantwise_core::registry::ToolRegistry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmClient;
use crate::prompt;

/// Everything a planner may look at when deciding the next step.
pub struct PlanningContext<'a> {
    pub profile: &'a AgentProfile,
    pub registry: &'a ToolRegistry,
    pub turn: &'a Turn,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlannerOutput {
    Calls { reasoning: Option<String>, calls: Vec<ToolCall> },
    Answer { reasoning: Option<String>, text: String },
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planner backend unavailable: {0}")]
    Unavailable(String),
    #[error("planner output could not be parsed: {0}")]
    Malformed(String),
    #[error("scripted plan has no step {0}")]
    ScriptExhausted(usize),
    #[error("could not load plan script `{path}`: {message}")]
    Script { path: String, message: String },
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, context: &PlanningContext<'_>) -> Result<PlannerOutput, PlannerError>;
}

/// One entry of a scripted plan: either tool calls or a final answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedStep {
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub calls: Vec<ToolCall>,
    #[serde(default)]
    pub answer: Option<String>,
}

impl ScriptedStep {
    pub fn calls(calls: Vec<ToolCall>) -> Self {
        Self { calls, ..Self::default() }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self { answer: Some(text.into()), ..Self::default() }
    }

    fn output(&self) -> PlannerOutput {
        match &self.answer {
            Some(text) => {
                PlannerOutput::Answer { reasoning: self.reasoning.clone(), text: text.clone() }
            }
            None => {
                PlannerOutput::Calls { reasoning: self.reasoning.clone(), calls: self.calls.clone() }
            }
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct PlanScript {
    #[serde(default)]
    repeat_last: bool,
    steps: Vec<ScriptedStep>,
}

/// Replays a fixed plan. Step `n` of the script answers the `n`-th planning
/// round of a turn, so one planner can serve many turns.
#[derive(Clone, Debug, Default)]
pub struct ScriptedPlanner {
    steps: Vec<ScriptedStep>,
    repeat_last: bool,
}

impl ScriptedPlanner {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self { steps, repeat_last: false }
    }

    /// Keeps replaying the final step once the script runs out.
    pub fn repeating(steps: Vec<ScriptedStep>) -> Self {
        Self { steps, repeat_last: true }
    }

    pub fn from_json(raw: &str) -> Result<Self, PlannerError> {
        let script: PlanScript = serde_json::from_str(raw)
            .map_err(|error| PlannerError::Malformed(error.to_string()))?;
        Ok(Self { steps: script.steps, repeat_last: script.repeat_last })
    }

    pub fn from_file(path: &Path) -> Result<Self, PlannerError> {
        let raw = std::fs::read_to_string(path).map_err(|error| PlannerError::Script {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        Self::from_json(&raw).map_err(|error| PlannerError::Script {
            path: path.display().to_string(),
            message: error.to_string(),
        })
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, context: &PlanningContext<'_>) -> Result<PlannerOutput, PlannerError> {
        let round = context.turn.steps.len();
        let step = self
            .steps
            .get(round)
            .or_else(|| if self.repeat_last { self.steps.last() } else { None })
            .ok_or(PlannerError::ScriptExhausted(round))?;
        Ok(step.output())
    }
}

/// Plans by prompting a language model and parsing its XML reply.
pub struct LlmPlanner<C> {
    client: C,
}

impl<C> LlmPlanner<C>
where
    C: LlmClient,
{
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C> Planner for LlmPlanner<C>
where
    C: LlmClient,
{
    async fn plan(&self, context: &PlanningContext<'_>) -> Result<PlannerOutput, PlannerError> {
        let prompt = prompt::render(context.profile, context.registry, context.turn);
        let completion = self
            .client
            .complete(&prompt, &context.profile.model)
            .await
            .map_err(|error| PlannerError::Unavailable(format!("{error:#}")))?;
        tracing::debug!(
            event_name = "planner.completion_received",
            correlation_id = %context.turn.id.0,
            chars = completion.len(),
            "planner completion received"
        );
        parse_completion(&completion, context.registry)
    }
}

/// Text between `<tag>` and `</tag>`; a missing close tag runs to the end,
/// since stop sequences cut the closing tag off.
fn tag_body<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let start = text.find(&open)? + open.len();
    let rest = &text[start..];
    let end = rest.find(&format!("</{tag}>")).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn typed_value(raw: &str, declared: Option<ParamType>) -> ParamValue {
    let text = unescape(raw.trim());
    match declared {
        Some(ParamType::StringArray) => {
            let values = serde_json::from_str::<Vec<String>>(&text).unwrap_or_else(|_| {
                text.split(',')
                    .map(|item| item.trim().trim_matches(['"', '\'']).to_string())
                    .filter(|item| !item.is_empty())
                    .collect()
            });
            ParamValue::StringArray(values)
        }
        Some(ParamType::Number) => {
            text.parse::<f64>().map(ParamValue::Number).unwrap_or(ParamValue::String(text))
        }
        Some(ParamType::Boolean) => match text.to_ascii_lowercase().as_str() {
            "true" => ParamValue::Boolean(true),
            "false" => ParamValue::Boolean(false),
            _ => ParamValue::String(text),
        },
        Some(ParamType::String) | None => ParamValue::String(text),
    }
}

/// Parameters as `<name>value</name>` pairs, in order of appearance.
fn parse_parameters(body: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = body;
    while let Some(open) = rest.find('<') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            break;
        };
        let name = &after[..close];
        let valid = !name.is_empty()
            && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        let after_open = &after[close + 1..];
        if !valid {
            rest = after_open;
            continue;
        }
        let closing = format!("</{name}>");
        let Some(end) = after_open.find(&closing) else {
            break;
        };
        params.push((name.to_string(), after_open[..end].to_string()));
        rest = &after_open[end + closing.len()..];
    }
    params
}

pub fn parse_completion(
    completion: &str,
    registry: &ToolRegistry,
) -> Result<PlannerOutput, PlannerError> {
    let reasoning = tag_body(completion, "thinking")
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string);

    if let Some(answer) = tag_body(completion, "answer") {
        return Ok(PlannerOutput::Answer { reasoning, text: answer.trim().to_string() });
    }

    if let Some(block) = tag_body(completion, "function_calls") {
        let mut calls = Vec::new();
        for invoke in block.split("<invoke>").skip(1) {
            let invoke = invoke.split("</invoke>").next().unwrap_or(invoke);
            let tool = tag_body(invoke, "tool_name")
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| PlannerError::Malformed("invoke without tool_name".to_string()))?;
            let spec = registry.get(tool);

            let params = tag_body(invoke, "parameters")
                .map(parse_parameters)
                .unwrap_or_default()
                .into_iter()
                .map(|(name, raw)| {
                    let declared =
                        spec.and_then(|spec| spec.param(&name)).map(|param| param.param_type);
                    let value = typed_value(&raw, declared);
                    (name, value)
                })
                .collect::<BTreeMap<_, _>>();

            calls.push(ToolCall { call_id: String::new(), tool: tool.to_string(), params });
        }
        if calls.is_empty() {
            return Err(PlannerError::Malformed("function_calls block without invoke".to_string()));
        }
        return Ok(PlannerOutput::Calls { reasoning, calls });
    }

    let stripped = match completion.rfind("</thinking>") {
        Some(end) => &completion[end + "</thinking>".len()..],
        None => completion,
    }
    .trim();
    if stripped.is_empty() {
        return Err(PlannerError::Malformed("completion carried neither calls nor an answer".to_string()));
    }
    Ok(PlannerOutput::Answer { reasoning, text: stripped.to_string() })
}
