use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorKind;

/// Declared type of a tool parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    #[serde(rename = "array")]
    StringArray,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::StringArray => "array",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameter value as produced by the planner. Only these four shapes cross
/// the tool-invocation boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Boolean(bool),
    Number(f64),
    String(String),
    StringArray(Vec<String>),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::Boolean(_) => ParamType::Boolean,
            Self::Number(_) => ParamType::Number,
            Self::String(_) => ParamType::String,
            Self::StringArray(_) => ParamType::StringArray,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_string_array(&self) -> Option<&[String]> {
        match self {
            Self::StringArray(values) => Some(values),
            _ => None,
        }
    }

    /// Text rendering used when the call is echoed back to the planner.
    pub fn render(&self) -> String {
        match self {
            Self::Boolean(value) => value.to_string(),
            Self::Number(value) => value.to_string(),
            Self::String(value) => value.clone(),
            Self::StringArray(values) => {
                serde_json::to_string(values).unwrap_or_else(|_| values.join(","))
            }
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(values: Vec<String>) -> Self {
        Self::StringArray(values)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub call_id: String,
    pub tool: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { call_id: String::new(), tool: tool.into(), params: BTreeMap::new() }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(ParamValue::as_str)
    }

    pub fn param_strings(&self, name: &str) -> Option<&[String]> {
        self.params.get(name).and_then(ParamValue::as_string_array)
    }

    pub fn string_values(&self) -> impl Iterator<Item = &str> {
        self.params.values().flat_map(|value| match value {
            ParamValue::String(text) => vec![text.as_str()],
            ParamValue::StringArray(values) => values.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

pub type Row = BTreeMap<String, Value>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub location: Option<String>,
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} ({location})", self.source),
            None => f.write_str(&self.source),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub citation: Citation,
    pub score: f64,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ToolOutput {
    Tables(BTreeSet<String>),
    Columns(BTreeMap<String, Vec<ColumnSpec>>),
    Rows(RowSet),
    Passages(Vec<Passage>),
    Suggestions(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub suggestion: Option<String>,
}

impl ToolFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), suggestion: None }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { output: ToolOutput },
    Failure { failure: ToolFailure },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call: ToolCall,
    pub outcome: ToolOutcome,
    /// Executions that reached a store, including local retries.
    pub attempts: u32,
}

impl ToolResult {
    pub fn success(call: ToolCall, output: ToolOutput, attempts: u32) -> Self {
        Self { call, outcome: ToolOutcome::Success { output }, attempts }
    }

    pub fn failure(call: ToolCall, failure: ToolFailure, attempts: u32) -> Self {
        Self { call, outcome: ToolOutcome::Failure { failure }, attempts }
    }

    pub fn output(&self) -> Option<&ToolOutput> {
        match &self.outcome {
            ToolOutcome::Success { output } => Some(output),
            ToolOutcome::Failure { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            ToolOutcome::Success { .. } => None,
            ToolOutcome::Failure { failure } => Some(failure.kind),
        }
    }

    pub fn failure_detail(&self) -> Option<&ToolFailure> {
        match &self.outcome {
            ToolOutcome::Success { .. } => None,
            ToolOutcome::Failure { failure } => Some(failure),
        }
    }
}
