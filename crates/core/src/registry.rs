//! Static catalog of tools the planner may call.
//!
//! The registry is built once at startup from an agent profile and is shared
//! read-only across turns. Every planned call is validated against its
//! declared schema before it can reach the safety guard or a store.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::tool::{ParamType, ToolCall};

pub const LIST_TABLES: &str = "list_tables";
pub const DESCRIBE_TABLES: &str = "describe_tables";
pub const EXECUTE_STATEMENT: &str = "execute_statement";
pub const RETRIEVE: &str = "retrieve";
pub const SUGGEST_QUESTIONS: &str = "suggest_questions";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: true,
            description: description.to_string(),
        }
    }

    fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self { required: false, ..Self::required(name, param_type, description) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|param| param.name == name)
    }
}

pub fn builtin_catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: LIST_TABLES.to_string(),
            description: "List the tables available in the maintenance database".to_string(),
            params: Vec::new(),
        },
        ToolSpec {
            name: DESCRIBE_TABLES.to_string(),
            description: "Get column-level details (name, type, nullability) for tables"
                .to_string(),
            params: vec![ParamSpec::required(
                "tables",
                ParamType::StringArray,
                "Names of the tables to describe",
            )],
        },
        ToolSpec {
            name: EXECUTE_STATEMENT.to_string(),
            description: "Run a single SQL statement against the maintenance database"
                .to_string(),
            params: vec![ParamSpec::required(
                "sql_statement",
                ParamType::String,
                "The SQL statement to run",
            )],
        },
        ToolSpec {
            name: RETRIEVE.to_string(),
            description: "Search the document knowledge base and return cited passages"
                .to_string(),
            params: vec![
                ParamSpec::required("query", ParamType::String, "Free-text search query"),
                ParamSpec::optional(
                    "collection",
                    ParamType::String,
                    "Knowledge collection to search; defaults to the agent's collection",
                ),
            ],
        },
        ToolSpec {
            name: SUGGEST_QUESTIONS.to_string(),
            description: "Get example questions to offer when a request is too vague".to_string(),
            params: vec![ParamSpec::optional(
                "category",
                ParamType::String,
                "Optional topic to filter suggestions by",
            )],
        },
    ]
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool `{0}` is registered more than once")]
    DuplicateTool(String),
    #[error("tool `{0}` is not part of the built-in catalog")]
    UnknownTool(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("unknown tool `{tool}`")]
    UnknownTool { tool: String },
    #[error("tool `{tool}` has no parameter `{param}`")]
    UnknownParameter { tool: String, param: String },
    #[error("tool `{tool}` requires parameter `{param}`")]
    MissingParameter { tool: String, param: String },
    #[error("parameter `{param}` of `{tool}` must be {expected}, got {found}")]
    TypeMismatch { tool: String, param: String, expected: ParamType, found: ParamType },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn from_specs(specs: Vec<ToolSpec>) -> Result<Self, RegistryError> {
        let mut seen = BTreeSet::new();
        for spec in &specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(RegistryError::DuplicateTool(spec.name.clone()));
            }
        }
        Ok(Self { specs })
    }

    /// Selects tools from the built-in catalog, keeping the requested order.
    pub fn from_enabled<S>(names: &[S]) -> Result<Self, RegistryError>
    where
        S: AsRef<str>,
    {
        let catalog = builtin_catalog();
        let specs = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                catalog
                    .iter()
                    .find(|spec| spec.name == name)
                    .cloned()
                    .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_specs(specs)
    }

    pub fn describe(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn validate(&self, call: &ToolCall) -> Result<(), ToolCallError> {
        let spec = self
            .get(&call.tool)
            .ok_or_else(|| ToolCallError::UnknownTool { tool: call.tool.clone() })?;

        for (name, value) in &call.params {
            let param = spec.param(name).ok_or_else(|| ToolCallError::UnknownParameter {
                tool: call.tool.clone(),
                param: name.clone(),
            })?;
            let found = value.param_type();
            if found != param.param_type {
                return Err(ToolCallError::TypeMismatch {
                    tool: call.tool.clone(),
                    param: name.clone(),
                    expected: param.param_type,
                    found,
                });
            }
        }

        if let Some(missing) =
            spec.params.iter().find(|param| param.required && !call.params.contains_key(&param.name))
        {
            return Err(ToolCallError::MissingParameter {
                tool: call.tool.clone(),
                param: missing.name.clone(),
            });
        }

        Ok(())
    }
}
