use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::AgentProfile;
use crate::reconcile::MatchPolicy;
use crate::registry::{ToolRegistry, EXECUTE_STATEMENT};
use crate::stores::CollectionId;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub knowledge: KnowledgeConfig,
    pub agents: BTreeMap<String, AgentProfile>,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct KnowledgeConfig {
    /// Root holding one sub-directory per collection.
    pub documents_dir: Option<PathBuf>,
    pub top_k: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub documents_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("unknown agent profile `{0}`")]
    UnknownAgent(String),
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://plantwise.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                max_retries: 2,
            },
            knowledge: KnowledgeConfig { documents_dir: None, top_k: 5 },
            agents: AgentProfile::builtin()
                .into_iter()
                .map(|profile| (profile.name.clone(), profile))
                .collect(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("plantwise.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn agent(&self, name: &str) -> Result<&AgentProfile, ConfigError> {
        self.agents.get(name).ok_or_else(|| ConfigError::UnknownAgent(name.to_string()))
    }

    /// Agent profile with the model id resolved against `llm.model`.
    pub fn resolved_agent(&self, name: &str) -> Result<AgentProfile, ConfigError> {
        let mut profile = self.agent(name)?.clone();
        if profile.model.model_id.is_none() {
            profile.model.model_id = Some(self.llm.model.clone());
        }
        Ok(profile)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(knowledge) = patch.knowledge {
            if let Some(documents_dir) = knowledge.documents_dir {
                self.knowledge.documents_dir = Some(documents_dir);
            }
            if let Some(top_k) = knowledge.top_k {
                self.knowledge.top_k = top_k;
            }
        }

        for (name, agent) in patch.agents {
            let profile = self
                .agents
                .entry(name.clone())
                .or_insert_with(|| AgentProfile::knowledge_only(name.clone(), name.clone()));
            agent.apply_to(profile);
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PLANTWISE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PLANTWISE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("PLANTWISE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PLANTWISE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("PLANTWISE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PLANTWISE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("PLANTWISE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PLANTWISE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("PLANTWISE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("PLANTWISE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("PLANTWISE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PLANTWISE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_env("PLANTWISE_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("PLANTWISE_KNOWLEDGE_DOCUMENTS_DIR") {
            self.knowledge.documents_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("PLANTWISE_KNOWLEDGE_TOP_K") {
            self.knowledge.top_k = parse_env("PLANTWISE_KNOWLEDGE_TOP_K", &value)?;
        }

        let log_level =
            read_env("PLANTWISE_LOGGING_LEVEL").or_else(|| read_env("PLANTWISE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PLANTWISE_LOGGING_FORMAT").or_else(|| read_env("PLANTWISE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(documents_dir) = overrides.documents_dir {
            self.knowledge.documents_dir = Some(documents_dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_knowledge(&self.knowledge)?;
        for (name, profile) in &self.agents {
            validate_agent(name, profile)?;
        }
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("plantwise.toml"), PathBuf::from("config/plantwise.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_knowledge(knowledge: &KnowledgeConfig) -> Result<(), ConfigError> {
    if knowledge.top_k == 0 {
        return Err(ConfigError::Validation(
            "knowledge.top_k must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_agent(name: &str, profile: &AgentProfile) -> Result<(), ConfigError> {
    if profile.name != name {
        return Err(ConfigError::Validation(format!(
            "agents.{name}.name must match its table key (found `{}`)",
            profile.name
        )));
    }

    if profile.tools.is_empty() {
        return Err(ConfigError::Validation(format!("agents.{name}.tools must not be empty")));
    }
    ToolRegistry::from_enabled(&profile.tools)
        .map_err(|error| ConfigError::Validation(format!("agents.{name}.tools: {error}")))?;

    if profile.max_steps == 0 {
        return Err(ConfigError::Validation(format!(
            "agents.{name}.max_steps must be greater than zero"
        )));
    }

    if profile.tool_timeout_secs == 0 || profile.tool_timeout_secs > 300 {
        return Err(ConfigError::Validation(format!(
            "agents.{name}.tool_timeout_secs must be in range 1..=300"
        )));
    }

    if profile.retrieve_limit == 0 {
        return Err(ConfigError::Validation(format!(
            "agents.{name}.retrieve_limit must be greater than zero"
        )));
    }

    if !profile.match_policy.is_valid() {
        return Err(ConfigError::Validation(format!(
            "agents.{name}.match_policy.min_similarity must be in range (0, 1]"
        )));
    }

    if profile.uses_tool(EXECUTE_STATEMENT) {
        if profile.subject_columns.is_empty() {
            return Err(ConfigError::Validation(format!(
                "agents.{name}.subject_columns must name at least one column when \
                 execute_statement is enabled"
            )));
        }
        let audit = &profile.audit;
        let blank = [
            &audit.actor,
            &audit.insert_actor_column,
            &audit.insert_timestamp_column,
            &audit.update_actor_column,
            &audit.update_timestamp_column,
        ]
        .iter()
        .any(|value| value.trim().is_empty());
        if blank {
            return Err(ConfigError::Validation(format!(
                "agents.{name}.audit columns and actor must not be empty"
            )));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    knowledge: Option<KnowledgePatch>,
    #[serde(default)]
    agents: BTreeMap<String, AgentPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgePatch {
    documents_dir: Option<PathBuf>,
    top_k: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    description: Option<String>,
    instruction: Option<String>,
    guidelines: Option<Vec<String>>,
    model_id: Option<String>,
    stop_sequences: Option<Vec<String>>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    top_k: Option<u32>,
    top_p: Option<f32>,
    tools: Option<Vec<String>>,
    collection: Option<String>,
    max_steps: Option<usize>,
    tool_timeout_secs: Option<u64>,
    retry_backoff_ms: Option<u64>,
    retrieve_limit: Option<usize>,
    audit_actor: Option<String>,
    subject_columns: Option<Vec<String>>,
    match_policy: Option<MatchPolicy>,
    sample_questions: Option<Vec<String>>,
}

impl AgentPatch {
    fn apply_to(self, profile: &mut AgentProfile) {
        if let Some(description) = self.description {
            profile.description = description;
        }
        if let Some(instruction) = self.instruction {
            profile.instruction = instruction;
        }
        if let Some(guidelines) = self.guidelines {
            profile.guidelines = guidelines;
        }
        if let Some(model_id) = self.model_id {
            profile.model.model_id = Some(model_id);
        }
        if let Some(stop_sequences) = self.stop_sequences {
            profile.model.stop_sequences = stop_sequences;
        }
        if let Some(max_tokens) = self.max_tokens {
            profile.model.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            profile.model.temperature = temperature;
        }
        if let Some(top_k) = self.top_k {
            profile.model.top_k = Some(top_k);
        }
        if let Some(top_p) = self.top_p {
            profile.model.top_p = Some(top_p);
        }
        if let Some(tools) = self.tools {
            profile.tools = tools;
        }
        if let Some(collection) = self.collection {
            profile.collection = CollectionId::new(collection);
        }
        if let Some(max_steps) = self.max_steps {
            profile.max_steps = max_steps;
        }
        if let Some(tool_timeout_secs) = self.tool_timeout_secs {
            profile.tool_timeout_secs = tool_timeout_secs;
        }
        if let Some(retry_backoff_ms) = self.retry_backoff_ms {
            profile.retry_backoff_ms = retry_backoff_ms;
        }
        if let Some(retrieve_limit) = self.retrieve_limit {
            profile.retrieve_limit = retrieve_limit;
        }
        if let Some(audit_actor) = self.audit_actor {
            profile.audit.actor = audit_actor;
        }
        if let Some(subject_columns) = self.subject_columns {
            profile.subject_columns = subject_columns;
        }
        if let Some(match_policy) = self.match_policy {
            profile.match_policy = match_policy;
        }
        if let Some(sample_questions) = self.sample_questions {
            profile.sample_questions = sample_questions;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
