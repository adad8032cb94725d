use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use plantwise_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: Option<&str>| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", Some("PLANTWISE_DATABASE_URL")),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", Some("PLANTWISE_DATABASE_MAX_CONNECTIONS")),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", Some("PLANTWISE_DATABASE_TIMEOUT_SECS")),
    ));

    lines.push(render_line(
        "llm.provider",
        &format!("{:?}", config.llm.provider),
        source("llm.provider", Some("PLANTWISE_LLM_PROVIDER")),
    ));
    lines.push(render_line(
        "llm.model",
        &config.llm.model,
        source("llm.model", Some("PLANTWISE_LLM_MODEL")),
    ));
    lines.push(render_line(
        "llm.base_url",
        config.llm.base_url.as_deref().unwrap_or("<unset>"),
        source("llm.base_url", Some("PLANTWISE_LLM_BASE_URL")),
    ));
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line(
        "llm.api_key",
        llm_api_key,
        source("llm.api_key", Some("PLANTWISE_LLM_API_KEY")),
    ));
    lines.push(render_line(
        "llm.timeout_secs",
        &config.llm.timeout_secs.to_string(),
        source("llm.timeout_secs", Some("PLANTWISE_LLM_TIMEOUT_SECS")),
    ));
    lines.push(render_line(
        "llm.max_retries",
        &config.llm.max_retries.to_string(),
        source("llm.max_retries", Some("PLANTWISE_LLM_MAX_RETRIES")),
    ));

    let documents_dir = config
        .knowledge
        .documents_dir
        .as_ref()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|| "<bundled fixtures>".to_string());
    lines.push(render_line(
        "knowledge.documents_dir",
        &documents_dir,
        source("knowledge.documents_dir", Some("PLANTWISE_KNOWLEDGE_DOCUMENTS_DIR")),
    ));
    lines.push(render_line(
        "knowledge.top_k",
        &config.knowledge.top_k.to_string(),
        source("knowledge.top_k", Some("PLANTWISE_KNOWLEDGE_TOP_K")),
    ));

    for (name, profile) in &config.agents {
        let key = format!("agents.{name}");
        let summary = format!(
            "tools=[{}] collection={} max_steps={}",
            profile.tools.join(", "),
            profile.collection,
            profile.max_steps
        );
        lines.push(render_line(&key, &summary, source(&key, None)));
    }

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", Some("PLANTWISE_LOGGING_LEVEL")),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", Some("PLANTWISE_LOGGING_FORMAT")),
    ));

    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("plantwise.toml"), PathBuf::from("config/plantwise.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
