use plantwise_core::config::{AppConfig, LlmProvider, LoadOptions};
use plantwise_db::{connect, ping};
use serde::Serialize;

use crate::commands::load_knowledge;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: &LoadOptions, json_output: bool) -> String {
    let report = build_report(options);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(options: &LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options.clone()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_readiness(&config));
            checks.extend(check_stores(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["llm_readiness", "knowledge_store", "database_connectivity"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_readiness(config: &AppConfig) -> DoctorCheck {
    let needs_key = matches!(config.llm.provider, LlmProvider::OpenAi | LlmProvider::Anthropic);
    if needs_key && config.llm.api_key.is_none() {
        return DoctorCheck {
            name: "llm_readiness",
            status: CheckStatus::Fail,
            details: format!("{:?} requires llm.api_key", config.llm.provider),
        };
    }
    DoctorCheck {
        name: "llm_readiness",
        status: CheckStatus::Pass,
        details: format!("{:?} model `{}`", config.llm.provider, config.llm.model),
    }
}

fn check_stores(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let details = format!("failed to initialize async runtime: {error}");
            return vec![
                DoctorCheck {
                    name: "knowledge_store",
                    status: CheckStatus::Fail,
                    details: details.clone(),
                },
                DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details },
            ];
        }
    };

    runtime.block_on(async {
        let knowledge = match load_knowledge(config.knowledge.documents_dir.as_deref()).await {
            Ok(store) => {
                let collections = store
                    .collections()
                    .map(|(collection, documents)| format!("{collection} ({documents})"))
                    .collect::<Vec<_>>();
                let missing = config
                    .agents
                    .values()
                    .filter(|profile| {
                        !store.collections().any(|(collection, _)| *collection == profile.collection)
                    })
                    .map(|profile| profile.name.clone())
                    .collect::<Vec<_>>();
                if missing.is_empty() {
                    DoctorCheck {
                        name: "knowledge_store",
                        status: CheckStatus::Pass,
                        details: format!("collections: {}", collections.join(", ")),
                    }
                } else {
                    DoctorCheck {
                        name: "knowledge_store",
                        status: CheckStatus::Fail,
                        details: format!("no collection for agents: {}", missing.join(", ")),
                    }
                }
            }
            Err(error) => DoctorCheck {
                name: "knowledge_store",
                status: CheckStatus::Fail,
                details: error.to_string(),
            },
        };

        let database = match connect(&config.database).await {
            Ok(pool) => {
                let check = match ping(&pool).await {
                    Ok(()) => DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Pass,
                        details: format!("connected using `{}`", config.database.url),
                    },
                    Err(error) => DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("database did not answer: {error}"),
                    },
                };
                pool.close().await;
                check
            }
            Err(error) => DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to connect to database: {error}"),
            },
        };

        vec![knowledge, database]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
