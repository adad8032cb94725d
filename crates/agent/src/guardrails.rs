use std::sync::OnceLock;

use plantwise_core::domain::tool::ToolCall;
use plantwise_core::registry::EXECUTE_STATEMENT;
use plantwise_core::sql::destructive_verb;
use regex::Regex;

pub const DESTRUCTIVE_SQL: &str = "destructive_sql";
pub const CREDENTIAL_DISCLOSURE: &str = "credential_disclosure";
pub const SYSTEM_HALT: &str = "system_halt";
pub const INTERNAL_ERROR_DETAIL: &str = "internal_error_detail";

const INACTIVE_INSTEAD: &str = "I can mark the record inactive instead (for example by setting its \
                                status to 'inactive'), which keeps its maintenance history \
                                available for audits.";
const CREDENTIAL_ALTERNATIVE: &str = "Please ask your system administrator or use the approved \
                                      access-request process for credentials.";
const HALT_ALTERNATIVE: &str = "Please follow the plant's shutdown procedure with the control room \
                                and the unit supervisor. I can help you find the relevant \
                                procedure or equipment records.";
const PLAIN_GUIDANCE: &str = "I'm sorry, I ran into a problem while looking that up. Could you \
                              rephrase the question, for example naming a specific unit or \
                              piece of equipment?";

/// What to do with a planned call or a drafted answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block { reason_code: &'static str, user_message: String, suggestion: String },
    /// Only produced for answers; calls are never rewritten.
    Rewrite { reason_code: &'static str, replacement: String },
}

impl Verdict {
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Block { reason_code, .. } | Self::Rewrite { reason_code, .. } => {
                Some(*reason_code)
            }
        }
    }
}

fn credential_request() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)\b(passwords?|passwd|credentials?|secrets?|api[ _-]?keys?|access[ _-]?tokens?|private[ _-]?keys?|secret[ _-]?arn)\b",
            )
            .ok()
        })
        .as_ref()
}

fn credential_value() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)\b(password|passwd|secret|api[ _-]?key|access[ _-]?token)\s*(?:is|:|=)\s*\S+",
            )
            .ok()
        })
        .as_ref()
}

fn halt_instruction() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)\b(?:(?:disable|deactivate|bypass|override|defeat|turn\s+off|switch\s+off|shut\s*off)\b.{0,40}\b(?:safety|alarms?|interlocks?|sis|esd|scada|controllers?|systems?|relief\s+valves?)\b|(?:halt|shut\s*down|stop)\s+(?:all|the|every)\s+(?:plant|systems?|units?|operations?|production)\b)",
            )
            .ok()
        })
        .as_ref()
}

fn internal_detail() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r#"(?i)(sqlstate|error returned from database|syntax error at or near|near "[^"]*": syntax error|no such (?:column|table)|datatype mismatch|sqlx::|stack backtrace|panicked at|\bat [\w/]+\.rs:\d+|\b(?:postgres(?:ql)?|sqlite|mysql)://\S+|_sqlx_migrations)"#,
            )
            .ok()
        })
        .as_ref()
}

fn matches(pattern: Option<&'static Regex>, text: &str) -> bool {
    pattern.is_some_and(|regex| regex.is_match(text))
}

/// Stateless rule set applied to every planned call and every drafted answer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SafetyGuard;

impl SafetyGuard {
    pub fn new() -> Self {
        Self
    }

    /// Rules in priority order: destructive SQL, then credential or halt
    /// requests carried in any string parameter.
    pub fn evaluate_call(&self, call: &ToolCall) -> Verdict {
        if call.tool == EXECUTE_STATEMENT {
            if let Some(verb) = call.param_str("sql_statement").and_then(destructive_verb) {
                return Verdict::Block {
                    reason_code: DESTRUCTIVE_SQL,
                    user_message: format!(
                        "I can't run {verb} statements against the maintenance database."
                    ),
                    suggestion: INACTIVE_INSTEAD.to_string(),
                };
            }
        }

        for value in call.string_values() {
            if matches(credential_request(), value) {
                return Verdict::Block {
                    reason_code: CREDENTIAL_DISCLOSURE,
                    user_message: "I can't look up or share passwords, keys or other credentials."
                        .to_string(),
                    suggestion: CREDENTIAL_ALTERNATIVE.to_string(),
                };
            }
            if matches(halt_instruction(), value) {
                return Verdict::Block {
                    reason_code: SYSTEM_HALT,
                    user_message: "I can't help stop, disable or bypass plant systems.".to_string(),
                    suggestion: HALT_ALTERNATIVE.to_string(),
                };
            }
        }

        Verdict::Allow
    }

    pub fn evaluate_answer(&self, draft: &str) -> Verdict {
        if matches(credential_value(), draft) {
            return Verdict::Block {
                reason_code: CREDENTIAL_DISCLOSURE,
                user_message: "I can't share passwords, keys or other credentials.".to_string(),
                suggestion: CREDENTIAL_ALTERNATIVE.to_string(),
            };
        }
        if matches(halt_instruction(), draft) {
            return Verdict::Block {
                reason_code: SYSTEM_HALT,
                user_message: "I can't give instructions to stop, disable or bypass plant systems."
                    .to_string(),
                suggestion: HALT_ALTERNATIVE.to_string(),
            };
        }
        if matches(internal_detail(), draft) {
            let kept = draft
                .lines()
                .filter(|line| !matches(internal_detail(), line))
                .collect::<Vec<_>>()
                .join("\n");
            let kept = kept.trim();
            let replacement = if kept.is_empty() {
                PLAIN_GUIDANCE.to_string()
            } else if kept.contains(PLAIN_GUIDANCE) {
                kept.to_string()
            } else {
                format!("{kept}\n\n{PLAIN_GUIDANCE}")
            };
            return Verdict::Rewrite { reason_code: INTERNAL_ERROR_DETAIL, replacement };
        }
        Verdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use plantwise_core::domain::tool::ToolCall;

    use super::{
        SafetyGuard, Verdict, CREDENTIAL_DISCLOSURE, DESTRUCTIVE_SQL, INTERNAL_ERROR_DETAIL,
        SYSTEM_HALT,
    };

    fn statement(sql: &str) -> ToolCall {
        ToolCall::new("execute_statement").with_param("sql_statement", sql)
    }

    #[test]
    fn destructive_statement_is_blocked_with_alternative() {
        let verdict = SafetyGuard::new()
            .evaluate_call(&statement("DELETE FROM maintenance WHERE equipid = 'K-901'"));

        let (reason_code, suggestion) = match verdict {
            Verdict::Block { reason_code, suggestion, .. } => (reason_code, suggestion),
            _ => ("", String::new()),
        };
        assert_eq!(reason_code, DESTRUCTIVE_SQL);
        assert!(suggestion.contains("inactive"));
    }

    #[test]
    fn keywords_inside_literals_are_allowed() {
        let verdict = SafetyGuard::new().evaluate_call(&statement(
            "SELECT maintname FROM maintenance WHERE maintname = 'drop test of relief valve'",
        ));
        assert_eq!(verdict, Verdict::Allow);
    }

    #[test]
    fn destructive_rule_outranks_credential_rule() {
        let verdict = SafetyGuard::new().evaluate_call(&statement("DROP TABLE passwords"));
        assert_eq!(verdict.reason_code(), Some(DESTRUCTIVE_SQL));
    }

    #[test]
    fn credential_and_halt_requests_are_blocked_in_any_parameter() {
        let guard = SafetyGuard::new();
        let credentials =
            guard.evaluate_call(&ToolCall::new("retrieve").with_param("query", "database admin password"));
        assert_eq!(credentials.reason_code(), Some(CREDENTIAL_DISCLOSURE));

        let halt = guard.evaluate_call(
            &ToolCall::new("retrieve").with_param("query", "how to disable the safety interlocks on R-901"),
        );
        assert_eq!(halt.reason_code(), Some(SYSTEM_HALT));

        let allowed = guard.evaluate_call(
            &ToolCall::new("retrieve").with_param("query", "why was the crude unit shut down"),
        );
        assert_eq!(allowed, Verdict::Allow);
    }

    #[test]
    fn internal_error_detail_is_rewritten() {
        let draft = "Here is what I found.\nerror returned from database: near \"SELEC\": syntax error";
        let verdict = SafetyGuard::new().evaluate_answer(draft);
        let replacement = match verdict {
            Verdict::Rewrite { reason_code, replacement } => {
                assert_eq!(reason_code, INTERNAL_ERROR_DETAIL);
                replacement
            }
            other => panic!("expected rewrite, got {other:?}"),
        };
        assert!(replacement.starts_with("Here is what I found."));
        assert!(!replacement.contains("SELEC"));
    }

    #[test]
    fn plain_answers_pass() {
        let verdict =
            SafetyGuard::new().evaluate_answer("The biodiesel unit has 2 tanks: K-901 and K-902.");
        assert_eq!(verdict, Verdict::Allow);
    }
}
