//! Static analysis and mechanical rewrites of agent-issued SQL.
//!
//! Nothing here talks to a database. The guard and the SQL executor use
//! these helpers to enforce the hard rules (no destructive verbs, a single
//! statement, audit columns on writes) and the loop uses the rewrites for
//! its bounded local retries.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Verbs that are never allowed to reach the store.
const DESTRUCTIVE_VERBS: &[&str] = &["DELETE", "DROP", "TRUNCATE"];

/// Verbs that can follow a `WITH` clause and decide what the statement does.
const MAIN_VERBS: &[&str] = &["SELECT", "VALUES", "INSERT", "REPLACE", "UPDATE", "DELETE"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    Query,
    Insert,
    Update,
    Delete,
    Ddl,
    Other,
}

impl StatementKind {
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

/// Columns every agent-issued write must stamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditColumns {
    pub actor: String,
    pub insert_actor_column: String,
    pub insert_timestamp_column: String,
    pub update_actor_column: String,
    pub update_timestamp_column: String,
}

impl Default for AuditColumns {
    fn default() -> Self {
        Self {
            actor: "MaintAgent".to_string(),
            insert_actor_column: "createdby".to_string(),
            insert_timestamp_column: "createddate".to_string(),
            update_actor_column: "updatedby".to_string(),
            update_timestamp_column: "updateddate".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Literal,
    Symbol(char),
}

impl Token {
    fn is_word(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(word) if word.eq_ignore_ascii_case(keyword))
    }
}

fn tokenize(sql: &str) -> Vec<Token> {
    let chars = sql.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        if ch.is_whitespace() {
            index += 1;
        } else if ch == '-' && chars.get(index + 1) == Some(&'-') {
            while index < chars.len() && chars[index] != '\n' {
                index += 1;
            }
        } else if ch == '/' && chars.get(index + 1) == Some(&'*') {
            index += 2;
            while index < chars.len()
                && !(chars[index] == '*' && chars.get(index + 1) == Some(&'/'))
            {
                index += 1;
            }
            index += 2;
        } else if ch == '\'' {
            index += 1;
            while index < chars.len() {
                if chars[index] == '\'' {
                    if chars.get(index + 1) == Some(&'\'') {
                        index += 2;
                        continue;
                    }
                    break;
                }
                index += 1;
            }
            index += 1;
            tokens.push(Token::Literal);
        } else if ch == '"' || ch == '`' {
            let start = index + 1;
            index = start;
            while index < chars.len() && chars[index] != ch {
                index += 1;
            }
            let end = index.min(chars.len());
            tokens.push(Token::Word(chars[start..end].iter().collect()));
            index += 1;
        } else if ch.is_alphanumeric() || ch == '_' {
            let start = index;
            while index < chars.len() && (chars[index].is_alphanumeric() || chars[index] == '_') {
                index += 1;
            }
            tokens.push(Token::Word(chars[start..index].iter().collect()));
        } else {
            tokens.push(Token::Symbol(ch));
            index += 1;
        }
    }

    tokens
}

fn statements(tokens: &[Token]) -> Vec<&[Token]> {
    tokens
        .split(|token| *token == Token::Symbol(';'))
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Collapses newlines and trailing terminators the planner tends to emit.
pub fn normalize_statement(sql: &str) -> String {
    let collapsed = sql.replace(['\r', '\n'], " ");
    collapsed.trim().trim_end_matches(';').trim_end().to_string()
}

pub fn statement_count(sql: &str) -> usize {
    statements(&tokenize(sql)).len()
}

/// Position of the verb that decides what a statement does. A leading
/// `WITH` clause is skipped, including its parenthesised definitions.
fn main_verb_index(statement: &[Token]) -> Option<usize> {
    if !statement.first()?.is_word("WITH") {
        return Some(0);
    }
    let mut depth = 0usize;
    for (index, token) in statement.iter().enumerate().skip(1) {
        match token {
            Token::Symbol('(') => depth += 1,
            Token::Symbol(')') => depth = depth.saturating_sub(1),
            Token::Word(_) if depth == 0 && MAIN_VERBS.iter().any(|verb| token.is_word(verb)) => {
                return Some(index);
            }
            _ => {}
        }
    }
    None
}

fn classify_tokens(statement: &[Token]) -> StatementKind {
    let Some(Token::Word(verb)) = main_verb_index(statement).and_then(|index| statement.get(index))
    else {
        return StatementKind::Other;
    };
    match verb.to_ascii_uppercase().as_str() {
        "SELECT" | "VALUES" | "PRAGMA" | "EXPLAIN" | "SHOW" => StatementKind::Query,
        "INSERT" | "REPLACE" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" => StatementKind::Ddl,
        _ => StatementKind::Other,
    }
}

pub fn classify(sql: &str) -> StatementKind {
    let tokens = tokenize(sql);
    statements(&tokens).first().map_or(StatementKind::Other, |statement| classify_tokens(statement))
}

/// `OR REPLACE` conflict clause, which deletes the conflicting row. A
/// `replace(...)` call after `OR` is the string function.
fn has_replace_conflict_clause(statement: &[Token]) -> bool {
    statement.iter().enumerate().any(|(index, token)| {
        token.is_word("OR")
            && statement.get(index + 1).is_some_and(|next| next.is_word("REPLACE"))
            && statement.get(index + 2) != Some(&Token::Symbol('('))
    })
}

/// First destructive verb found outside literals and comments.
pub fn destructive_verb(sql: &str) -> Option<&'static str> {
    let tokens = tokenize(sql);
    for statement in statements(&tokens) {
        let replaces = main_verb_index(statement)
            .and_then(|index| statement.get(index))
            .is_some_and(|token| token.is_word("REPLACE"));
        if replaces || has_replace_conflict_clause(statement) {
            return Some("REPLACE");
        }
        for token in statement {
            if let Some(verb) = DESTRUCTIVE_VERBS.iter().find(|verb| token.is_word(verb)) {
                return Some(*verb);
            }
        }
    }
    None
}

/// Audit columns an INSERT or UPDATE fails to stamp. Empty for other kinds.
pub fn missing_audit_columns(sql: &str, columns: &AuditColumns) -> Vec<String> {
    let tokens = tokenize(sql);
    let Some(statement) = statements(&tokens).first().copied() else {
        return Vec::new();
    };
    let kind = classify_tokens(statement);
    let Some(verb) = main_verb_index(statement) else {
        return Vec::new();
    };
    let body = &statement[verb..];

    let (required, region): (Vec<&str>, &[Token]) = match kind {
        StatementKind::Insert => {
            let end = body
                .iter()
                .position(|token| {
                    token.is_word("VALUES") || token.is_word("SELECT") || token.is_word("DEFAULT")
                })
                .unwrap_or(body.len());
            (
                vec![columns.insert_actor_column.as_str(), columns.insert_timestamp_column.as_str()],
                &body[..end],
            )
        }
        StatementKind::Update => {
            let start = body.iter().position(|token| token.is_word("SET")).unwrap_or(body.len());
            let end = body
                .iter()
                .skip(start)
                .position(|token| {
                    token.is_word("WHERE") || token.is_word("FROM") || token.is_word("RETURNING")
                })
                .map(|offset| start + offset)
                .unwrap_or(body.len());
            (
                vec![columns.update_actor_column.as_str(), columns.update_timestamp_column.as_str()],
                &body[start..end],
            )
        }
        _ => return Vec::new(),
    };

    required
        .into_iter()
        .filter(|column| !region.iter().any(|token| token.is_word(column)))
        .map(str::to_string)
        .collect()
}

fn where_keyword() -> Option<&'static Regex> {
    static WHERE: OnceLock<Option<Regex>> = OnceLock::new();
    WHERE.get_or_init(|| Regex::new(r"(?i)\bwhere\b").ok()).as_ref()
}

fn join_or_where_keyword() -> Option<&'static Regex> {
    static CLAUSE: OnceLock<Option<Regex>> = OnceLock::new();
    CLAUSE.get_or_init(|| Regex::new(r"(?i)\b(on|where)\b").ok()).as_ref()
}

fn text_comparison() -> Option<&'static Regex> {
    static COMPARISON: OnceLock<Option<Regex>> = OnceLock::new();
    COMPARISON.get_or_init(|| {
        Regex::new(
            r"(?i)\b([a-z_][a-z0-9_]*(?:\.[a-z_][a-z0-9_]*)?)\s*(=|<>|!=|\blike\b)\s*('(?:[^']|'')*')",
        )
        .ok()
    })
    .as_ref()
}

fn any_comparison() -> Option<&'static Regex> {
    static COMPARISON: OnceLock<Option<Regex>> = OnceLock::new();
    COMPARISON.get_or_init(|| {
        Regex::new(
            r"(?i)\b([a-z_][a-z0-9_]*(?:\.[a-z_][a-z0-9_]*)?)\s*(=|<>|!=)\s*('(?:[^']|'')*'|[0-9]+(?:\.[0-9]+)?|[a-z_][a-z0-9_]*(?:\.[a-z_][a-z0-9_]*)?)(\s*\()?",
        )
        .ok()
    })
    .as_ref()
}

/// Wraps text comparisons after `WHERE` in `UPPER(...)` so a record whose
/// casing differs from the user's wording still matches.
pub fn uppercase_text_comparisons(sql: &str) -> Option<String> {
    let start = where_keyword()?.find(sql)?.start();
    let (head, tail) = sql.split_at(start);
    let rewritten = text_comparison()?.replace_all(tail, |caps: &Captures| {
        format!("UPPER({}) {} UPPER({})", &caps[1], caps[2].to_ascii_uppercase(), &caps[3])
    });
    let rewritten = format!("{head}{rewritten}");
    (rewritten != sql).then_some(rewritten)
}

/// Casts both sides of each join/filter comparison to text so mismatched
/// column types compare cleanly.
pub fn cast_comparisons_to_text(sql: &str) -> Option<String> {
    let start = join_or_where_keyword()?.find(sql)?.start();
    let (head, tail) = sql.split_at(start);
    let rewritten = any_comparison()?.replace_all(tail, |caps: &Captures| {
        if caps.get(4).is_some() {
            return caps[0].to_string();
        }
        format!("CAST({} AS TEXT) {} CAST({} AS TEXT)", &caps[1], &caps[2], &caps[3])
    });
    let rewritten = format!("{head}{rewritten}");
    (rewritten != sql).then_some(rewritten)
}

#[cfg(test)]
mod tests {
    use super::{
        cast_comparisons_to_text, classify, destructive_verb, missing_audit_columns,
        normalize_statement, statement_count, uppercase_text_comparisons, AuditColumns,
        StatementKind,
    };

    #[test]
    fn destructive_verbs_are_detected_regardless_of_case() {
        assert_eq!(destructive_verb("delete from maintenance where maintid = 7"), Some("DELETE"));
        assert_eq!(destructive_verb("DROP TABLE equipment"), Some("DROP"));
        assert_eq!(destructive_verb("  Truncate maintenance"), Some("TRUNCATE"));
        assert_eq!(
            destructive_verb("ALTER TABLE equipment DROP COLUMN safetycritical"),
            Some("DROP")
        );
        assert_eq!(
            destructive_verb("REPLACE INTO equipment (equipid) VALUES ('K-901')"),
            Some("REPLACE")
        );
        assert_eq!(
            destructive_verb("SELECT 1; DELETE FROM equipment"),
            Some("DELETE"),
            "a chained statement must not hide a destructive verb"
        );
    }

    #[test]
    fn verbs_inside_literals_and_comments_are_ignored() {
        assert_eq!(
            destructive_verb("SELECT * FROM maintenance WHERE maintname = 'Drop test of relief valve'"),
            None
        );
        assert_eq!(destructive_verb("SELECT equipid FROM equipment -- delete later"), None);
        assert_eq!(destructive_verb("SELECT /* drop */ equipid FROM equipment"), None);
        assert_eq!(destructive_verb("SELECT replace(equipname, '-', '') FROM equipment"), None);
        assert_eq!(destructive_verb("SELECT deleted_flag FROM equipment"), None);
        assert_eq!(
            destructive_verb(
                "SELECT equipid FROM equipment WHERE status = 'ACT' OR replace(equipname, '-', '') = 'K901'"
            ),
            None
        );
    }

    #[test]
    fn replace_conflict_clauses_are_destructive() {
        assert_eq!(
            destructive_verb(
                "INSERT OR REPLACE INTO equipment (equipid, equipname) VALUES ('K-901', 'Mixing Tank')"
            ),
            Some("REPLACE")
        );
        assert_eq!(
            destructive_verb("update or replace equipment set equipid = 'K-902' where equipid = 'K-901'"),
            Some("REPLACE")
        );
        assert_eq!(
            destructive_verb(
                "WITH src AS (SELECT 'K-901' AS id) REPLACE INTO equipment (equipid) SELECT id FROM src"
            ),
            Some("REPLACE")
        );
    }

    #[test]
    fn statement_count_ignores_semicolons_in_literals() {
        assert_eq!(statement_count("SELECT 'a;b' FROM equipment;"), 1);
        assert_eq!(statement_count("SELECT 1; SELECT 2"), 2);
        assert_eq!(statement_count("   "), 0);
    }

    #[test]
    fn classify_reads_leading_verb() {
        assert_eq!(classify("with t as (select 1) select * from t"), StatementKind::Query);
        assert_eq!(classify("UPDATE equipment SET status = 'ACT'"), StatementKind::Update);
        assert_eq!(classify("insert into maintenance values (1)"), StatementKind::Insert);
        assert_eq!(classify("CREATE TABLE x (id int)"), StatementKind::Ddl);
        assert_eq!(
            classify(
                "WITH t AS (SELECT maintid FROM maintenance WHERE maintid = 12) UPDATE maintenance SET statusid = 'COM' WHERE maintid IN (SELECT maintid FROM t)"
            ),
            StatementKind::Update
        );
        assert_eq!(
            classify(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 3) INSERT INTO maintenance (maintid) SELECT x FROM n"
            ),
            StatementKind::Insert
        );
        assert_eq!(classify("WITH t AS (SELECT 1)"), StatementKind::Other);
        assert!(StatementKind::Update.is_write());
        assert!(!StatementKind::Query.is_write());
    }

    #[test]
    fn normalize_collapses_newlines_and_terminator() {
        assert_eq!(
            normalize_statement("SELECT *\nFROM equipment\r\nWHERE equipid = 'K-901';\n"),
            "SELECT * FROM equipment  WHERE equipid = 'K-901'"
        );
    }

    #[test]
    fn update_without_audit_columns_is_reported() {
        let columns = AuditColumns::default();
        let missing = missing_audit_columns(
            "UPDATE maintenance SET statusid = 'COM' WHERE maintid = 12",
            &columns,
        );
        assert_eq!(missing, vec!["updatedby".to_string(), "updateddate".to_string()]);

        let stamped = missing_audit_columns(
            "UPDATE maintenance SET statusid = 'COM', updatedby = 'MaintAgent', updateddate = CURRENT_TIMESTAMP WHERE maintid = 12",
            &columns,
        );
        assert!(stamped.is_empty());
    }

    #[test]
    fn cte_prefixed_update_is_checked_from_its_set_clause() {
        let columns = AuditColumns::default();
        let missing = missing_audit_columns(
            "WITH t AS (SELECT maintid FROM maintenance WHERE maintid = 12) UPDATE maintenance SET statusid = 'COM' WHERE maintid IN (SELECT maintid FROM t)",
            &columns,
        );
        assert_eq!(missing, vec!["updatedby".to_string(), "updateddate".to_string()]);

        let stamped = missing_audit_columns(
            "WITH t AS (SELECT 12 AS id) UPDATE maintenance SET statusid = 'COM', updatedby = 'MaintAgent', updateddate = CURRENT_TIMESTAMP WHERE maintid IN (SELECT id FROM t)",
            &columns,
        );
        assert!(stamped.is_empty());
    }

    #[test]
    fn audit_column_mentioned_only_in_where_does_not_count() {
        let columns = AuditColumns::default();
        let missing = missing_audit_columns(
            "UPDATE maintenance SET statusid = 'COM', updateddate = CURRENT_TIMESTAMP WHERE updatedby = 'MaintAgent'",
            &columns,
        );
        assert_eq!(missing, vec!["updatedby".to_string()]);
    }

    #[test]
    fn insert_audit_columns_are_checked_in_column_list() {
        let columns = AuditColumns::default();
        let missing = missing_audit_columns(
            "INSERT INTO maintenance (maintname, equipid) VALUES ('createdby check', 'K-901')",
            &columns,
        );
        assert_eq!(missing, vec!["createdby".to_string(), "createddate".to_string()]);

        let stamped = missing_audit_columns(
            "INSERT INTO maintenance (maintname, equipid, createdby, createddate) VALUES ('Inspect', 'K-901', 'MaintAgent', CURRENT_TIMESTAMP)",
            &columns,
        );
        assert!(stamped.is_empty());
        assert!(missing_audit_columns("SELECT * FROM maintenance", &columns).is_empty());
    }

    #[test]
    fn uppercase_rewrite_only_touches_where_clause() {
        let rewritten = uppercase_text_comparisons(
            "UPDATE equipment SET status = 'inactive' WHERE equipname = 'biodiesel feed tank' AND e.area LIKE '%unit%'",
        )
        .expect("rewrite");
        assert_eq!(
            rewritten,
            "UPDATE equipment SET status = 'inactive' WHERE UPPER(equipname) = UPPER('biodiesel feed tank') AND UPPER(e.area) LIKE UPPER('%unit%')"
        );
        assert_eq!(uppercase_text_comparisons("SELECT * FROM equipment"), None);
        assert_eq!(
            uppercase_text_comparisons("SELECT * FROM equipment WHERE installlocationid = 934"),
            None
        );
    }

    #[test]
    fn cast_rewrite_covers_join_and_filter_comparisons() {
        let rewritten = cast_comparisons_to_text(
            "SELECT e.equipname FROM equipment e JOIN locations l ON e.installlocationid = l.locationid WHERE l.locationid = 934",
        )
        .expect("rewrite");
        assert_eq!(
            rewritten,
            "SELECT e.equipname FROM equipment e JOIN locations l ON CAST(e.installlocationid AS TEXT) = CAST(l.locationid AS TEXT) WHERE CAST(l.locationid AS TEXT) = CAST(934 AS TEXT)"
        );
        assert_eq!(cast_comparisons_to_text("SELECT * FROM equipment"), None);
    }
}
