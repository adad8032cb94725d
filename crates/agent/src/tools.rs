use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use plantwise_core::domain::tool::{RowSet, ToolCall, ToolFailure, ToolOutput};
use plantwise_core::errors::ErrorKind;
use plantwise_core::profile::AgentProfile;
use plantwise_core::registry::{
    DESCRIBE_TABLES, EXECUTE_STATEMENT, LIST_TABLES, RETRIEVE, SUGGEST_QUESTIONS,
};
use plantwise_core::sql::{
    classify, destructive_verb, missing_audit_columns, normalize_statement, statement_count,
    AuditColumns, StatementKind,
};
use plantwise_core::stores::{CollectionId, KnowledgeRetriever, RelationalStore, StoreError};

pub const RECORD_NOT_FOUND: &str = "record not found";

fn store_failure(error: StoreError) -> ToolFailure {
    ToolFailure::new(error.kind, error.message)
}

/// Runs the relational tools against the system of record and enforces the
/// statement rules before anything reaches it.
#[derive(Clone)]
pub struct SqlToolExecutor {
    store: Arc<dyn RelationalStore>,
    audit: AuditColumns,
}

impl SqlToolExecutor {
    pub fn new(store: Arc<dyn RelationalStore>, audit: AuditColumns) -> Self {
        Self { store, audit }
    }

    pub async fn list_tables(&self) -> Result<ToolOutput, ToolFailure> {
        let tables = self.store.list_tables().await.map_err(store_failure)?;
        Ok(ToolOutput::Tables(tables))
    }

    pub async fn describe_tables(&self, tables: &[String]) -> Result<ToolOutput, ToolFailure> {
        let mut described = BTreeMap::new();
        for table in tables {
            let columns = self.store.describe_table(table).await.map_err(store_failure)?;
            described.insert(table.clone(), columns);
        }
        Ok(ToolOutput::Columns(described))
    }

    /// Statement checks that never need the store.
    pub fn prepare(&self, sql: &str) -> Result<(String, StatementKind), ToolFailure> {
        let statement = normalize_statement(sql);
        if statement.is_empty() {
            return Err(ToolFailure::new(ErrorKind::SqlSyntaxError, "empty statement"));
        }
        if statement_count(&statement) > 1 {
            return Err(ToolFailure::new(
                ErrorKind::SqlSyntaxError,
                "only one statement may be executed per call",
            ));
        }
        if let Some(verb) = destructive_verb(&statement) {
            return Err(ToolFailure::new(
                ErrorKind::PolicyBlocked,
                format!("{verb} statements are not allowed"),
            )
            .with_suggestion("Mark the record inactive instead of removing it."));
        }

        let missing = missing_audit_columns(&statement, &self.audit);
        if !missing.is_empty() {
            return Err(ToolFailure::new(
                ErrorKind::AuditFieldMissing,
                format!("statement must set audit columns: {}", missing.join(", ")),
            )
            .with_suggestion(format!(
                "Set {} to '{}' and {} to the current timestamp on inserts; set {} and {} on updates.",
                self.audit.insert_actor_column,
                self.audit.actor,
                self.audit.insert_timestamp_column,
                self.audit.update_actor_column,
                self.audit.update_timestamp_column,
            )));
        }

        let kind = classify(&statement);
        Ok((statement, kind))
    }

    pub async fn execute_statement(
        &self,
        sql: &str,
        timeout: Duration,
    ) -> Result<RowSet, ToolFailure> {
        let (statement, kind) = self.prepare(sql)?;
        let rows = self.store.execute(&statement, timeout).await.map_err(store_failure)?;
        if kind == StatementKind::Update && rows.rows_affected == 0 {
            return Err(ToolFailure::new(ErrorKind::NoRowsAffected, "update matched no rows"));
        }
        Ok(rows)
    }
}

/// Routes a validated call to the data source that serves it.
#[derive(Clone)]
pub struct ToolExecutor {
    sql: Option<SqlToolExecutor>,
    knowledge: Arc<dyn KnowledgeRetriever>,
    collection: CollectionId,
    retrieve_limit: usize,
    sample_questions: Vec<String>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(
        profile: &AgentProfile,
        relational: Option<Arc<dyn RelationalStore>>,
        knowledge: Arc<dyn KnowledgeRetriever>,
    ) -> Self {
        Self {
            sql: relational.map(|store| SqlToolExecutor::new(store, profile.audit.clone())),
            knowledge,
            collection: profile.collection.clone(),
            retrieve_limit: profile.retrieve_limit,
            sample_questions: profile.sample_questions.clone(),
            timeout: Duration::from_secs(profile.tool_timeout_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn has_relational_store(&self) -> bool {
        self.sql.is_some()
    }

    fn sql(&self) -> Result<&SqlToolExecutor, ToolFailure> {
        self.sql.as_ref().ok_or_else(|| {
            ToolFailure::new(ErrorKind::InvalidToolCall, "no relational store is configured")
        })
    }

    pub async fn invoke(&self, call: &ToolCall) -> Result<ToolOutput, ToolFailure> {
        match call.tool.as_str() {
            LIST_TABLES => self.sql()?.list_tables().await,
            DESCRIBE_TABLES => {
                let tables = call.param_strings("tables").unwrap_or_default();
                self.sql()?.describe_tables(tables).await
            }
            EXECUTE_STATEMENT => {
                let sql = call.param_str("sql_statement").unwrap_or_default();
                self.sql()?.execute_statement(sql, self.timeout).await.map(ToolOutput::Rows)
            }
            RETRIEVE => {
                let query = call.param_str("query").unwrap_or_default();
                let collection = call
                    .param_str("collection")
                    .map(CollectionId::new)
                    .unwrap_or_else(|| self.collection.clone());
                self.knowledge
                    .retrieve(query, &collection, self.retrieve_limit)
                    .await
                    .map(ToolOutput::Passages)
                    .map_err(|error| ToolFailure::new(error.kind(), error.to_string()))
            }
            SUGGEST_QUESTIONS => {
                Ok(ToolOutput::Suggestions(self.suggestions(call.param_str("category"))))
            }
            other => Err(ToolFailure::new(
                ErrorKind::InvalidToolCall,
                format!("no executor for tool `{other}`"),
            )),
        }
    }

    /// Sample questions mentioning the category, or all of them when none do.
    pub fn suggestions(&self, category: Option<&str>) -> Vec<String> {
        let Some(category) = category.map(str::to_lowercase).filter(|value| !value.is_empty())
        else {
            return self.sample_questions.clone();
        };
        let filtered = self
            .sample_questions
            .iter()
            .filter(|question| question.to_lowercase().contains(&category))
            .cloned()
            .collect::<Vec<_>>();
        if filtered.is_empty() {
            self.sample_questions.clone()
        } else {
            filtered
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use plantwise_core::domain::tool::{ColumnSpec, Passage, RowSet, ToolCall, ToolOutput};
    use plantwise_core::errors::ErrorKind;
    use plantwise_core::profile::AgentProfile;
    use plantwise_core::sql::AuditColumns;
    use plantwise_core::stores::{
        CollectionId, KnowledgeRetriever, RelationalStore, RetrievalError, StoreError,
    };

    use super::{SqlToolExecutor, ToolExecutor};

    #[derive(Default)]
    struct RecordingStore {
        statements: Mutex<Vec<String>>,
        rows_affected: u64,
    }

    impl RecordingStore {
        fn statements(&self) -> Vec<String> {
            match self.statements.lock() {
                Ok(statements) => statements.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }
    }

    #[async_trait]
    impl RelationalStore for RecordingStore {
        async fn list_tables(&self) -> Result<BTreeSet<String>, StoreError> {
            Ok(["equipment".to_string()].into_iter().collect())
        }

        async fn describe_table(&self, table: &str) -> Result<Vec<ColumnSpec>, StoreError> {
            Ok(if table == "equipment" {
                vec![ColumnSpec {
                    name: "equipid".to_string(),
                    data_type: "TEXT".to_string(),
                    nullable: false,
                }]
            } else {
                Vec::new()
            })
        }

        async fn execute(&self, statement: &str, _timeout: Duration) -> Result<RowSet, StoreError> {
            self.statements.lock().expect("lock").push(statement.to_string());
            Ok(RowSet { rows_affected: self.rows_affected, ..RowSet::default() })
        }
    }

    struct EmptyKnowledge;

    #[async_trait]
    impl KnowledgeRetriever for EmptyKnowledge {
        async fn retrieve(
            &self,
            _query: &str,
            collection: &CollectionId,
            _limit: usize,
        ) -> Result<Vec<Passage>, RetrievalError> {
            if collection.as_str() == "maintenance" {
                Ok(Vec::new())
            } else {
                Err(RetrievalError::Unavailable(collection.to_string()))
            }
        }
    }

    #[tokio::test]
    async fn destructive_and_multi_statements_never_reach_the_store() {
        let store = Arc::new(RecordingStore::default());
        let executor = SqlToolExecutor::new(store.clone(), AuditColumns::default());

        let blocked = executor
            .execute_statement("DELETE FROM equipment", Duration::from_secs(1))
            .await
            .expect_err("blocked");
        assert_eq!(blocked.kind, ErrorKind::PolicyBlocked);

        let multi = executor
            .execute_statement("SELECT 1; SELECT 2", Duration::from_secs(1))
            .await
            .expect_err("multi");
        assert_eq!(multi.kind, ErrorKind::SqlSyntaxError);
        assert!(store.statements().is_empty());
    }

    #[tokio::test]
    async fn writes_without_audit_columns_are_rejected() {
        let store = Arc::new(RecordingStore::default());
        let executor = SqlToolExecutor::new(store.clone(), AuditColumns::default());

        let failure = executor
            .execute_statement(
                "UPDATE equipment SET status = 'inactive' WHERE equipid = 'H-504'",
                Duration::from_secs(1),
            )
            .await
            .expect_err("audit");
        assert_eq!(failure.kind, ErrorKind::AuditFieldMissing);
        assert!(failure.message.contains("updatedby"));
        assert!(store.statements().is_empty());
    }

    #[tokio::test]
    async fn cte_prefixed_writes_are_held_to_the_same_checks() {
        let store = Arc::new(RecordingStore::default());
        let executor = SqlToolExecutor::new(store.clone(), AuditColumns::default());

        let failure = executor
            .execute_statement(
                "WITH t AS (SELECT 1) UPDATE equipment SET status = 'inactive' WHERE equipid = 'H-504'",
                Duration::from_secs(1),
            )
            .await
            .expect_err("audit");
        assert_eq!(failure.kind, ErrorKind::AuditFieldMissing);

        let failure = executor
            .execute_statement(
                "INSERT OR REPLACE INTO equipment (equipid, createdby, createddate) VALUES ('K-901', 'MaintAgent', CURRENT_TIMESTAMP)",
                Duration::from_secs(1),
            )
            .await
            .expect_err("blocked");
        assert_eq!(failure.kind, ErrorKind::PolicyBlocked);
        assert!(store.statements().is_empty());
    }

    #[tokio::test]
    async fn zero_row_update_is_reported_and_newlines_are_collapsed() {
        let store = Arc::new(RecordingStore::default());
        let executor = SqlToolExecutor::new(store.clone(), AuditColumns::default());

        let failure = executor
            .execute_statement(
                "UPDATE equipment SET status = 'inactive', updatedby = 'MaintAgent',\n\
                 updateddate = CURRENT_TIMESTAMP WHERE equipid = 'X-1';",
                Duration::from_secs(1),
            )
            .await
            .expect_err("no rows");
        assert_eq!(failure.kind, ErrorKind::NoRowsAffected);
        let statements = store.statements();
        assert_eq!(statements.len(), 1);
        assert!(!statements[0].contains('\n'));
        assert!(!statements[0].ends_with(';'));
    }

    #[tokio::test]
    async fn executor_routes_by_tool_name() {
        let profile = AgentProfile::maintenance();
        let executor = ToolExecutor::new(
            &profile,
            Some(Arc::new(RecordingStore::default()) as Arc<dyn RelationalStore>),
            Arc::new(EmptyKnowledge),
        );

        let described = executor
            .invoke(
                &ToolCall::new("describe_tables")
                    .with_param("tables", vec!["equipment".to_string(), "ghost".to_string()]),
            )
            .await
            .expect("describe");
        let ToolOutput::Columns(columns) = described else {
            panic!("expected columns");
        };
        assert_eq!(columns["equipment"].len(), 1);
        assert!(columns["ghost"].is_empty());

        let unavailable = executor
            .invoke(
                &ToolCall::new("retrieve")
                    .with_param("query", "fugitive emissions")
                    .with_param("collection", "regulatory"),
            )
            .await
            .expect_err("unavailable");
        assert_eq!(unavailable.kind, ErrorKind::RetrievalUnavailable);
    }

    #[test]
    fn suggestions_filter_by_category_with_fallback() {
        let profile = AgentProfile::maintenance();
        let executor = ToolExecutor::new(&profile, None, Arc::new(EmptyKnowledge));

        let tanks = executor.suggestions(Some("Tanks"));
        assert_eq!(tanks, vec!["How many tanks does the biodiesel unit have?".to_string()]);
        assert_eq!(executor.suggestions(Some("turbines")), profile.sample_questions);
        assert!(!executor.has_relational_store());
    }
}
