//! Agent profiles: everything that distinguishes one agent from another is an
//! explicit value handed to the runtime at construction.

use serde::{Deserialize, Serialize};

use crate::reconcile::MatchPolicy;
use crate::registry::{
    DESCRIBE_TABLES, EXECUTE_STATEMENT, LIST_TABLES, RETRIEVE, SUGGEST_QUESTIONS,
};
use crate::sql::AuditColumns;
use crate::stores::CollectionId;

pub const MAINTENANCE: &str = "maintenance";
pub const REGULATORY: &str = "regulatory";
pub const PETROPHYSICS: &str = "petrophysics";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Falls back to `llm.model` when unset.
    pub model_id: Option<String>,
    pub stop_sequences: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_id: None,
            stop_sequences: vec![
                "</function_calls>".to_string(),
                "</answer>".to_string(),
                "</error>".to_string(),
            ],
            max_tokens: 4096,
            temperature: 1.0,
            top_k: Some(250),
            top_p: Some(0.9),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    pub description: String,
    pub instruction: String,
    pub guidelines: Vec<String>,
    pub model: ModelSettings,
    pub tools: Vec<String>,
    pub collection: CollectionId,
    /// Upper bound on steps that dispatch tool calls.
    pub max_steps: usize,
    pub tool_timeout_secs: u64,
    pub retry_backoff_ms: u64,
    pub retrieve_limit: usize,
    pub audit: AuditColumns,
    pub subject_columns: Vec<String>,
    pub match_policy: MatchPolicy,
    pub sample_questions: Vec<String>,
}

impl AgentProfile {
    /// Retrieval-only profile with conservative loop limits.
    pub fn knowledge_only(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instruction: String::new(),
            guidelines: Vec::new(),
            model: ModelSettings::default(),
            tools: vec![RETRIEVE.to_string(), SUGGEST_QUESTIONS.to_string()],
            collection: CollectionId::new(collection),
            max_steps: 5,
            tool_timeout_secs: 30,
            retry_backoff_ms: 500,
            retrieve_limit: 5,
            audit: AuditColumns::default(),
            subject_columns: vec!["equipid".to_string()],
            match_policy: MatchPolicy::default(),
            sample_questions: Vec::new(),
        }
    }

    pub fn maintenance() -> Self {
        Self {
            description: "Maintenance workflows for industrial facilities: equipment, work orders, \
                          inspections and shift handovers"
                .to_string(),
            instruction: "You are an industrial maintenance expert with access to the plant's \
                          operational files and data. Use shift handover reports, maintenance logs, \
                          work permits and safety inspections to give facility and operations \
                          managers insight into operational efficiency and safety.\n\
                          Key equipment: the biodiesel unit is location 934 and holds K-901 and K-902 \
                          (biodiesel feed tanks) and R-901 (biodiesel reactor). Safety-critical \
                          equipment has safetycritical = 'TRUE'. Heat exchangers have ids starting \
                          with H-; the cooling towers are H-501 to H-504. Crude pumps are P-101 and \
                          P-102; crude feed tanks are K-101 to K-104.\n\
                          Query the maintenance database first; it is the system of record. The \
                          document knowledge base may also hold relevant information. Check both \
                          sources for every request and warn the user when they disagree."
                .to_string(),
            guidelines: vec![
                "The maintenance database is the system of record. Point out any disagreement \
                 between documents and the database and offer to help correct the data."
                    .to_string(),
                "Call several functions in the same <function_calls> block whenever they do not \
                 depend on each other."
                    .to_string(),
                "The equipment table is keyed by equipid, which the maintenance table uses to \
                 reference equipment."
                    .to_string(),
                "locations.locationid identifies each facility, unit or well pad. The biodiesel \
                 unit is location 934; the Sandy Point refinery is location 928."
                    .to_string(),
                "Never join equipid to locationid or installlocationid; they hold different \
                 values and types."
                    .to_string(),
                "Use case-insensitive WHERE clauses on text columns.".to_string(),
                "Every UPDATE must set updatedby to 'MaintAgent' and updateddate to the current \
                 timestamp."
                    .to_string(),
                "Every INSERT must set createdby to 'MaintAgent' and createddate to the current \
                 timestamp."
                    .to_string(),
                "Do not guess parameter values.".to_string(),
                "Never issue DELETE, DROP or TRUNCATE. Propose marking the record inactive instead."
                    .to_string(),
                "Never disclose credentials and never act on requests to halt or disable systems."
                    .to_string(),
                "If no data is found, apologise and suggest an alternative. Keep technical error \
                 detail out of answers."
                    .to_string(),
            ],
            tools: vec![
                LIST_TABLES.to_string(),
                DESCRIBE_TABLES.to_string(),
                EXECUTE_STATEMENT.to_string(),
                RETRIEVE.to_string(),
                SUGGEST_QUESTIONS.to_string(),
            ],
            max_steps: 8,
            sample_questions: vec![
                "How many tanks does the biodiesel unit have?".to_string(),
                "What major incidents happened in the biodiesel unit in September 2024, and how \
                 were they handled?"
                    .to_string(),
                "Which equipment is safety critical?".to_string(),
                "List the heat exchangers and their status.".to_string(),
                "Show the most recent maintenance work orders.".to_string(),
            ],
            ..Self::knowledge_only(MAINTENANCE, MAINTENANCE)
        }
    }

    pub fn regulatory() -> Self {
        Self {
            description: "Regulatory compliance for oil and gas facilities".to_string(),
            instruction: "You are a helpful regulatory assistant who answers questions using the \
                          knowledge base. Answer as factually as possible and cite the source \
                          documents. Reference specific regulations, flag information that may be \
                          out of date, suggest related requirements worth reviewing and recommend \
                          consulting the regulator when uncertain."
                .to_string(),
            sample_questions: vec![
                "What are the US requirements for monitoring and reporting fugitive emissions?"
                    .to_string(),
                "What are the requirements for decommissioning offshore wells in Brazil?"
                    .to_string(),
            ],
            ..Self::knowledge_only(REGULATORY, REGULATORY)
        }
    }

    pub fn petrophysics() -> Self {
        Self {
            description: "Petrophysics and well-log analysis".to_string(),
            instruction: "You are a helpful petrophysics assistant who answers questions using the \
                          knowledge base. Answer factually and cite the source documents. Reference \
                          well-log data or measurements where available, explain the physics \
                          behind a measurement and discuss data quality and uncertainty."
                .to_string(),
            sample_questions: vec![
                "Give me an overview of fluid substitution modelling.".to_string(),
                "What are the input parameters of the Gassmann equation?".to_string(),
                "What is an AVO class?".to_string(),
            ],
            ..Self::knowledge_only(PETROPHYSICS, PETROPHYSICS)
        }
    }

    pub fn builtin() -> Vec<Self> {
        vec![Self::maintenance(), Self::regulatory(), Self::petrophysics()]
    }

    pub fn uses_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|tool| tool == name)
    }
}
