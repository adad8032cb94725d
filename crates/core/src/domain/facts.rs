use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactSource {
    SystemOfRecord,
    KnowledgeStore,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFact {
    pub subject: String,
    pub attribute: String,
    pub value: String,
    pub source: FactSource,
    /// Citation of the passage a knowledge-store fact came from.
    pub citation: Option<String>,
}

impl EntityFact {
    pub fn system_of_record(
        subject: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            attribute: attribute.into(),
            value: value.into(),
            source: FactSource::SystemOfRecord,
            citation: None,
        }
    }

    pub fn knowledge_store(
        subject: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
        citation: Option<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            attribute: attribute.into(),
            value: value.into(),
            source: FactSource::KnowledgeStore,
            citation,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub subject: String,
    pub attribute: String,
    /// Authoritative value.
    pub system_of_record: EntityFact,
    pub knowledge_store: EntityFact,
}

impl Discrepancy {
    /// Plain-language notice appended to answers.
    pub fn notice(&self) -> String {
        let cited = self
            .knowledge_store
            .citation
            .as_deref()
            .map(|citation| format!("the document \"{citation}\""))
            .unwrap_or_else(|| "a knowledge-base document".to_string());
        format!(
            "Data inconsistency: the system of record lists {} {} as \"{}\", but {} says \"{}\". \
             The system-of-record value \"{}\" was used; you may want to correct the document or the record.",
            self.subject,
            self.attribute,
            self.system_of_record.value,
            cited,
            self.knowledge_store.value,
            self.system_of_record.value,
        )
    }
}
