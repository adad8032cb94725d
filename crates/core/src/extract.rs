//! Entity facts from tool outputs.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::domain::facts::{EntityFact, FactSource};
use crate::domain::tool::{Passage, RowSet, ToolOutput};
use crate::reconcile::normalize_key;

#[derive(Clone, Debug)]
pub struct FactExtractor {
    subject_columns: Vec<String>,
}

impl Default for FactExtractor {
    fn default() -> Self {
        Self::new(vec!["equipid".to_string()])
    }
}

fn attribute_phrase() -> Option<&'static Regex> {
    static PHRASE: OnceLock<Option<Regex>> = OnceLock::new();
    PHRASE
        .get_or_init(|| {
            Regex::new(
                r"(?i)\b([a-z][a-z _]{1,30}?)\s*(?::|=|\bis\b|\bwas\b)\s*([A-Za-z0-9][A-Za-z0-9 ._/-]{0,60})",
            )
            .ok()
        })
        .as_ref()
}

impl FactExtractor {
    pub fn new(subject_columns: Vec<String>) -> Self {
        Self { subject_columns }
    }

    /// System-of-record facts: one per non-null, non-subject column.
    pub fn from_rows(&self, rows: &RowSet) -> Vec<EntityFact> {
        let mut facts = Vec::new();
        for row in &rows.rows {
            let Some((subject_column, subject)) = self.subject_columns.iter().find_map(|column| {
                row.iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(column))
                    .and_then(|(name, value)| scalar_text(value).map(|text| (name, text)))
            }) else {
                continue;
            };

            for (column, value) in row {
                if column == subject_column {
                    continue;
                }
                if let Some(text) = scalar_text(value) {
                    facts.push(EntityFact::system_of_record(subject.clone(), column.clone(), text));
                }
            }
        }
        facts
    }

    /// Knowledge-store facts from passage metadata, and from
    /// `attribute: value` phrases in passages that name a known subject.
    pub fn from_passages(
        &self,
        passages: &[Passage],
        known_subjects: &BTreeSet<String>,
    ) -> Vec<EntityFact> {
        let mut facts = Vec::new();
        for passage in passages {
            let citation = Some(passage.citation.to_string());

            if let Some(subject) = &passage.subject {
                for (attribute, value) in &passage.attributes {
                    facts.push(EntityFact::knowledge_store(
                        subject.clone(),
                        attribute.clone(),
                        value.clone(),
                        citation.clone(),
                    ));
                }
            }

            let text = passage.text.to_lowercase();
            for subject in known_subjects {
                if passage.subject.as_deref().is_some_and(|own| own.eq_ignore_ascii_case(subject)) {
                    continue;
                }
                if !text.contains(&subject.to_lowercase()) {
                    continue;
                }
                for (attribute, value) in text_attributes(&passage.text) {
                    facts.push(EntityFact::knowledge_store(
                        subject.clone(),
                        attribute,
                        value,
                        citation.clone(),
                    ));
                }
            }
        }
        facts
    }

    /// Facts from a successful tool output. Passages are only mined for
    /// subjects the system of record has already produced.
    pub fn from_output(&self, output: &ToolOutput, known: &[EntityFact]) -> Vec<EntityFact> {
        match output {
            ToolOutput::Rows(rows) => self.from_rows(rows),
            ToolOutput::Passages(passages) => {
                let subjects = known
                    .iter()
                    .filter(|fact| fact.source == FactSource::SystemOfRecord)
                    .map(|fact| fact.subject.clone())
                    .collect::<BTreeSet<_>>();
                self.from_passages(passages, &subjects)
            }
            ToolOutput::Tables(_) | ToolOutput::Columns(_) | ToolOutput::Suggestions(_) => {
                Vec::new()
            }
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.trim().to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

fn text_attributes(text: &str) -> Vec<(String, String)> {
    let Some(phrase) = attribute_phrase() else {
        return Vec::new();
    };
    let mut attributes: Vec<(String, String)> = Vec::new();
    for sentence in text.split(['.', ';', '\n']) {
        for caps in phrase.captures_iter(sentence) {
            let attribute = normalize_key(&caps[1]);
            let value = caps[2].trim().trim_end_matches(',').trim().to_string();
            if attribute.is_empty() || value.is_empty() {
                continue;
            }
            if attributes.iter().any(|(existing, _)| *existing == attribute) {
                continue;
            }
            attributes.push((attribute, value));
        }
    }
    attributes
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use serde_json::json;

    use super::FactExtractor;
    use crate::domain::facts::FactSource;
    use crate::domain::tool::{Citation, Passage, RowSet};

    fn passage(text: &str) -> Passage {
        Passage {
            text: text.to_string(),
            citation: Citation { source: "tank-farm-notes.md".to_string(), location: None },
            score: 1.0,
            subject: None,
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn rows_produce_record_facts_keyed_by_subject_column() {
        let mut row = BTreeMap::new();
        row.insert("equipid".to_string(), json!("K-902"));
        row.insert("status".to_string(), json!("active"));
        row.insert("capacity_m3".to_string(), json!(40));
        row.insert("retireddate".to_string(), json!(null));
        let rows = RowSet { columns: Vec::new(), rows: vec![row], rows_affected: 0 };

        let facts = FactExtractor::default().from_rows(&rows);
        assert_eq!(facts.len(), 2);
        assert!(facts.iter().all(|fact| fact.subject == "K-902"));
        assert!(facts.iter().all(|fact| fact.source == FactSource::SystemOfRecord));
        assert!(facts.iter().any(|fact| fact.attribute == "capacity_m3" && fact.value == "40"));
    }

    #[test]
    fn rows_without_subject_column_are_skipped() {
        let mut row = BTreeMap::new();
        row.insert("count".to_string(), json!(2));
        let rows = RowSet { columns: Vec::new(), rows: vec![row], rows_affected: 0 };
        assert!(FactExtractor::default().from_rows(&rows).is_empty());
    }

    #[test]
    fn passage_metadata_becomes_cited_facts() {
        let mut doc = passage("Tank K-902 was taken out of service in 2023.");
        doc.subject = Some("K-902".to_string());
        doc.attributes.insert("status".to_string(), "decommissioned".to_string());

        let facts = FactExtractor::default().from_passages(&[doc], &BTreeSet::new());
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, "decommissioned");
        assert_eq!(facts[0].source, FactSource::KnowledgeStore);
        assert_eq!(facts[0].citation.as_deref(), Some("tank-farm-notes.md"));
    }

    #[test]
    fn text_phrases_are_mined_only_for_known_subjects() {
        let doc = passage("Feed tank K-902. Status: decommissioned. Manufacturer is Acme Tanks");
        let extractor = FactExtractor::default();

        assert!(extractor.from_passages(&[doc.clone()], &BTreeSet::new()).is_empty());

        let known = BTreeSet::from(["K-902".to_string()]);
        let facts = extractor.from_passages(&[doc], &known);
        let status = facts.iter().find(|fact| fact.attribute == "status").expect("status fact");
        assert_eq!(status.subject, "K-902");
        assert_eq!(status.value, "decommissioned");
        assert!(facts.iter().any(|fact| fact.attribute == "manufacturer" && fact.value == "Acme Tanks"));
    }
}
