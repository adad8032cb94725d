//! Cross-source reconciliation of entity facts gathered within one turn.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::facts::{Discrepancy, EntityFact, FactSource};

/// When two values for the same (subject, attribute) count as agreeing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MatchPolicy {
    Exact,
    /// Case-insensitive with surrounding and repeated whitespace ignored.
    Normalized,
    /// Token-set overlap (Jaccard) of normalized values at or above the threshold.
    Similarity { min_similarity: f64 },
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::Normalized
    }
}

impl MatchPolicy {
    pub fn agrees(&self, left: &str, right: &str) -> bool {
        match self {
            Self::Exact => left == right,
            Self::Normalized => normalize_value(left) == normalize_value(right),
            Self::Similarity { min_similarity } => {
                token_similarity(left, right) >= *min_similarity
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Self::Similarity { min_similarity } => {
                *min_similarity > 0.0 && *min_similarity <= 1.0
            }
            Self::Exact | Self::Normalized => true,
        }
    }
}

pub fn normalize_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Grouping key for subjects and attributes: `Status`, ` status ` and
/// `install location` / `install_location` land in the same group.
pub fn normalize_key(key: &str) -> String {
    key.split(|ch: char| ch.is_whitespace() || ch == '_' || ch == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

fn token_similarity(left: &str, right: &str) -> f64 {
    let left = normalize_value(left);
    let right = normalize_value(right);
    let left = left.split(' ').filter(|token| !token.is_empty()).collect::<BTreeSet<_>>();
    let right = right.split(' ').filter(|token| !token.is_empty()).collect::<BTreeSet<_>>();
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let shared = left.intersection(&right).count() as f64;
    let total = left.union(&right).count() as f64;
    shared / total
}

#[derive(Default)]
struct FactGroup<'a> {
    system_of_record: Vec<&'a EntityFact>,
    knowledge_store: Vec<&'a EntityFact>,
}

#[derive(Clone, Debug, Default)]
pub struct ReconciliationEngine {
    policy: MatchPolicy,
}

impl ReconciliationEngine {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    /// At most one discrepancy per (subject, attribute), ordered by that key.
    ///
    /// The first system-of-record fact of a group is authoritative; the
    /// first knowledge-store fact that disagrees with it is reported.
    pub fn reconcile(&self, facts: &[EntityFact]) -> Vec<Discrepancy> {
        let mut groups: BTreeMap<(String, String), FactGroup<'_>> = BTreeMap::new();
        for fact in facts {
            let group = groups
                .entry((normalize_key(&fact.subject), normalize_key(&fact.attribute)))
                .or_default();
            match fact.source {
                FactSource::SystemOfRecord => group.system_of_record.push(fact),
                FactSource::KnowledgeStore => group.knowledge_store.push(fact),
            }
        }

        groups
            .into_values()
            .filter_map(|group| {
                let authoritative = *group.system_of_record.first()?;
                let conflicting = group
                    .knowledge_store
                    .iter()
                    .find(|fact| !self.policy.agrees(&authoritative.value, &fact.value))?;
                Some(Discrepancy {
                    subject: authoritative.subject.clone(),
                    attribute: authoritative.attribute.clone(),
                    system_of_record: authoritative.clone(),
                    knowledge_store: (*conflicting).clone(),
                })
            })
            .collect()
    }

    /// Value downstream computation must use for (subject, attribute): the
    /// system of record when it has one, otherwise the knowledge store.
    pub fn authoritative_value<'a>(
        &self,
        facts: &'a [EntityFact],
        subject: &str,
        attribute: &str,
    ) -> Option<&'a str> {
        let subject = normalize_key(subject);
        let attribute = normalize_key(attribute);
        let matching = |fact: &&EntityFact| {
            normalize_key(&fact.subject) == subject && normalize_key(&fact.attribute) == attribute
        };
        facts
            .iter()
            .filter(matching)
            .find(|fact| fact.source == FactSource::SystemOfRecord)
            .or_else(|| facts.iter().find(matching))
            .map(|fact| fact.value.as_str())
    }
}
