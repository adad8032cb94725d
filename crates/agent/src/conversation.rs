//! Question triage ahead of planning.
//!
//! A question that is empty, very short, or only vague ("any problems?") is
//! answered straight away with a clarification request and a few example
//! questions, so the planner is never asked to guess what the user meant.

use std::sync::OnceLock;

use plantwise_core::profile::AgentProfile;
use regex::Regex;

/// Questions shorter than this are always treated as vague.
const MIN_QUESTION_CHARS: usize = 8;
const SUGGESTED_QUESTIONS: usize = 3;

const VAGUE_TERMS: &[&str] = &[
    "anything",
    "something",
    "status",
    "problem",
    "problems",
    "issue",
    "issues",
    "overview",
    "general",
    "whatever",
    "stuff",
    "how are things",
    "what's up",
    "what is going on",
];

const SPECIFIC_TERMS: &[&str] = &[
    "heat exchanger",
    "cooling tower",
    "biodiesel",
    "pump",
    "tank",
    "reactor",
    "maintenance",
    "repair",
    "inspection",
    "work order",
    "permit",
    "well",
    "refinery",
    "table",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Triage {
    Proceed,
    Clarify(String),
}

fn equipment_id() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b[a-z]{1,3}-?\d+\b").ok()).as_ref()
}

fn contains_term(text: &str, term: &str) -> bool {
    text.split(|ch: char| !ch.is_alphanumeric() && ch != '\'')
        .collect::<Vec<_>>()
        .join(" ")
        .contains(term)
}

fn has_specific_indicator(text: &str) -> bool {
    text.chars().any(|ch| ch.is_ascii_digit())
        || equipment_id().is_some_and(|regex| regex.is_match(text))
        || SPECIFIC_TERMS.iter().any(|term| contains_term(text, term))
}

pub fn is_vague(question: &str) -> bool {
    let text = question.trim().to_lowercase();
    if text.chars().count() < MIN_QUESTION_CHARS {
        return true;
    }
    let vague = VAGUE_TERMS.iter().any(|term| contains_term(&text, term));
    vague && !has_specific_indicator(&text)
}

pub fn triage(question: &str, profile: &AgentProfile) -> Triage {
    if !is_vague(question) {
        return Triage::Proceed;
    }

    let mut reply = String::from(
        "Could you tell me a bit more about what you need? Naming a unit, a piece of \
         equipment or a time period helps me find the right records.",
    );
    let examples = profile.sample_questions.iter().take(SUGGESTED_QUESTIONS).collect::<Vec<_>>();
    if !examples.is_empty() {
        reply.push_str("\n\nFor example, you could ask:");
        for example in examples {
            reply.push_str("\n- ");
            reply.push_str(example);
        }
    }
    Triage::Clarify(reply)
}

#[cfg(test)]
mod tests {
    use plantwise_core::profile::AgentProfile;

    use super::{is_vague, triage, Triage};

    #[test]
    fn short_and_empty_questions_are_vague() {
        assert!(is_vague(""));
        assert!(is_vague("   "));
        assert!(is_vague("help?"));
    }

    #[test]
    fn vague_terms_without_specifics_need_clarification() {
        assert!(is_vague("Are there any problems?"));
        assert!(is_vague("Give me a general overview"));
        assert!(!is_vague("Any problems with pump P-102?"));
        assert!(!is_vague("List the heat exchangers and their status."));
        assert!(!is_vague("How many tanks does the biodiesel unit have?"));
    }

    #[test]
    fn clarification_offers_sample_questions() {
        let profile = AgentProfile::maintenance();
        let Triage::Clarify(reply) = triage("status?", &profile) else {
            panic!("expected clarification");
        };
        assert!(reply.contains(&profile.sample_questions[0]));
        assert!(!reply.contains(&profile.sample_questions[3]));
        assert_eq!(triage("Which equipment is safety critical?", &profile), Triage::Proceed);
    }
}
