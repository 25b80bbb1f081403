//! Core domain types for the generate → validate pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{QuizError, Result};

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Normalize question text for duplicate detection: lower-case, collapse
/// whitespace runs to a single space, trim.
pub fn normalize_question(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 (hex) of a normalized question text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Fingerprint the given question text (normalized first).
    pub fn of(question: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_question(question).as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// QuestionItem
// ---------------------------------------------------------------------------

/// A generated multiple-choice question with exactly one option marked correct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionItem {
    /// Run-unique identifier (`Q1`, `Q2`, ...).
    pub id: String,
    /// Question text.
    pub question: String,
    /// Answer options, in the order the model produced them.
    pub options: Vec<String>,
    /// Index into `options` of the option marked correct at generation time.
    pub correct_option: usize,
    /// Model-provided justification for the correct option.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Topic label reported by the model.
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Difficulty label reported by the model.
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
}

pub(crate) fn default_topic() -> String {
    "General".into()
}

pub(crate) fn default_difficulty() -> String {
    "medium".into()
}

impl QuestionItem {
    /// Text of the option marked correct.
    pub fn answer(&self) -> Option<&str> {
        self.options.get(self.correct_option).map(String::as_str)
    }

    /// Duplicate-detection fingerprint of the question text.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.question)
    }

    /// Check the structural invariants every generated item must satisfy.
    pub fn check_invariants(&self) -> Result<()> {
        if self.question.trim().is_empty() {
            return Err(QuizError::validation(format!("{}: empty question", self.id)));
        }
        if self.options.len() < 2 {
            return Err(QuizError::validation(format!(
                "{}: expected at least 2 options, got {}",
                self.id,
                self.options.len()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for opt in &self.options {
            if !seen.insert(opt.trim().to_lowercase()) {
                return Err(QuizError::validation(format!(
                    "{}: duplicate option '{opt}'",
                    self.id
                )));
            }
        }
        if self.correct_option >= self.options.len() {
            return Err(QuizError::validation(format!(
                "{}: correct option index {} out of range",
                self.id, self.correct_option
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// The model's judgment of a single (question, option) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub question_id: String,
    pub option: String,
    pub verdict: bool,
    /// Sanitized retrieval context shown to the model, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_used: Option<String>,
}

/// A question reduced to the options the validator judged true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedItem {
    pub id: String,
    pub question: String,
    /// True-verdict options only, in original order. Never empty.
    pub options: Vec<String>,
    /// Generation-time answer text, when that option survived validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    /// Every verdict recorded for the item, one per evaluated option.
    pub verdicts: Vec<ValidationVerdict>,
}

impl AcceptedItem {
    /// Build an accepted item from its verdicts.
    ///
    /// Returns `None` when no verdict is true; the caller drops the item.
    pub fn from_verdicts(item: &QuestionItem, verdicts: Vec<ValidationVerdict>) -> Option<Self> {
        let options: Vec<String> = verdicts
            .iter()
            .filter(|v| v.verdict)
            .map(|v| v.option.clone())
            .collect();
        if options.is_empty() {
            return None;
        }
        let answer = item
            .answer()
            .filter(|a| options.iter().any(|o| o == a))
            .map(String::from);
        Some(Self {
            id: item.id.clone(),
            question: item.question.clone(),
            options,
            answer,
            explanation: item.explanation.clone(),
            topic: item.topic.clone(),
            difficulty: item.difficulty.clone(),
            verdicts,
        })
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One persisted entry of the dedup history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub fingerprint: Fingerprint,
    pub first_seen: DateTime<Utc>,
    /// Normalized question text, used for the "avoid recent phrasings" prompt clause.
    #[serde(default)]
    pub question: String,
}

impl HistoryRecord {
    /// Record for a question first seen now.
    pub fn new(question: &str) -> Self {
        Self {
            fingerprint: Fingerprint::of(question),
            first_seen: Utc::now(),
            question: normalize_question(question),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(options: &[&str], correct: usize) -> QuestionItem {
        QuestionItem {
            id: "Q1".into(),
            question: "What does `cargo check` do?".into(),
            options: options.iter().map(|s| s.to_string()).collect(),
            correct_option: correct,
            explanation: Some("It type-checks without codegen.".into()),
            topic: "cargo".into(),
            difficulty: "easy".into(),
        }
    }

    fn verdict(option: &str, verdict: bool) -> ValidationVerdict {
        ValidationVerdict {
            question_id: "Q1".into(),
            option: option.into(),
            verdict,
            context_used: None,
        }
    }

    #[test]
    fn normalization_collapses_case_and_whitespace() {
        assert_eq!(normalize_question("  What   IS\n a Trait? "), "what is a trait?");
    }

    #[test]
    fn fingerprint_ignores_formatting_noise() {
        assert_eq!(
            Fingerprint::of("What is a trait?"),
            Fingerprint::of("  what IS   a trait?\n")
        );
        assert_ne!(Fingerprint::of("What is a trait?"), Fingerprint::of("What is a macro?"));
        assert_eq!(Fingerprint::of("x").as_str().len(), 64);
    }

    #[test]
    fn invariants_reject_single_option() {
        assert!(item(&["only"], 0).check_invariants().is_err());
    }

    #[test]
    fn invariants_reject_duplicate_options() {
        let err = item(&["Builds", "builds "], 0).check_invariants().unwrap_err();
        assert!(err.to_string().contains("duplicate option"));
    }

    #[test]
    fn invariants_reject_out_of_range_answer() {
        assert!(item(&["a", "b"], 2).check_invariants().is_err());
        assert!(item(&["a", "b"], 1).check_invariants().is_ok());
    }

    #[test]
    fn accepted_item_keeps_true_options_only() {
        let q = item(&["Type-checks", "Links", "Publishes"], 0);
        let accepted = AcceptedItem::from_verdicts(
            &q,
            vec![
                verdict("Type-checks", true),
                verdict("Links", false),
                verdict("Publishes", false),
            ],
        )
        .expect("one true verdict");
        assert_eq!(accepted.options, vec!["Type-checks".to_string()]);
        assert_eq!(accepted.answer.as_deref(), Some("Type-checks"));
        assert_eq!(accepted.explanation, q.explanation);
        assert_eq!(accepted.verdicts.len(), 3);
    }

    #[test]
    fn accepted_item_drops_answer_that_failed_validation() {
        let q = item(&["Type-checks", "Links"], 0);
        let accepted = AcceptedItem::from_verdicts(
            &q,
            vec![verdict("Type-checks", false), verdict("Links", true)],
        )
        .unwrap();
        assert_eq!(accepted.answer, None);
        assert_eq!(accepted.options, vec!["Links".to_string()]);
    }

    #[test]
    fn all_false_verdicts_yield_nothing() {
        let q = item(&["a", "b"], 0);
        assert!(
            AcceptedItem::from_verdicts(&q, vec![verdict("a", false), verdict("b", false)])
                .is_none()
        );
    }

    #[test]
    fn history_record_serializes_as_single_json_line() {
        let rec = HistoryRecord::new("What is\n a crate?");
        let line = serde_json::to_string(&rec).unwrap();
        assert!(!line.contains('\n'));
        let back: HistoryRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.question, "what is a crate?");
        assert_eq!(back.fingerprint, Fingerprint::of("what is a crate?"));
    }
}
