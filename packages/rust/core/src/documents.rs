//! `quiz.json` and `answer_key.json`: the hand-off between `prepare` and
//! `validate`.
//!
//! The quiz file is safe to show a learner (no answers). The answer key maps
//! each id to its answer text and explanation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use quizforge_shared::{QuestionItem, QuizError, Result};

/// Public view of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizEntry {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
}

/// Answer-key entry for one question id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
}

fn default_topic() -> String {
    "General".into()
}

fn default_difficulty() -> String {
    "medium".into()
}

impl From<&QuestionItem> for QuizEntry {
    fn from(item: &QuestionItem) -> Self {
        Self {
            id: item.id.clone(),
            question: item.question.clone(),
            options: item.options.clone(),
            topic: item.topic.clone(),
            difficulty: item.difficulty.clone(),
        }
    }
}

/// Pretty JSON with a trailing newline.
pub(crate) fn write_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut text = serde_json::to_string_pretty(value)
        .map_err(|e| QuizError::validation(format!("failed to encode {}: {e}", path.display())))?;
    text.push('\n');
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| QuizError::io(parent, e))?;
    }
    std::fs::write(path, text).map_err(|e| QuizError::io(path, e))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| QuizError::io(path, e))?;
    serde_json::from_str(&text)
        .map_err(|e| QuizError::validation(format!("invalid JSON in {}: {e}", path.display())))
}

/// Write the quiz and answer key for `items`.
pub fn write_quiz_files(items: &[QuestionItem], quiz_path: &Path, answers_path: &Path) -> Result<()> {
    let quiz: Vec<QuizEntry> = items.iter().map(QuizEntry::from).collect();
    let key: BTreeMap<&str, AnswerEntry> = items
        .iter()
        .map(|item| {
            (
                item.id.as_str(),
                AnswerEntry {
                    answer: item.answer().unwrap_or_default().to_string(),
                    explanation: item.explanation.clone().unwrap_or_default(),
                },
            )
        })
        .collect();

    write_pretty(quiz_path, &quiz)?;
    write_pretty(answers_path, &key)?;
    info!(
        questions = items.len(),
        quiz = %quiz_path.display(),
        answers = %answers_path.display(),
        "wrote quiz files"
    );
    Ok(())
}

/// Rebuild question items from a quiz file and its answer key.
///
/// Questions without a key entry, whose answer matches no option, or that
/// break the item invariants (fewer than two options, duplicates) are skipped
/// with a warning.
pub fn load_quiz_files(quiz_path: &Path, answers_path: &Path) -> Result<Vec<QuestionItem>> {
    let quiz: Vec<QuizEntry> = read_json(quiz_path)?;
    let key: BTreeMap<String, AnswerEntry> = read_json(answers_path)?;

    let mut items = Vec::with_capacity(quiz.len());
    for entry in quiz {
        let Some(answer) = key.get(&entry.id) else {
            warn!(id = %entry.id, "no answer key entry, skipping question");
            continue;
        };
        let wanted = answer.answer.trim().to_lowercase();
        let Some(correct_option) = entry
            .options
            .iter()
            .position(|o| o.trim().to_lowercase() == wanted)
        else {
            warn!(id = %entry.id, answer = %answer.answer, "answer matches no option, skipping question");
            continue;
        };
        let explanation = answer.explanation.trim();
        let item = QuestionItem {
            id: entry.id,
            question: entry.question,
            options: entry.options,
            correct_option,
            explanation: (!explanation.is_empty()).then(|| explanation.to_string()),
            topic: entry.topic,
            difficulty: entry.difficulty,
        };
        if let Err(e) = item.check_invariants() {
            warn!(id = %item.id, error = %e, "invalid quiz entry, skipping question");
            continue;
        }
        items.push(item);
    }
    info!(questions = items.len(), quiz = %quiz_path.display(), "loaded quiz files");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn tmp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("qf-docs-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn item(id: &str, correct: usize) -> QuestionItem {
        QuestionItem {
            id: id.into(),
            question: format!("Question {id}?"),
            options: vec!["One".into(), "Two".into(), "Three".into()],
            correct_option: correct,
            explanation: Some(format!("Because {id}.")),
            topic: "numbers".into(),
            difficulty: "easy".into(),
        }
    }

    #[test]
    fn quiz_files_roundtrip_through_disk() {
        let dir = tmp_dir();
        let (quiz, answers) = (dir.join("quiz.json"), dir.join("answer_key.json"));
        let items = vec![item("Q1", 1), item("Q2", 2)];

        write_quiz_files(&items, &quiz, &answers).unwrap();
        let quiz_text = std::fs::read_to_string(&quiz).unwrap();
        assert!(quiz_text.ends_with("]\n"));
        assert!(!quiz_text.contains("Because"));

        let loaded = load_quiz_files(&quiz, &answers).unwrap();
        assert_eq!(loaded, items);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_key_entries_are_skipped() {
        let dir = tmp_dir();
        let (quiz, answers) = (dir.join("quiz.json"), dir.join("answer_key.json"));
        write_quiz_files(&[item("Q1", 0), item("Q2", 0)], &quiz, &answers).unwrap();
        std::fs::write(
            &answers,
            r#"{"Q2": {"answer": "one", "explanation": ""}, "Q9": {"answer": "x"}}"#,
        )
        .unwrap();

        let loaded = load_quiz_files(&quiz, &answers).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "Q2");
        assert_eq!(loaded[0].correct_option, 0);
        assert_eq!(loaded[0].explanation, None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn entries_breaking_item_invariants_are_skipped() {
        let dir = tmp_dir();
        let (quiz, answers) = (dir.join("quiz.json"), dir.join("answer_key.json"));
        std::fs::write(
            &quiz,
            r#"[
                {"id": "Q1", "question": "Lonely?", "options": ["Yes"]},
                {"id": "Q2", "question": "Echo?", "options": ["Same", " same ", "Other"]},
                {"id": "Q3", "question": "Fine?", "options": ["Yes", "No"]}
            ]"#,
        )
        .unwrap();
        std::fs::write(
            &answers,
            r#"{"Q1": {"answer": "Yes"}, "Q2": {"answer": "Other"}, "Q3": {"answer": "No"}}"#,
        )
        .unwrap();

        let loaded = load_quiz_files(&quiz, &answers).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "Q3");
        assert_eq!(loaded[0].correct_option, 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_files_are_errors() {
        let dir = tmp_dir();
        let quiz = dir.join("quiz.json");
        std::fs::write(&quiz, "{not json").unwrap();
        assert!(load_quiz_files(&quiz, &dir.join("answer_key.json")).is_err());
        assert!(load_quiz_files(&dir.join("absent.json"), &quiz).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
