//! Parsing of raw generation output into a [`QuestionItem`].
//!
//! Models wrap their JSON in prose, code fences, or both, and label options
//! in a dozen ways. Everything here is lenient about framing and strict about
//! structure: every failure is a [`QuizError::Parse`] and consumes a round.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use quizforge_shared::{QuestionItem, QuizError, Result};

static FENCE_RES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?s)```\s*json\s*\n(.*?)```").expect("valid regex"),
        Regex::new(r"(?s)```\s*JSON\s*\n(.*?)```").expect("valid regex"),
        Regex::new(r"(?s)```\s*\n(.*?)```").expect("valid regex"),
    ]
});

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

static OPTION_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[A-Da-d]\s*[\)\.:\-]\s*").expect("valid regex"));

static LETTER_ANSWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Da-d]\s*[\)\.:\-]?$").expect("valid regex"));

/// Parse one generated question.
///
/// `id` becomes the item id. When `options_per_question` is non-zero the
/// option count must match it exactly.
pub fn parse_question(raw: &str, id: &str, options_per_question: usize) -> Result<QuestionItem> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(QuizError::parse("empty response"));
    }

    let data = parse_json_lenient(extract_json(text))?;
    let obj = match &data {
        Value::Object(map) => map,
        Value::Array(items) => items
            .iter()
            .find_map(Value::as_object)
            .ok_or_else(|| QuizError::parse("array holds no question object"))?,
        other => {
            return Err(QuizError::parse(format!(
                "expected a JSON object, got {}",
                json_kind(other)
            )));
        }
    };

    let question = str_field(obj, "question");
    if question.is_empty() {
        return Err(QuizError::parse("question text is empty"));
    }

    let options = parse_options(obj.get("options"))?;
    if options.len() < 2 {
        return Err(QuizError::parse(format!(
            "expected at least 2 options, got {}",
            options.len()
        )));
    }
    if options_per_question > 0 && options.len() != options_per_question {
        return Err(QuizError::parse(format!(
            "expected {options_per_question} options, got {}",
            options.len()
        )));
    }
    let mut seen = HashSet::new();
    for opt in &options {
        if !seen.insert(opt.to_lowercase()) {
            return Err(QuizError::parse(format!("duplicate option '{opt}'")));
        }
    }

    let answer = match obj.get("answer") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if answer.is_empty() {
        return Err(QuizError::parse("answer must be the full correct option text"));
    }
    let correct_option = resolve_answer(&answer, &options, id)?;

    let explanation = Some(str_field(obj, "explanation")).filter(|e| !e.is_empty());
    let topic = non_empty_or(str_field(obj, "topic"), "General");
    let difficulty = non_empty_or(str_field(obj, "difficulty"), "medium");

    let item = QuestionItem {
        id: id.to_string(),
        question,
        options,
        correct_option,
        explanation,
        topic,
        difficulty,
    };
    item.check_invariants()
        .map_err(|e| QuizError::parse(e.to_string()))?;
    debug!(id, options = item.options.len(), "parsed question");
    Ok(item)
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Pick the JSON payload out of surrounding prose: fenced block first, then
/// the first balanced object, then the first balanced array, then everything.
fn extract_json(text: &str) -> &str {
    for re in FENCE_RES.iter() {
        if let Some(m) = re.captures(text).and_then(|c| c.get(1)) {
            return m.as_str().trim();
        }
    }
    balanced_slice(text, '{', '}')
        .or_else(|| balanced_slice(text, '[', ']'))
        .unwrap_or(text)
}

/// First balanced `open … close` span, ignoring brackets inside strings.
fn balanced_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_str {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }
        if ch == '"' {
            in_str = true;
        } else if ch == open {
            depth += 1;
        } else if ch == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                let end = start + offset + ch.len_utf8();
                return Some(text[start..end].trim());
            }
        }
    }
    None
}

fn parse_json_lenient(src: &str) -> Result<Value> {
    match serde_json::from_str(src) {
        Ok(v) => Ok(v),
        Err(first) => {
            let cleaned = TRAILING_COMMA_RE.replace_all(src, "$1");
            serde_json::from_str(&cleaned)
                .map_err(|_| QuizError::parse(format!("invalid JSON: {first}")))
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.is_empty() { default.to_string() } else { value }
}

/// Strip a leading `A)`, `b.`, `C:` or `d -` label.
fn strip_label(text: &str) -> String {
    let trimmed = text.trim();
    let cleaned = OPTION_LABEL_RE.replace(trimmed, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        trimmed.to_string()
    } else {
        cleaned.to_string()
    }
}

fn parse_options(value: Option<&Value>) -> Result<Vec<String>> {
    let raw: Vec<&str> = match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(Value::as_str)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| QuizError::parse("options must all be strings"))?,
        Some(Value::Object(map)) => ["A", "B", "C", "D"]
            .iter()
            .map(|k| map.get(*k).and_then(Value::as_str))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| QuizError::parse("option object must have string keys A-D"))?,
        _ => {
            return Err(QuizError::parse(
                "options must be a list of strings or an object keyed A-D",
            ));
        }
    };

    let options: Vec<String> = raw.into_iter().map(strip_label).collect();
    if options.iter().any(|o| o.is_empty()) {
        return Err(QuizError::parse("options must be non-empty"));
    }
    Ok(options)
}

/// Index of the option `answer` refers to.
fn resolve_answer(answer: &str, options: &[String], id: &str) -> Result<usize> {
    let norm = answer.to_lowercase();
    if let Some(i) = options.iter().position(|o| o.to_lowercase() == norm) {
        return Ok(i);
    }

    let stripped = strip_label(answer).to_lowercase();
    if stripped != norm {
        if let Some(i) = options.iter().position(|o| o.to_lowercase() == stripped) {
            warn!(id, "normalized answer text by stripping its label");
            return Ok(i);
        }
    }

    if LETTER_ANSWER_RE.is_match(answer) {
        let letter = answer.chars().next().map(|c| c.to_ascii_uppercase());
        if let Some(i) = letter.map(|c| (c as u8 - b'A') as usize) {
            if i < options.len() {
                warn!(id, "mapped single-letter answer to option text");
                return Ok(i);
            }
        }
    }

    Err(QuizError::parse(format!(
        "answer '{answer}' does not match any option"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = r#"{"question": "Which keyword moves ownership into a closure?",
        "options": ["move", "ref", "static", "dyn"],
        "answer": "move", "explanation": "move forces captures by value.",
        "topic": "closures", "difficulty": "easy"}"#;

    #[test]
    fn parses_plain_object() {
        let item = parse_question(PLAIN, "Q1", 4).unwrap();
        assert_eq!(item.id, "Q1");
        assert_eq!(item.correct_option, 0);
        assert_eq!(item.answer(), Some("move"));
        assert_eq!(item.topic, "closures");
        assert_eq!(item.explanation.as_deref(), Some("move forces captures by value."));
    }

    #[test]
    fn parses_fenced_block_with_prose() {
        let raw = format!("Sure! Here you go:\n```json\n{PLAIN}\n```\nHope it helps.");
        assert!(parse_question(&raw, "Q2", 4).is_ok());
        let raw = format!("```\n{PLAIN}\n```");
        assert!(parse_question(&raw, "Q2", 4).is_ok());
    }

    #[test]
    fn prefers_object_over_nested_array() {
        let raw = format!("note [draft]: {PLAIN} trailing");
        let item = parse_question(&raw, "Q1", 4).unwrap();
        assert_eq!(item.options.len(), 4);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_slicing() {
        let raw = r#"Output: {"question": "What does `{}` print in format!?",
            "options": ["Display", "Debug", "Nothing", "Hex"], "answer": "Display"} done"#;
        let item = parse_question(raw, "Q1", 4).unwrap();
        assert!(item.question.contains("`{}`"));
    }

    #[test]
    fn tolerates_trailing_commas() {
        let raw = r#"{"question": "Q?", "options": ["a", "b", "c", "d",], "answer": "c",}"#;
        assert_eq!(parse_question(raw, "Q1", 4).unwrap().correct_option, 2);
    }

    #[test]
    fn uses_first_object_of_an_array() {
        let raw = format!("[{PLAIN}]");
        assert!(parse_question(&raw, "Q1", 4).is_ok());
        assert!(parse_question("[]", "Q1", 4).is_err());
    }

    #[test]
    fn strips_option_labels_and_maps_keyed_options() {
        let raw = r#"{"question": "Pick one", "options": {"A": "A) Vec", "B": "b. Box", "C": "C: Rc", "D": "d - Arc"}, "answer": "C"}"#;
        let item = parse_question(raw, "Q1", 4).unwrap();
        assert_eq!(item.options, vec!["Vec", "Box", "Rc", "Arc"]);
        assert_eq!(item.answer(), Some("Rc"));
    }

    #[test]
    fn answer_with_label_resolves_to_option() {
        let raw = r#"{"question": "Pick", "options": ["Vec", "Box", "Rc", "Arc"], "answer": "B) Box"}"#;
        assert_eq!(parse_question(raw, "Q1", 4).unwrap().correct_option, 1);
    }

    #[test]
    fn answer_matching_is_case_insensitive() {
        let raw = r#"{"question": "Pick", "options": ["Vec", "Box", "Rc", "Arc"], "answer": "ARC"}"#;
        assert_eq!(parse_question(raw, "Q1", 4).unwrap().correct_option, 3);
    }

    #[test]
    fn rejects_structural_failures() {
        let cases = [
            ("", "empty response"),
            ("no json here", "invalid JSON"),
            (r#"{"question": "", "options": ["a", "b"], "answer": "a"}"#, "question"),
            (r#"{"question": "Q", "options": ["a", "A", "b", "c"], "answer": "a"}"#, "duplicate"),
            (r#"{"question": "Q", "options": ["a", "b", "c"], "answer": "a"}"#, "expected 4"),
            (r#"{"question": "Q", "options": ["a", "b", "c", "d"], "answer": "z"}"#, "does not match"),
            (r#"{"question": "Q", "options": ["a", "b", "c", "d"]}"#, "answer"),
            (r#"{"question": "Q", "options": "a, b"}"#, "options"),
            ("42", "expected a JSON object"),
        ];
        for (raw, needle) in cases {
            let err = parse_question(raw, "Q1", 4).unwrap_err();
            assert!(matches!(err, QuizError::Parse { .. }), "{raw}: {err:?}");
            assert!(err.to_string().contains(needle), "{raw}: {err}");
        }
    }

    #[test]
    fn any_count_of_two_or_more_when_unconstrained() {
        let raw = r#"{"question": "Q", "options": ["yes", "no"], "answer": "no"}"#;
        assert_eq!(parse_question(raw, "Q1", 0).unwrap().options.len(), 2);
        let raw = r#"{"question": "Q", "options": ["yes"], "answer": "yes"}"#;
        assert!(parse_question(raw, "Q1", 0).is_err());
    }
}
