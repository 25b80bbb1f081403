//! SQL migration definitions for the QuizForge database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: test_questions, test_answers",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per accepted question
CREATE TABLE IF NOT EXISTS test_questions (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    question      TEXT NOT NULL,
    question_uuid TEXT NOT NULL UNIQUE,
    explanation   TEXT
);

-- One row per evaluated option of an accepted question
CREATE TABLE IF NOT EXISTS test_answers (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    question_uuid TEXT NOT NULL REFERENCES test_questions(question_uuid) ON DELETE CASCADE,
    option        TEXT NOT NULL,
    true_or_false INTEGER NOT NULL CHECK (true_or_false IN (0, 1))
);

CREATE INDEX IF NOT EXISTS idx_test_answers_question ON test_answers(question_uuid);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
