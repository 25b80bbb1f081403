//! libSQL relational sink for accepted questions.
//!
//! The [`Storage`] struct wraps a local libSQL database holding two tables:
//! `test_questions` (one row per accepted item) and `test_answers` (one row
//! per evaluated option, keyed to its question by a random UUID).

mod migrations;

use std::path::Path;

use libsql::{Connection, Database, params};
use quizforge_shared::{AcceptedItem, QuizError, Result};
use tracing::debug;
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

fn storage_err(e: libsql::Error) -> QuizError {
    QuizError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| QuizError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(storage_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        QuizError::Storage(format!("migration v{} failed: {e}", migration.version))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Accepted items
    // -----------------------------------------------------------------------

    /// Insert one accepted item: its question row, then one answer row per
    /// verdict, all in a single transaction. Returns the question UUID.
    pub async fn insert_accepted(&self, item: &AcceptedItem) -> Result<String> {
        let question_uuid = Uuid::new_v4().to_string();
        let tx = self.conn.transaction().await.map_err(storage_err)?;

        tx.execute(
            "INSERT INTO test_questions (question, question_uuid, explanation) VALUES (?1, ?2, ?3)",
            params![
                item.question.as_str(),
                question_uuid.as_str(),
                item.explanation.clone().unwrap_or_default()
            ],
        )
        .await
        .map_err(storage_err)?;

        for verdict in &item.verdicts {
            tx.execute(
                "INSERT INTO test_answers (question_uuid, option, true_or_false) VALUES (?1, ?2, ?3)",
                params![
                    question_uuid.as_str(),
                    verdict.option.as_str(),
                    i64::from(verdict.verdict)
                ],
            )
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        debug!(id = %item.id, %question_uuid, answers = item.verdicts.len(), "inserted accepted item");
        Ok(question_uuid)
    }

    /// Number of stored questions.
    pub async fn count_questions(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM test_questions", params![])
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)?.max(0) as u64),
            None => Ok(0),
        }
    }

    /// `(option, verdict)` rows for a question, in insertion order.
    #[cfg(test)]
    pub(crate) async fn answers_for(&self, question_uuid: &str) -> Result<Vec<(String, bool)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT option, true_or_false FROM test_answers WHERE question_uuid = ?1 ORDER BY id",
                params![question_uuid],
            )
            .await
            .map_err(storage_err)?;

        let mut answers = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let option: String = row.get(0).map_err(storage_err)?;
            let flag: i64 = row.get(1).map_err(storage_err)?;
            answers.push((option, flag != 0));
        }
        Ok(answers)
    }

    /// Stored question text and explanation for a UUID.
    #[cfg(test)]
    pub(crate) async fn get_question(&self, question_uuid: &str) -> Result<Option<(String, String)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT question, COALESCE(explanation, '') FROM test_questions WHERE question_uuid = ?1",
                params![question_uuid],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some((
                row.get::<String>(0).map_err(storage_err)?,
                row.get::<String>(1).map_err(storage_err)?,
            ))),
            None => Ok(None),
        }
    }
}
