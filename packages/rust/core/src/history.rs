//! Dedup history: the fingerprints of every question accepted so far.
//!
//! The store is append-only. [`FileHistory`] keeps one JSON line per record
//! and syncs each append before the in-memory set changes, so an interrupted
//! run never records a fingerprint it did not fully accept.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use quizforge_shared::{Fingerprint, HistoryRecord, QuizError, Result};

/// Persisted set of accepted question fingerprints.
pub trait HistoryStore: Send {
    /// Whether `fingerprint` was accepted before.
    fn contains(&self, fingerprint: &Fingerprint) -> bool;

    /// Record `question` as accepted.
    ///
    /// Fails with [`QuizError::Duplicate`] when its fingerprint is already
    /// present; the store is left unchanged in that case.
    fn record(&mut self, question: &str) -> Result<HistoryRecord>;

    /// Normalized text of the last `n` recorded questions, oldest first.
    fn recent(&self, n: usize) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory index shared by both store implementations.
#[derive(Debug, Default)]
struct HistoryIndex {
    seen: HashSet<Fingerprint>,
    records: Vec<HistoryRecord>,
}

impl HistoryIndex {
    /// Insert unless already present. Returns whether it was inserted.
    fn insert(&mut self, record: HistoryRecord) -> bool {
        if !self.seen.insert(record.fingerprint.clone()) {
            return false;
        }
        self.records.push(record);
        true
    }

    fn recent(&self, n: usize) -> Vec<String> {
        let start = self.records.len().saturating_sub(n);
        self.records[start..]
            .iter()
            .map(|r| r.question.clone())
            .filter(|q| !q.is_empty())
            .collect()
    }

    fn check_new(&self, question: &str) -> Result<HistoryRecord> {
        let record = HistoryRecord::new(question);
        if self.seen.contains(&record.fingerprint) {
            return Err(QuizError::Duplicate {
                fingerprint: record.fingerprint.to_string(),
            });
        }
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// MemoryHistory
// ---------------------------------------------------------------------------

/// Process-lifetime history, for tests and `--no-history` runs.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    index: HistoryIndex,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistory {
    fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.seen.contains(fingerprint)
    }

    fn record(&mut self, question: &str) -> Result<HistoryRecord> {
        let record = self.index.check_new(question)?;
        self.index.insert(record.clone());
        Ok(record)
    }

    fn recent(&self, n: usize) -> Vec<String> {
        self.index.recent(n)
    }

    fn len(&self) -> usize {
        self.index.records.len()
    }
}

// ---------------------------------------------------------------------------
// FileHistory
// ---------------------------------------------------------------------------

/// JSON Lines history file, one [`HistoryRecord`] per line.
#[derive(Debug)]
pub struct FileHistory {
    path: PathBuf,
    index: HistoryIndex,
    /// The file ends in a torn line; the next append starts a fresh one.
    torn_tail: bool,
}

impl FileHistory {
    /// Load the history at `path`. A missing file is an empty history.
    ///
    /// Malformed lines (such as a torn final write) and repeated fingerprints
    /// are skipped, so loading the same file twice yields the same set.
    /// Lines are decoded one at a time; a line that is not valid UTF-8 is
    /// skipped like any other malformed line.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut index = HistoryIndex::default();
        let mut torn_tail = false;

        if path.exists() {
            let content = std::fs::read(&path).map_err(|e| QuizError::io(&path, e))?;
            torn_tail = content.last().is_some_and(|b| *b != b'\n');
            let mut skipped = 0usize;
            for (lineno, bytes) in content.split(|b| *b == b'\n').enumerate() {
                let line = match std::str::from_utf8(bytes) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(path = %path.display(), line = lineno + 1, error = %e, "skipping undecodable history line");
                        skipped += 1;
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<HistoryRecord>(line) {
                    Ok(record) => {
                        if !index.insert(record) {
                            skipped += 1;
                        }
                    }
                    Err(e) => {
                        warn!(path = %path.display(), line = lineno + 1, error = %e, "skipping malformed history line");
                        skipped += 1;
                    }
                }
            }
            info!(path = %path.display(), records = index.records.len(), skipped, "loaded history");
        } else {
            debug!(path = %path.display(), "no history file yet");
        }

        Ok(Self {
            path,
            index,
            torn_tail,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single write, then sync.
    fn append(&mut self, record: &HistoryRecord) -> Result<()> {
        let mut buf = String::new();
        if self.torn_tail {
            buf.push('\n');
        }
        buf.push_str(
            &serde_json::to_string(record)
                .map_err(|e| QuizError::Storage(format!("failed to encode history record: {e}")))?,
        );
        buf.push('\n');
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| QuizError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| QuizError::io(&self.path, e))?;
        file.write_all(buf.as_bytes())
            .map_err(|e| QuizError::io(&self.path, e))?;
        file.sync_data().map_err(|e| QuizError::io(&self.path, e))?;
        self.torn_tail = false;
        Ok(())
    }
}

impl HistoryStore for FileHistory {
    fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.seen.contains(fingerprint)
    }

    fn record(&mut self, question: &str) -> Result<HistoryRecord> {
        let record = self.index.check_new(question)?;
        self.append(&record)?;
        self.index.insert(record.clone());
        debug!(fingerprint = %record.fingerprint, "recorded history");
        Ok(record)
    }

    fn recent(&self, n: usize) -> Vec<String> {
        self.index.recent(n)
    }

    fn len(&self) -> usize {
        self.index.records.len()
    }
}
