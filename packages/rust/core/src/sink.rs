//! Persistence sinks for accepted items.
//!
//! Sinks receive accepted items by shared reference and never mutate them.
//! Each sink succeeds or fails on its own; one failing never stops another.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, warn};

use quizforge_shared::{AcceptedItem, QuizError, Result};
use quizforge_storage::Storage;

use crate::documents::write_pretty;

/// A destination for accepted items.
#[async_trait]
pub trait ItemSink: Send + Sync {
    fn name(&self) -> &str;

    /// Persist `items`, returning how many were written.
    async fn write(&self, items: &[AcceptedItem]) -> Result<usize>;
}

/// Outcome of one sink write.
#[derive(Debug)]
pub struct SinkReport {
    pub sink: String,
    pub result: std::result::Result<usize, QuizError>,
}

impl SinkReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Write `items` to every sink, collecting one report per sink.
pub async fn write_all(sinks: &[Box<dyn ItemSink>], items: &[AcceptedItem]) -> Vec<SinkReport> {
    let mut reports = Vec::with_capacity(sinks.len());
    for sink in sinks {
        let result = sink.write(items).await;
        match &result {
            Ok(n) => info!(sink = sink.name(), written = n, "sink write complete"),
            Err(e) => warn!(sink = sink.name(), error = %e, "sink write failed"),
        }
        reports.push(SinkReport {
            sink: sink.name().to_string(),
            result,
        });
    }
    reports
}

// ---------------------------------------------------------------------------
// JSON document sink
// ---------------------------------------------------------------------------

/// Ordered JSON array of accepted items, rewritten once per run.
///
/// Output carries no timestamps or generated ids, so identical inputs give
/// byte-identical files.
pub struct JsonSink {
    path: PathBuf,
}

impl JsonSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ItemSink for JsonSink {
    fn name(&self) -> &str {
        "json"
    }

    async fn write(&self, items: &[AcceptedItem]) -> Result<usize> {
        write_pretty(&self.path, items).map_err(|e| QuizError::SinkWrite {
            sink: self.name().to_string(),
            message: e.to_string(),
        })?;
        Ok(items.len())
    }
}

// ---------------------------------------------------------------------------
// Relational sink
// ---------------------------------------------------------------------------

/// libSQL sink: one transaction per accepted item.
pub struct RelationalSink {
    storage: Storage,
}

impl RelationalSink {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Open (and migrate) the database at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let storage = Storage::open(&path).await.map_err(|e| QuizError::SinkWrite {
            sink: "relational".into(),
            message: e.to_string(),
        })?;
        Ok(Self::new(storage))
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

#[async_trait]
impl ItemSink for RelationalSink {
    fn name(&self) -> &str {
        "relational"
    }

    /// Stops at the first failed item; items before it stay committed.
    async fn write(&self, items: &[AcceptedItem]) -> Result<usize> {
        for (written, item) in items.iter().enumerate() {
            self.storage
                .insert_accepted(item)
                .await
                .map_err(|e| QuizError::SinkWrite {
                    sink: self.name().to_string(),
                    message: format!("{} (after {written} items): {e}", item.id),
                })?;
        }
        Ok(items.len())
    }
}
