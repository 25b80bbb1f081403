//! Optional debug sinks for raw prompts, request payloads, and responses.
//!
//! Purely observational: every write failure is logged and swallowed, and
//! nothing here is ever read back by the pipeline.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use quizforge_shared::DebugConfig;

/// Append-only dump targets. Each one is disabled when its path is `None`.
#[derive(Debug, Default)]
pub struct DumpSink {
    prompt_path: Option<PathBuf>,
    payload_path: Option<PathBuf>,
    response_path: Option<PathBuf>,
    /// Serializes appends so concurrent callers never interleave lines.
    lock: Mutex<()>,
}

impl DumpSink {
    pub fn from_config(config: &DebugConfig) -> Self {
        Self {
            prompt_path: config.dump_prompt.as_ref().map(PathBuf::from),
            payload_path: config.dump_payload.as_ref().map(PathBuf::from),
            response_path: config.dump_response.as_ref().map(PathBuf::from),
            lock: Mutex::new(()),
        }
    }

    /// A sink with every target disabled.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn payload_enabled(&self) -> bool {
        self.payload_path.is_some()
    }

    /// Overwrite the prompt dump with the latest rendered prompt.
    pub fn record_prompt(&self, prompt: &str) {
        let Some(path) = &self.prompt_path else {
            return;
        };
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match std::fs::write(path, prompt) {
            Ok(()) => debug!(path = %path.display(), "wrote prompt dump"),
            Err(e) => warn!(path = %path.display(), error = %e, "could not write prompt dump"),
        }
    }

    /// Append one request payload as a JSON line.
    pub fn record_payload(&self, payload: &serde_json::Value) {
        if let Some(path) = &self.payload_path {
            self.append_line(path, payload);
        }
    }

    /// Append one raw backend response as a JSON line.
    pub fn record_response(&self, response: &serde_json::Value) {
        if let Some(path) = &self.response_path {
            self.append_line(path, response);
        }
    }

    fn append_line(&self, path: &Path, value: &serde_json::Value) {
        let line = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "could not serialize dump entry");
                return;
            }
        };
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "could not append dump entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn tmp(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("qf-dump-{}-{name}", Uuid::now_v7()))
    }

    #[test]
    fn disabled_sink_writes_nothing() {
        let sink = DumpSink::disabled();
        assert!(!sink.payload_enabled());
        sink.record_prompt("hello");
        sink.record_payload(&serde_json::json!({"a": 1}));
    }

    #[test]
    fn payloads_append_as_json_lines() {
        let path = tmp("payload.jsonl");
        let sink = DumpSink::from_config(&DebugConfig {
            dump_payload: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        });
        sink.record_payload(&serde_json::json!({"model": "m", "prompt": "one\ntwo"}));
        sink.record_payload(&serde_json::json!({"model": "m", "prompt": "three"}));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["prompt"], "one\ntwo");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn prompt_dump_keeps_latest_only() {
        let path = tmp("prompt.txt");
        let sink = DumpSink::from_config(&DebugConfig {
            dump_prompt: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        });
        sink.record_prompt("first");
        sink.record_prompt("second");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let _ = std::fs::remove_file(&path);
    }
}
