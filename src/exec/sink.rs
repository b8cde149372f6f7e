// src/exec/sink.rs

//! Destinations for task output.

use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use tracing::info;

use crate::errors::Result;

/// Receives ordered batches of task output lines.
pub trait LogSink: Send + Sync + Debug {
    fn handle(&self, lines: &[String]) -> Result<()>;
}

/// Appends lines to a per-attempt log file.
#[derive(Debug)]
pub struct FileLogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileLogSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening task log {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileLogSink {
    fn handle(&self, lines: &[String]) -> Result<()> {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        for line in lines {
            writeln!(file, "{line}")?;
        }
        file.flush()?;
        Ok(())
    }
}

/// Emits each line as a tracing event under `dagflow::task_log`.
#[derive(Debug)]
pub struct TracingLogSink {
    task: String,
}

impl TracingLogSink {
    pub fn new(task: impl Into<String>) -> Self {
        Self { task: task.into() }
    }
}

impl LogSink for TracingLogSink {
    fn handle(&self, lines: &[String]) -> Result<()> {
        for line in lines {
            info!(target: "dagflow::task_log", task = %self.task, "{line}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_sink_appends_in_order() {
        let dir = TempDir::new().unwrap();
        let sink = FileLogSink::create(dir.path().join("nested").join("t.log")).unwrap();
        sink.handle(&["one".into(), "two".into()]).unwrap();
        sink.handle(&["three".into()]).unwrap();

        let text = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(text, "one\ntwo\nthree\n");
    }
}
