//! Append-only JSON lines sink

use super::{CycleRecord, Recorder};
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One [`CycleRecord`] per line, never rewritten
pub struct JsonLinesRecorder {
    path: PathBuf,
    // Serialises appends from overlapping writers
    write_lock: Mutex<()>,
}

impl JsonLinesRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last `n` records, oldest first
    ///
    /// Lines that fail to parse are skipped with a warning; a missing file
    /// yields an empty list.
    pub async fn recent(&self, n: usize) -> anyhow::Result<Vec<CycleRecord>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(n);

        let mut records = Vec::with_capacity(lines.len() - start);
        for line in &lines[start..] {
            match serde_json::from_str::<CycleRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Skipping malformed record line"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Recorder for JsonLinesRecorder {
    async fn record(&self, record: &CycleRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
