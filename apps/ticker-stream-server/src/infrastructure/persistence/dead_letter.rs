//! JSON Lines Dead Letter
//!
//! Appends records a flush gave up on to a local file, one JSON object per
//! line, so they can be replayed into the store by hand.
//!
//! ```json
//! {"failedAt":"2024-01-15T10:00:01Z","reason":"store backend error: disk I/O error","record":{...}}
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::application::ports::{DeadLetterSink, StoreError};
use crate::domain::tick::TickRecord;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeadLetterLine<'a> {
    failed_at: DateTime<Utc>,
    reason: &'a str,
    record: &'a TickRecord,
}

/// Dead-letter sink writing JSON lines to a file.
#[derive(Debug)]
pub struct JsonlDeadLetter {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlDeadLetter {
    /// Create a sink appending to `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Target file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeadLetterSink for JsonlDeadLetter {
    async fn write(&self, records: &[TickRecord], reason: &str) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let failed_at = Utc::now();
        let mut buf = Vec::with_capacity(records.len() * 320);
        for record in records {
            serde_json::to_writer(
                &mut buf,
                &DeadLetterLine {
                    failed_at,
                    reason,
                    record,
                },
            )
            .map_err(|e| StoreError::Backend(format!("serialize dead letter: {e}")))?;
            buf.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("create {}: {e}", parent.display())))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("open {}: {e}", self.path.display())))?;
        file.write_all(&buf)
            .await
            .map_err(|e| StoreError::Backend(format!("write {}: {e}", self.path.display())))?;
        file.flush()
            .await
            .map_err(|e| StoreError::Backend(format!("flush {}: {e}", self.path.display())))?;

        tracing::warn!(
            count = records.len(),
            path = %self.path.display(),
            reason,
            "Records written to dead letter"
        );
        Ok(())
    }
}
