//! JSON-lines output for front-end integration
//!
//! With `--json-progress`, progress and results are written to stdout as one
//! JSON object per line and the human-readable output is suppressed.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::image_processing::TransformResult;
use crate::storage::DownloadLink;

/// Last progress emission timestamp (milliseconds since epoch)
static LAST_PROGRESS_MS: AtomicU64 = AtomicU64::new(0);

/// Minimum gap between two progress lines
const PROGRESS_INTERVAL_MS: u64 = 40;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage {
    Progress {
        current: usize,
        total: usize,
        message: String,
    },
    FileCompleted {
        original_name: String,
        processed_key: String,
        processed_name: String,
    },
    FileFailed {
        original_name: String,
        error: String,
    },
    Links {
        session_id: String,
        links: Vec<DownloadLink>,
    },
    Summary {
        session_id: String,
        total_files: usize,
        completed: usize,
        failed: usize,
        flushed: usize,
        duration_secs: f64,
    },
}

impl JsonMessage {
    /// Emit JSON message to stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    /// Emit a progress line, throttled to one per 40ms.
    ///
    /// The final update (`current == total`) is always emitted.
    pub fn progress(current: usize, total: usize, message: impl Into<String>) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let last_ms = LAST_PROGRESS_MS.load(Ordering::Relaxed);

        if now_ms.saturating_sub(last_ms) >= PROGRESS_INTERVAL_MS || current == total {
            LAST_PROGRESS_MS.store(now_ms, Ordering::Relaxed);
            Self::Progress {
                current,
                total,
                message: message.into(),
            }
            .emit();
        }
    }

    /// Message describing one finished item
    pub fn for_result(result: &TransformResult) -> Self {
        match (&result.processed_key, &result.processed_name) {
            (Some(key), Some(name)) if result.is_completed() => Self::FileCompleted {
                original_name: result.original_name.clone(),
                processed_key: key.clone(),
                processed_name: name.clone(),
            },
            _ => Self::FileFailed {
                original_name: result.original_name.clone(),
                error: result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string()),
            },
        }
    }

    pub fn links(session_id: &str, links: Vec<DownloadLink>) {
        Self::Links {
            session_id: session_id.to_string(),
            links,
        }
        .emit();
    }

    pub fn summary(
        session_id: &str,
        total_files: usize,
        completed: usize,
        failed: usize,
        flushed: usize,
        duration_secs: f64,
    ) {
        Self::Summary {
            session_id: session_id.to_string(),
            total_files,
            completed,
            failed,
            flushed,
            duration_secs,
        }
        .emit();
    }
}
