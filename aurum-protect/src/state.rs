//! Persisted circuit-breaker state.
//!
//! A single JSON document rewritten atomically (temp file + rename) on
//! every mutation, so a crash can never leave a half-written pause.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{ProtectError, ProtectResult};

/// Circuit-breaker state surviving restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub is_paused: bool,
    pub pause_reason: Option<String>,
    pub pause_start_time: Option<DateTime<Local>>,
    pub pause_end_time: Option<DateTime<Local>>,
    /// Threshold that engaged the current pause; keys tier escalation
    /// so re-evaluation never extends a pause twice
    #[serde(default)]
    pub pause_threshold: Option<u32>,
    pub consecutive_losses: u32,
    pub total_pause_count: u32,
    pub last_reset_date: NaiveDate,
}

impl CircuitBreakerState {
    /// Fresh state for the given day.
    pub fn new(today: NaiveDate) -> Self {
        Self {
            is_paused: false,
            pause_reason: None,
            pause_start_time: None,
            pause_end_time: None,
            pause_threshold: None,
            consecutive_losses: 0,
            total_pause_count: 0,
            last_reset_date: today,
        }
    }

    /// Load from disk, falling back to fresh state when the file does
    /// not exist.
    pub fn load(path: &Path, today: NaiveDate) -> ProtectResult<Self> {
        if !path.exists() {
            return Ok(Self::new(today));
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persist atomically next to the target path.
    pub fn save(&self, path: &Path) -> ProtectResult<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(tmp.as_file(), self)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| ProtectError::Persist(e.to_string()))?;
        Ok(())
    }

    /// Clear the pause fields, leaving counters untouched.
    pub fn clear_pause(&mut self) {
        self.is_paused = false;
        self.pause_reason = None;
        self.pause_start_time = None;
        self.pause_end_time = None;
        self.pause_threshold = None;
    }
}
