//! Limits, timeouts and retry policy for bulk operations.
//!
//! Bounds what a single upload or archive import may cost:
//! - Per-operation timeouts (single media add, archive import)
//! - Upload and archive-entry sizes
//! - Accepted archive entry name patterns per narration kind

use std::time::Duration;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::NarrationKind;

/// Limits applied by the session to bulk operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLimits {
    /// Single media add timeout in seconds (default: 30)
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_seconds: u64,

    /// Archive import timeout in seconds (default: 60)
    #[serde(default = "default_archive_timeout")]
    pub archive_timeout_seconds: u64,

    /// Largest single media upload in bytes (default: 100MB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Largest archive entry in bytes (default: 50MB)
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,

    /// File name patterns accepted as narration audio
    #[serde(default = "default_audio_patterns")]
    pub audio_patterns: Vec<String>,

    /// File name patterns accepted as captions
    #[serde(default = "default_caption_patterns")]
    pub caption_patterns: Vec<String>,

    /// Retry policy for transient store failures
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_upload_timeout() -> u64 {
    30
}
fn default_archive_timeout() -> u64 {
    60
}
fn default_max_upload_bytes() -> u64 {
    100 * 1024 * 1024
} // 100MB
fn default_max_entry_bytes() -> u64 {
    50 * 1024 * 1024
} // 50MB

fn default_audio_patterns() -> Vec<String> {
    ["*.mp3", "*.wav", "*.m4a", "*.ogg", "*.aac"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_caption_patterns() -> Vec<String> {
    vec!["*.vtt".to_string()]
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            upload_timeout_seconds: default_upload_timeout(),
            archive_timeout_seconds: default_archive_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
            max_entry_bytes: default_max_entry_bytes(),
            audio_patterns: default_audio_patterns(),
            caption_patterns: default_caption_patterns(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncLimits {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_seconds)
    }

    pub fn archive_timeout(&self) -> Duration {
        Duration::from_secs(self.archive_timeout_seconds)
    }

    fn patterns(&self, kind: NarrationKind) -> &[String] {
        match kind {
            NarrationKind::Audio => &self.audio_patterns,
            NarrationKind::Caption => &self.caption_patterns,
        }
    }

    /// Check an archive entry's file name against the patterns for `kind`
    pub fn accepts_entry_name(&self, kind: NarrationKind, file_name: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::new()
        };
        self.patterns(kind).iter().any(|p| {
            Pattern::new(p)
                .map(|pattern| pattern.matches_with(file_name, options))
                .unwrap_or(false)
        })
    }

    /// Validate a single media upload
    pub fn validate_upload(&self, size: u64) -> Result<(), LimitViolation> {
        if size > self.max_upload_bytes {
            return Err(LimitViolation::UploadTooLarge {
                actual: size,
                limit: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    /// Validate one archive entry
    pub fn validate_entry(&self, size: u64) -> Result<(), LimitViolation> {
        if size > self.max_entry_bytes {
            return Err(LimitViolation::EntryTooLarge {
                actual: size,
                limit: self.max_entry_bytes,
            });
        }
        Ok(())
    }
}

/// Retry policy for transient store failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    250
}
fn default_max_delay() -> u64 {
    5000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Limit violations (validation errors, never fatal)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitViolation {
    #[error("Upload too large: {actual} > {limit} bytes")]
    UploadTooLarge { actual: u64, limit: u64 },

    #[error("Archive entry too large: {actual} > {limit} bytes")]
    EntryTooLarge { actual: u64, limit: u64 },

    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },
}
