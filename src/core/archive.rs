//! Narration archive decoding.
//!
//! Reads a zip of audio or caption files into memory, keeping only entries
//! of the requested kind. Problems with single entries are collected into
//! the scan result; only an unreadable archive fails as a whole.

use std::io::{Cursor, Read};

use thiserror::Error;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::domain::NarrationKind;

use super::limits::{LimitViolation, SyncLimits};

const WEBVTT_HEADER: &[u8] = b"WEBVTT";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Errors that make the whole archive unusable
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Not a valid zip archive: {0}")]
    Invalid(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One decoded archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    /// Final path component
    pub fn file_name(&self) -> &str {
        base_name(&self.name)
    }
}

/// Why an entry was not accepted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("Unsupported file type for {0}")]
    WrongExtension(NarrationKind),

    #[error(transparent)]
    TooLarge(LimitViolation),

    #[error("Caption file does not start with WEBVTT")]
    MissingCaptionHeader,

    #[error("Unreadable entry: {0}")]
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    pub name: String,
    pub reason: RejectReason,
}

/// Result of scanning one archive
#[derive(Debug, Clone, Default)]
pub struct ArchiveScan {
    pub accepted: Vec<ArchiveEntry>,
    pub rejected: Vec<RejectedEntry>,
}

fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Entries the archiver adds on its own (`__MACOSX/`, `.DS_Store`, ...)
fn is_platform_noise(name: &str) -> bool {
    name.starts_with("__MACOSX/") || name.contains("/__MACOSX/") || base_name(name).starts_with('.')
}

fn has_caption_header(data: &[u8]) -> bool {
    data.strip_prefix(UTF8_BOM)
        .unwrap_or(data)
        .starts_with(WEBVTT_HEADER)
}

/// Decode `bytes` as a zip and collect the entries usable as `kind`.
///
/// Blocking; callers on the async runtime should use `spawn_blocking`.
pub fn read_archive(
    bytes: &[u8],
    kind: NarrationKind,
    limits: &SyncLimits,
) -> Result<ArchiveScan, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut scan = ArchiveScan::default();

    for index in 0..archive.len() {
        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(e) => {
                scan.rejected.push(RejectedEntry {
                    name: format!("#{}", index),
                    reason: RejectReason::Unreadable(e.to_string()),
                });
                continue;
            }
        };

        let name = file.name().to_string();
        if file.is_dir() || is_platform_noise(&name) {
            debug!(entry = %name, "Skipping archive entry");
            continue;
        }

        let reject = |reason| RejectedEntry {
            name: name.clone(),
            reason,
        };

        if !limits.accepts_entry_name(kind, base_name(&name)) {
            scan.rejected.push(reject(RejectReason::WrongExtension(kind)));
            continue;
        }
        if let Err(violation) = limits.validate_entry(file.size()) {
            scan.rejected.push(reject(RejectReason::TooLarge(violation)));
            continue;
        }

        // Bound the read in case the declared size is wrong
        let mut data = Vec::with_capacity(file.size() as usize);
        if let Err(e) = (&mut file)
            .take(limits.max_entry_bytes + 1)
            .read_to_end(&mut data)
        {
            scan.rejected.push(reject(RejectReason::Unreadable(e.to_string())));
            continue;
        }
        if let Err(violation) = limits.validate_entry(data.len() as u64) {
            scan.rejected.push(reject(RejectReason::TooLarge(violation)));
            continue;
        }

        if kind == NarrationKind::Caption && !has_caption_header(&data) {
            scan.rejected.push(reject(RejectReason::MissingCaptionHeader));
            continue;
        }

        scan.accepted.push(ArchiveEntry { name, data });
    }

    info!(
        %kind,
        accepted = scan.accepted.len(),
        rejected = scan.rejected.len(),
        "Scanned narration archive"
    );
    Ok(scan)
}
