//! Core sync engine.
//!
//! This module contains:
//! - Handles: ephemeral display handle cache
//! - Cancel: sequence tokens for superseded loads
//! - Loader: per-page media loading and publishing
//! - ClipEditor: buffered clip-timing edits with an outbox
//! - Narration/Archive: block numbering and archive matching
//! - Patcher: page-scoped document updates
//! - Session: the facade tying it all together

pub mod archive;
pub mod cancel;
pub mod clip_editor;
pub mod handles;
pub mod limits;
pub mod loader;
pub mod narration;
pub mod patcher;
pub mod session;

// Re-export commonly used types
pub use archive::{read_archive, ArchiveEntry, ArchiveError, ArchiveScan, RejectReason, RejectedEntry};
pub use cancel::{LoadToken, SequenceGate, Superseded};
pub use clip_editor::{ClipEditError, ClipTimingEditor, EditState, EditorTiming, Outbox, PendingPatch};
pub use handles::{HandleAllocator, HandleCache, HandleError, ObjectUrlAllocator};
pub use limits::{LimitViolation, RetryPolicy, SyncLimits};
pub use loader::{LoadOutcome, MediaSnapshot, PageMediaLoader};
pub use narration::{block_number_in_name, extract_blocks, match_archive_entries};
pub use patcher::{apply_narration_assets, patch_page, PagePatch};
pub use session::{CourseSession, ImportReport, ImportedAsset, MediaSource, SyncError, TickSummary};
