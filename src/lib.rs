//! pagesync - page media and narration sync for course documents
//!
//! Keeps an authoring tool's view of "which media and narration belong to
//! which page" consistent with an asynchronous asset store, a cache of
//! ephemeral display handles, and a course document that is patched one
//! page at a time.
//!
//! # Architecture
//!
//! - Page loads are guarded by sequence tokens; a superseded load never
//!   publishes
//! - Display handles are allocated once per asset and only revoked on
//!   session teardown
//! - Clip-timing edits are buffered per field and persisted through an outbox
//! - Narration files are matched to pages by 4-digit block numbers derived
//!   from document order
//! - Document patches replace one page and share every other page
//!
//! # Modules
//!
//! - `adapters`: Asset store contract and implementations (memory, files)
//! - `core`: Sync engine (loader, handles, clip editor, narration, patcher, session)
//! - `domain`: Data structures (CourseDocument, MediaAttachment, NarrationBlock)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # List narration blocks
//! pagesync blocks course.json
//!
//! # Import narration audio for a project
//! pagesync import course.json narration.zip --kind audio --project Course_1234.scormproj -o course.json
//!
//! # Attach a clipped external video
//! pagesync attach course.json --page topic-1 --url https://youtu.be/abc123 --start 0:45 --end 3:00 --project 1234
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{AssetStore, FileAssetStore, MemoryAssetStore, StoreError};
pub use core::{CourseSession, HandleCache, PageMediaLoader, SyncError};
pub use domain::{CourseDocument, MediaAttachment, NarrationBlock, PageId};
