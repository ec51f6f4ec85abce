//! Domain types for the page sync engine.
//!
//! This module contains the core data structures:
//! - Document: the course tree of pages
//! - Media: visual attachments and clip timing
//! - Narration: block numbers and audio/caption assets

pub mod document;
pub mod media;
pub mod narration;

// Re-export commonly used types
pub use document::{CourseDocument, Page, PageId, PageSlot};
pub use media::{
    build_embed_url, canonical_youtube_url, clip_from_embed_url, format_clip_time,
    parse_clip_time, youtube_video_id, AssetRef, ClipField, ClipTimeError, ClipTiming,
    DisplayHandle, MediaAttachment, MediaKind,
};
pub use narration::{
    AudioAsset, BlockNumber, CaptionAsset, NarrationAsset, NarrationAssets, NarrationBlock,
    NarrationKind,
};
