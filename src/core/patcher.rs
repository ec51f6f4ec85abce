//! Page-scoped document patching.
//!
//! A patch never mutates its input. The returned document shares every
//! untouched page with the input (`Arc::ptr_eq` holds), and only the
//! target page is rebuilt. Editing several pages in a row therefore can't
//! lose an earlier page's changes.

use std::sync::Arc;

use tracing::debug;

use crate::domain::{
    AssetRef, BlockNumber, CourseDocument, MediaAttachment, NarrationAssets, NarrationBlock,
    NarrationKind, Page, PageId, PageSlot,
};

/// Replacement for one page's media or narration slice
#[derive(Debug, Clone, PartialEq)]
pub enum PagePatch {
    /// Replace the page's media with at most one attachment
    Media(Option<MediaAttachment>),

    /// Replace the attachment with the same id, keeping its position
    UpdateMedia(MediaAttachment),

    /// Remove the attachment with this id
    RemoveMedia(String),

    /// Replace the page's narration asset references
    Narration {
        audio_ref: Option<AssetRef>,
        caption_ref: Option<AssetRef>,
        block_number: Option<BlockNumber>,
    },

    /// Drop media and narration references
    Reset,
}

impl PagePatch {
    fn apply(self, page: &mut Page) {
        match self {
            PagePatch::Media(media) => {
                page.media = media.into_iter().collect();
            }
            PagePatch::UpdateMedia(media) => {
                if let Some(existing) = page.media.iter_mut().find(|m| m.id == media.id) {
                    *existing = media;
                }
            }
            PagePatch::RemoveMedia(media_id) => {
                page.media.retain(|m| m.id != media_id);
            }
            PagePatch::Narration {
                audio_ref,
                caption_ref,
                block_number,
            } => {
                page.audio_ref = audio_ref;
                page.caption_ref = caption_ref;
                page.block_number = block_number;
            }
            PagePatch::Reset => {
                page.media.clear();
                page.audio_ref = None;
                page.caption_ref = None;
                page.block_number = None;
            }
        }
    }
}

fn slot_mut(document: &mut CourseDocument, slot: PageSlot) -> Option<&mut Arc<Page>> {
    match slot {
        PageSlot::Welcome => Some(&mut document.welcome_page),
        PageSlot::Objectives => Some(&mut document.objectives_page),
        PageSlot::Topic(i) => document.topics.get_mut(i),
    }
}

/// Return a copy of `document` with `page_id`'s slice replaced.
///
/// An unknown page is a no-op: the result equals the input.
pub fn patch_page(document: &CourseDocument, page_id: &PageId, patch: PagePatch) -> CourseDocument {
    let mut next = document.clone();
    let Some(slot) = document.locate(page_id) else {
        debug!(page = %page_id, "Patch target not found, leaving document unchanged");
        return next;
    };

    if let Some(page) = slot_mut(&mut next, slot) {
        let mut updated = Page::clone(page);
        patch.apply(&mut updated);
        *page = Arc::new(updated);
    }
    next
}

/// Write stored narration references onto every narrated page.
///
/// Pages whose references are already current keep their identity.
pub fn apply_narration_assets(
    document: &CourseDocument,
    blocks: &[NarrationBlock],
    assets: &NarrationAssets,
) -> CourseDocument {
    let mut next = document.clone();

    for block in blocks {
        let audio_ref = assets
            .get(NarrationKind::Audio, block.block_number)
            .and_then(|a| a.storage_ref.clone());
        let caption_ref = assets
            .get(NarrationKind::Caption, block.block_number)
            .and_then(|a| a.storage_ref.clone());
        let block_number = (audio_ref.is_some() || caption_ref.is_some()).then_some(block.block_number);

        let Some(page) = next.page(&block.page_id) else {
            continue;
        };
        if page.audio_ref == audio_ref
            && page.caption_ref == caption_ref
            && page.block_number == block_number
        {
            continue;
        }

        next = patch_page(
            &next,
            &block.page_id,
            PagePatch::Narration {
                audio_ref,
                caption_ref,
                block_number,
            },
        );
    }

    next
}
