//! Narration block extraction and archive matching.
//!
//! Block numbers depend only on document structure: welcome, objectives,
//! then topics in array order, counting only pages that carry narration.
//! Archive entries are joined back to blocks by the 4-digit run in their
//! file name, so upload order never matters.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::domain::{BlockNumber, CourseDocument, NarrationBlock};

use super::archive::ArchiveEntry;

/// Walk the document in fixed order and number every narrated page
pub fn extract_blocks(document: &CourseDocument) -> Vec<NarrationBlock> {
    let mut blocks = Vec::new();
    let mut next: u16 = 1;

    for (_, page) in document.pages() {
        if !page.has_narration() {
            continue;
        }
        let Some(block_number) = BlockNumber::new(next) else {
            warn!(page = %page.id, "Ran out of block numbers, remaining pages unnumbered");
            break;
        };
        blocks.push(NarrationBlock {
            id: format!("block-{}", block_number),
            page_id: page.id.clone(),
            page_title: page.title.clone(),
            block_number,
            text: page.narration.clone(),
        });
        next += 1;
    }

    debug!(count = blocks.len(), "Extracted narration blocks");
    blocks
}

fn block_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^0-9])([0-9]{4})(?:[^0-9]|$)").expect("valid block regex"))
}

/// Block number embedded in an entry name: the first run of exactly four
/// digits in the file's base name
pub fn block_number_in_name(name: &str) -> Option<BlockNumber> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    block_run_regex()
        .captures_iter(base)
        .filter_map(|c| c.get(1))
        .find_map(|m| BlockNumber::parse(m.as_str()))
}

/// Associate archive entries with blocks by block number.
///
/// Entries without a block number, or whose number has no block, are
/// ignored. When two entries carry the same number the first one wins.
pub fn match_archive_entries<'a>(
    entries: &'a [ArchiveEntry],
    blocks: &[NarrationBlock],
) -> BTreeMap<BlockNumber, &'a ArchiveEntry> {
    let mut matched: BTreeMap<BlockNumber, &'a ArchiveEntry> = BTreeMap::new();

    for entry in entries {
        let Some(number) = block_number_in_name(&entry.name) else {
            debug!(entry = %entry.name, "No block number in entry name, skipping");
            continue;
        };
        if !blocks.iter().any(|b| b.block_number == number) {
            debug!(entry = %entry.name, block = %number, "No narration block with this number");
            continue;
        }
        if let Some(first) = matched.get(&number) {
            warn!(
                entry = %entry.name,
                kept = %first.name,
                block = %number,
                "Duplicate block number in archive, keeping first entry"
            );
            continue;
        }
        matched.insert(number, entry);
    }

    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Page, PageId};

    fn entry(name: &str) -> ArchiveEntry {
        ArchiveEntry {
            name: name.to_string(),
            data: name.as_bytes().to_vec(),
        }
    }

    fn narrated_document(topics: usize) -> CourseDocument {
        let mut doc = CourseDocument::new("Course")
            .with_welcome(Page::new(PageId::welcome(), "Welcome").with_narration("Hello"))
            .with_objectives(
                Page::new(PageId::objectives(), "Objectives").with_narration("You will learn"),
            );
        for i in 1..=topics {
            doc = doc.with_topic(
                Page::new(format!("topic-{}", i), format!("Topic {}", i))
                    .with_narration(format!("Narration {}", i)),
            );
        }
        doc
    }

    #[test]
    fn test_blocks_follow_document_order() {
        let blocks = extract_blocks(&narrated_document(2));
        let summary: Vec<(String, String)> = blocks
            .iter()
            .map(|b| (b.block_number.to_string(), b.page_id.to_string()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("0001".into(), "welcome".into()),
                ("0002".into(), "objectives".into()),
                ("0003".into(), "topic-1".into()),
                ("0004".into(), "topic-2".into()),
            ]
        );
        assert_eq!(blocks[0].id, "block-0001");
    }

    #[test]
    fn test_pages_without_narration_are_skipped() {
        let doc = CourseDocument::new("Course")
            .with_welcome(Page::new(PageId::welcome(), "Welcome").with_narration("   "))
            .with_topic(Page::new("topic-1", "One").with_narration("Text"));
        let blocks = extract_blocks(&doc);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].page_id, PageId::from("topic-1"));
        assert_eq!(blocks[0].block_number.to_string(), "0001");
    }

    #[test]
    fn test_extract_is_idempotent() {
        let doc = narrated_document(5);
        assert_eq!(extract_blocks(&doc), extract_blocks(&doc));
    }

    #[test]
    fn test_block_number_in_name() {
        let n = |s: &str| block_number_in_name(s).map(|b| b.to_string());
        assert_eq!(n("0001-Block.mp3").as_deref(), Some("0001"));
        assert_eq!(n("narration_0012.m4a").as_deref(), Some("0012"));
        assert_eq!(n("audio/0003 intro.mp3").as_deref(), Some("0003"));
        assert_eq!(n("2024/0005-Block.mp3").as_deref(), Some("0005"));
        assert_eq!(n("12345.mp3"), None);
        assert_eq!(n("0000-empty.mp3"), None);
        assert_eq!(n("intro.mp3"), None);
    }

    #[test]
    fn test_match_leaves_unmatched_blocks_empty() {
        let blocks = extract_blocks(&narrated_document(1));
        assert_eq!(blocks.len(), 3);

        let entries = vec![entry("0001-x.mp3"), entry("0002-y.mp3")];
        let matched = match_archive_entries(&entries, &blocks);

        assert_eq!(matched.len(), 2);
        assert!(!matched.contains_key(&BlockNumber::new(3).unwrap()));
    }

    #[test]
    fn test_match_ignores_unknown_and_unnumbered_entries() {
        let blocks = extract_blocks(&narrated_document(1));
        let entries = vec![entry("readme.txt"), entry("0042-orphan.mp3"), entry("0001-a.mp3")];
        let matched = match_archive_entries(&entries, &blocks);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[&BlockNumber::new(1).unwrap()].name, "0001-a.mp3");
    }

    #[test]
    fn test_duplicate_block_keeps_first() {
        let blocks = extract_blocks(&narrated_document(0));
        let entries = vec![entry("0001-first.mp3"), entry("take2_0001.mp3")];
        let matched = match_archive_entries(&entries, &blocks);
        assert_eq!(matched[&BlockNumber::new(1).unwrap()].name, "0001-first.mp3");
    }

    #[test]
    fn test_twenty_topics_match_in_any_upload_order() {
        let blocks = extract_blocks(&narrated_document(20));
        assert_eq!(blocks.len(), 22);

        let mut entries: Vec<ArchiveEntry> =
            (1..=22).map(|n| entry(&format!("{:04}-Block.mp3", n))).collect();
        entries.reverse();

        let matched = match_archive_entries(&entries, &blocks);
        assert_eq!(matched.len(), 22);
        for block in &blocks {
            let name = &matched[&block.block_number].name;
            assert_eq!(name, &format!("{}-Block.mp3", block.block_number));
        }
        assert_eq!(blocks[21].page_id, PageId::from("topic-20"));
    }
}
