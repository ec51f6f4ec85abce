//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use pagesync::domain::{CourseDocument, Page, PageId};
use zip::write::FileOptions;
use zip::ZipWriter;

/// Welcome + objectives + `topics` topics (`topic-1`..), all narrated
pub fn narrated_document(topics: usize) -> CourseDocument {
    let mut doc = CourseDocument::new("Workplace Safety")
        .with_welcome(Page::new(PageId::welcome(), "Welcome").with_narration("Welcome aboard"))
        .with_objectives(
            Page::new(PageId::objectives(), "Learning Objectives")
                .with_narration("By the end you will know"),
        );
    for i in 1..=topics {
        doc = doc.with_topic(
            Page::new(format!("topic-{}", i), format!("Topic {}", i))
                .with_narration(format!("Narration for topic {}", i)),
        );
    }
    doc
}

/// Build a zip archive in memory
pub fn build_zip(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut zip = ZipWriter::new(Cursor::new(&mut buffer));
        let options = FileOptions::default();
        for (name, data) in entries {
            zip.start_file(name.as_str(), options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }
    buffer
}

/// `0001-Block.mp3` .. `{count:04}-Block.mp3`
pub fn audio_archive(count: u16) -> Vec<u8> {
    let entries: Vec<(String, Vec<u8>)> = (1..=count)
        .map(|n| (format!("{:04}-Block.mp3", n), format!("audio {}", n).into_bytes()))
        .collect();
    build_zip(&entries)
}
