//! Command-line interface for pagesync.
//!
//! Provides commands for inspecting narration blocks, importing narration
//! archives, attaching media, editing clip timing and showing the resolved
//! configuration. Every command works on a course document JSON file and a
//! project in the file asset store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::adapters::FileAssetStore;
use crate::config;
use crate::core::{CourseSession, LoadOutcome, MediaSource};
use crate::domain::{ClipField, ClipTiming, CourseDocument, MediaKind, NarrationKind, PageId};

/// pagesync - page media and narration sync for course documents
#[derive(Parser, Debug)]
#[command(name = "pagesync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List narration blocks in document order
    Blocks {
        /// Course document (JSON)
        document: PathBuf,
    },

    /// Import a zip of narration audio or captions
    Import {
        /// Course document (JSON)
        document: PathBuf,

        /// Archive with entries named by block number (e.g. 0001-Block.mp3)
        archive: PathBuf,

        /// What the archive contains
        #[arg(short, long, value_enum, default_value = "audio")]
        kind: KindArg,

        #[command(flatten)]
        target: Target,
    },

    /// Attach media to a page, replacing what it held
    Attach {
        /// Course document (JSON)
        document: PathBuf,

        /// Page id (welcome, objectives or a topic id)
        #[arg(short, long)]
        page: String,

        /// Image or video file to upload
        #[arg(short, long, conflicts_with = "url", required_unless_present = "url")]
        file: Option<PathBuf>,

        /// External video URL
        #[arg(short, long)]
        url: Option<String>,

        /// Clip start (seconds or mm:ss), external video only
        #[arg(long)]
        start: Option<String>,

        /// Clip end (seconds or mm:ss), external video only
        #[arg(long)]
        end: Option<String>,

        #[command(flatten)]
        target: Target,
    },

    /// Edit the clip window of a page's external video
    Clip {
        /// Course document (JSON)
        document: PathBuf,

        /// Page id
        #[arg(short, long)]
        page: String,

        /// New start (seconds or mm:ss, empty to clear)
        #[arg(long)]
        start: Option<String>,

        /// New end (seconds or mm:ss, empty to clear)
        #[arg(long)]
        end: Option<String>,

        #[command(flatten)]
        target: Target,
    },

    /// Show the media the store holds for a page
    Media {
        /// Course document (JSON)
        document: PathBuf,

        /// Page id
        #[arg(short, long)]
        page: String,

        /// Project id or .scormproj path
        #[arg(long, env = "PAGESYNC_PROJECT")]
        project: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Where results go
#[derive(clap::Args, Debug)]
pub struct Target {
    /// Project id or .scormproj path
    #[arg(long, env = "PAGESYNC_PROJECT")]
    pub project: String,

    /// Write the patched document here (prints to stdout if not provided)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Narration kind for CLI (maps to NarrationKind)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    /// Narration audio
    Audio,

    /// WebVTT captions
    Caption,
}

impl From<KindArg> for NarrationKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Audio => NarrationKind::Audio,
            KindArg::Caption => NarrationKind::Caption,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Blocks { document } => show_blocks(&document),
            Commands::Import {
                document,
                archive,
                kind,
                target,
            } => import_archive(&document, &archive, kind.into(), &target).await,
            Commands::Attach {
                document,
                page,
                file,
                url,
                start,
                end,
                target,
            } => attach_media(&document, &PageId::from(page), file, url, start, end, &target).await,
            Commands::Clip {
                document,
                page,
                start,
                end,
                target,
            } => edit_clip(&document, &PageId::from(page), start, end, &target).await,
            Commands::Media {
                document,
                page,
                project,
            } => show_media(&document, &PageId::from(page), &project).await,
            Commands::Config => show_config(),
        }
    }
}

/// Open a session over `document` backed by the project's file store
async fn open_session(document: &Path, project: &str) -> Result<CourseSession> {
    let cfg = config::config()?;
    let doc = CourseDocument::from_file(document)?;
    let store = FileAssetStore::open(&cfg.store, project)
        .await
        .with_context(|| format!("Failed to open asset store for project '{}'", project))?;

    Ok(CourseSession::new(doc, Arc::new(store))
        .with_limits(cfg.limits.clone())
        .with_timing(cfg.timing))
}

fn write_document(doc: &CourseDocument, output: Option<&Path>) -> Result<()> {
    let json = doc.to_json_pretty()?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write document: {}", path.display()))?;
            eprintln!("Document written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn show_blocks(document: &Path) -> Result<()> {
    let doc = CourseDocument::from_file(document)?;
    let blocks = crate::core::extract_blocks(&doc);

    if blocks.is_empty() {
        println!("No narration blocks");
        return Ok(());
    }

    println!("{:<8} {:<16} {:<30}", "BLOCK", "PAGE", "TITLE");
    println!("{}", "-".repeat(56));
    for block in blocks {
        let title = if block.page_title.len() > 28 {
            let cut: String = block.page_title.chars().take(25).collect();
            format!("{}...", cut)
        } else {
            block.page_title.clone()
        };
        println!("{:<8} {:<16} {:<30}", block.block_number, block.page_id, title);
    }
    Ok(())
}

async fn import_archive(
    document: &Path,
    archive: &Path,
    kind: NarrationKind,
    target: &Target,
) -> Result<()> {
    let bytes = tokio::fs::read(archive)
        .await
        .with_context(|| format!("Failed to read archive: {}", archive.display()))?;

    let session = open_session(document, &target.project).await?;
    session
        .restore_narration()
        .await
        .context("Failed to restore existing narration")?;
    let report = session.import_narration_archive(bytes, kind).await?;

    eprintln!("Imported {} {} file(s)", report.imported.len(), kind);
    for asset in &report.imported {
        eprintln!(
            "  {} -> {} ({}, {})",
            asset.file_name, asset.page_id, asset.block_number, asset.storage_ref
        );
    }
    for name in &report.unmatched {
        eprintln!("  skipped {}: no matching block", name);
    }
    for rejected in &report.rejected {
        eprintln!("  rejected {}: {}", rejected.name, rejected.reason);
    }
    for (name, error) in &report.failed {
        eprintln!("  failed {}: {}", name, error);
    }

    write_document(&session.document().await, target.output.as_deref())
}

fn media_kind_for(path: &Path) -> Option<(MediaKind, &'static str)> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let found = match ext.as_str() {
        "png" => (MediaKind::Image, "image/png"),
        "jpg" | "jpeg" => (MediaKind::Image, "image/jpeg"),
        "gif" => (MediaKind::Image, "image/gif"),
        "webp" => (MediaKind::Image, "image/webp"),
        "svg" => (MediaKind::Image, "image/svg+xml"),
        "mp4" => (MediaKind::Video, "video/mp4"),
        "webm" => (MediaKind::Video, "video/webm"),
        "mov" => (MediaKind::Video, "video/quicktime"),
        _ => return None,
    };
    Some(found)
}

async fn attach_media(
    document: &Path,
    page: &PageId,
    file: Option<PathBuf>,
    url: Option<String>,
    start: Option<String>,
    end: Option<String>,
    target: &Target,
) -> Result<()> {
    let source = match (file, url) {
        (Some(path), _) => {
            let (kind, mime) = media_kind_for(&path)
                .with_context(|| format!("Unsupported media file: {}", path.display()))?;
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read media file: {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            MediaSource::Upload {
                kind,
                file_name,
                mime_type: Some(mime.to_string()),
                data,
            }
        }
        (None, Some(url)) => {
            let parse = |raw: Option<String>| -> Result<Option<u32>> {
                match raw {
                    Some(text) => Ok(crate::domain::parse_clip_time(&text)?),
                    None => Ok(None),
                }
            };
            MediaSource::ExternalVideo {
                url,
                title: None,
                clip: ClipTiming {
                    start: parse(start)?,
                    end: parse(end)?,
                },
            }
        }
        (None, None) => anyhow::bail!("Either --file or --url is required"),
    };

    let session = open_session(document, &target.project).await?;
    let media = session.add_media(page, source).await?;
    eprintln!("Attached {} {} to {}", media.kind, media.id, page);

    write_document(&session.document().await, target.output.as_deref())
}

/// Order in which to commit a start/end pair.
///
/// Start goes first unless the new start would land at or past the
/// committed end, in which case the end has to move out of the way first.
fn clip_commit_order(current: ClipTiming, start: Option<&str>, end: Option<&str>) -> [ClipField; 2] {
    let new_start = start.and_then(|raw| crate::domain::parse_clip_time(raw).ok().flatten());
    match (new_start, current.end, end) {
        (Some(s), Some(e), Some(_)) if s >= e => [ClipField::End, ClipField::Start],
        _ => [ClipField::Start, ClipField::End],
    }
}

async fn edit_clip(
    document: &Path,
    page: &PageId,
    start: Option<String>,
    end: Option<String>,
    target: &Target,
) -> Result<()> {
    let session = open_session(document, &target.project).await?;
    let media = session
        .document()
        .await
        .page(page)
        .with_context(|| format!("Page not found: {}", page))?
        .media
        .iter()
        .find(|m| m.is_external_video())
        .cloned()
        .with_context(|| format!("Page {} has no external video", page))?;

    let order = clip_commit_order(media.clip(), start.as_deref(), end.as_deref());
    for field in order {
        let raw = match field {
            ClipField::Start => start.as_deref(),
            ClipField::End => end.as_deref(),
        };
        let Some(raw) = raw else { continue };
        session.clip_input(&media.id, field, raw).await;
        let clip = session.clip_blur(page, &media.id, field).await?;
        eprintln!("Clip {}: {:?}-{:?}", field, clip.start, clip.end);
    }

    let summary = session.tick().await;
    if summary.pending > 0 {
        anyhow::bail!("{} clip update(s) could not be persisted", summary.pending);
    }

    write_document(&session.document().await, target.output.as_deref())
}

async fn show_media(document: &Path, page: &PageId, project: &str) -> Result<()> {
    let session = open_session(document, project).await?;
    match session.load_page(page).await {
        LoadOutcome::Published(items) if items.is_empty() => println!("No media for {}", page),
        LoadOutcome::Published(items) => {
            println!("{:<40} {:<8} {:<14} {}", "ID", "KIND", "STORAGE", "HANDLE");
            println!("{}", "-".repeat(90));
            for item in items {
                let storage = item
                    .storage_ref
                    .as_ref()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let handle = match &item.display_handle {
                    Some(h) => h.url().unwrap_or("(failed)").to_string(),
                    None => "-".to_string(),
                };
                println!("{:<40} {:<8} {:<14} {}", item.id, item.kind, storage, handle);
            }
        }
        LoadOutcome::Failed(error) => anyhow::bail!("Failed to load media: {}", error),
        LoadOutcome::Superseded => {}
    }
    session.teardown().await;
    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("pagesync configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:  {}", cfg.home.display());
    println!("  Store: {}", cfg.store.display());
    println!();
    println!("Limits:");
    println!("  Upload timeout:   {}s", cfg.limits.upload_timeout_seconds);
    println!("  Archive timeout:  {}s", cfg.limits.archive_timeout_seconds);
    println!("  Max upload size:  {} bytes", cfg.limits.max_upload_bytes);
    println!("  Max entry size:   {} bytes", cfg.limits.max_entry_bytes);
    println!("  Audio patterns:   {}", cfg.limits.audio_patterns.join(", "));
    println!("  Caption patterns: {}", cfg.limits.caption_patterns.join(", "));
    println!();
    println!("Timing:");
    println!("  Clip grace: {}ms", cfg.timing.clip_grace_ms);
    println!("  Tick:       {}ms", cfg.timing.outbox_tick_ms);

    Ok(())
}
