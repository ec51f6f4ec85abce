//! Narration units and their audio/caption assets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::document::PageId;
use super::media::AssetRef;

/// Four-digit narration block number (`0001`, `0002`, ...)
///
/// Join key between narration units and externally prepared audio and
/// caption files, so it always renders zero-padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockNumber(u16);

impl BlockNumber {
    pub const MAX: u16 = 9999;

    /// `None` for zero or anything above four digits
    pub fn new(n: u16) -> Option<Self> {
        (1..=Self::MAX).contains(&n).then_some(Self(n))
    }

    pub fn get(&self) -> u16 {
        self.0
    }

    /// Parse exactly four ASCII digits
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 4 || !s.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        s.parse::<u16>().ok().and_then(Self::new)
    }
}

impl std::fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

impl Serialize for BlockNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlockNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockNumber::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid block number: {}", s)))
    }
}

/// One unit of spoken narration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrationBlock {
    pub id: String,
    pub page_id: PageId,
    pub page_title: String,
    pub block_number: BlockNumber,
    pub text: String,
}

/// Audio or caption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationKind {
    Audio,
    Caption,
}

impl NarrationKind {
    /// Prefix of positional storage ids (`audio-2`, `caption-2`)
    pub fn storage_prefix(&self) -> &'static str {
        match self {
            NarrationKind::Audio => "audio",
            NarrationKind::Caption => "caption",
        }
    }
}

impl std::fmt::Display for NarrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_prefix())
    }
}

impl std::str::FromStr for NarrationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "audio" => Ok(NarrationKind::Audio),
            "caption" | "captions" | "subtitles" => Ok(NarrationKind::Caption),
            _ => anyhow::bail!("Unknown narration kind: {}", s),
        }
    }
}

/// An audio or caption payload bound to a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationAsset {
    pub block_number: BlockNumber,
    pub kind: NarrationKind,
    pub file_name: String,
    pub payload: Vec<u8>,
    pub storage_ref: Option<AssetRef>,
}

pub type AudioAsset = NarrationAsset;
pub type CaptionAsset = NarrationAsset;

/// Narration assets of one session, keyed by block number per kind
#[derive(Debug, Clone, Default)]
pub struct NarrationAssets {
    audio: BTreeMap<BlockNumber, NarrationAsset>,
    captions: BTreeMap<BlockNumber, NarrationAsset>,
}

impl NarrationAssets {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: NarrationKind) -> &BTreeMap<BlockNumber, NarrationAsset> {
        match kind {
            NarrationKind::Audio => &self.audio,
            NarrationKind::Caption => &self.captions,
        }
    }

    fn map_mut(&mut self, kind: NarrationKind) -> &mut BTreeMap<BlockNumber, NarrationAsset> {
        match kind {
            NarrationKind::Audio => &mut self.audio,
            NarrationKind::Caption => &mut self.captions,
        }
    }

    /// Insert an asset, returning the one it superseded
    pub fn insert(&mut self, asset: NarrationAsset) -> Option<NarrationAsset> {
        let kind = asset.kind;
        self.map_mut(kind).insert(asset.block_number, asset)
    }

    pub fn get(&self, kind: NarrationKind, block: BlockNumber) -> Option<&NarrationAsset> {
        self.map(kind).get(&block)
    }

    pub fn remove(&mut self, kind: NarrationKind, block: BlockNumber) -> Option<NarrationAsset> {
        self.map_mut(kind).remove(&block)
    }

    pub fn iter(&self, kind: NarrationKind) -> impl Iterator<Item = &NarrationAsset> {
        self.map(kind).values()
    }

    pub fn len(&self, kind: NarrationKind) -> usize {
        self.map(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_empty() && self.captions.is_empty()
    }

    pub fn clear(&mut self) {
        self.audio.clear();
        self.captions.clear();
    }
}
