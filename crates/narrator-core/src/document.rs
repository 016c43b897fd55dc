//! Chapter documents and chapter loading.
//!
//! A [`Document`] is an immutable snapshot of one chapter: its raw text and
//! everything derived from it once (word index, density factor). Chapter
//! detection happens upstream; on disk a chapter is a plain text file with an
//! optional `<file>.toml` sidecar carrying its title and page range.

use crate::density::density_factor;
use crate::position::PageRange;
use crate::text_utils::{TextIndex, index_text};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Document {
    key: String,
    title: Option<String>,
    raw_text: String,
    index: TextIndex,
    density_factor: f64,
    page_range: Option<PageRange>,
}

impl Document {
    pub fn new(key: impl Into<String>, raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let index = index_text(&raw_text);
        let density_factor = density_factor(&raw_text);
        Self {
            key: key.into(),
            title: None,
            raw_text,
            index,
            density_factor,
            page_range: None,
        }
    }

    pub fn with_page_range(mut self, page_range: Option<PageRange>) -> Self {
        self.page_range = page_range;
        self
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    /// Identity used for checkpoint storage (usually the source path).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn plain_text(&self) -> &str {
        &self.index.plain_text
    }

    pub fn index(&self) -> &TextIndex {
        &self.index
    }

    pub fn word_count(&self) -> usize {
        self.index.word_count()
    }

    pub fn density_factor(&self) -> f64 {
        self.density_factor
    }

    pub fn page_range(&self) -> Option<PageRange> {
        self.page_range
    }

    /// Nothing to speak.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new("", "")
    }
}

#[derive(Debug, Default, Deserialize)]
struct ChapterMeta {
    title: Option<String>,
    start_page: Option<u32>,
    end_page: Option<u32>,
}

/// Sidecar metadata path: `chapter.txt` -> `chapter.txt.toml`.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".toml");
    PathBuf::from(name)
}

/// Load a chapter text file and its optional sidecar metadata.
pub fn load_chapter(path: &Path) -> Result<Document> {
    info!(path = %path.display(), "Loading chapter text");
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let meta = load_meta(&sidecar_path(path));
    let page_range = page_range_from_meta(&meta);

    let document = Document::new(path.to_string_lossy(), text)
        .with_page_range(page_range)
        .with_title(meta.title);
    info!(
        words = document.word_count(),
        density = document.density_factor(),
        pages = ?document.page_range(),
        "Finished loading chapter"
    );
    Ok(document)
}

fn load_meta(path: &Path) -> ChapterMeta {
    let Ok(data) = fs::read_to_string(path) else {
        debug!(path = %path.display(), "No chapter sidecar");
        return ChapterMeta::default();
    };
    match toml::from_str::<ChapterMeta>(&data) {
        Ok(meta) => meta,
        Err(err) => {
            warn!(path = %path.display(), "Ignoring invalid chapter sidecar: {err}");
            ChapterMeta::default()
        }
    }
}

fn page_range_from_meta(meta: &ChapterMeta) -> Option<PageRange> {
    let (start, end) = (meta.start_page?, meta.end_page?);
    let range = PageRange::new(start, end);
    if range.is_none() {
        warn!(start, end, "Dropping chapter page range with end before start");
    }
    range
}
