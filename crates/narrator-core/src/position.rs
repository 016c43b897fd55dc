//! Position mapping: char positions to words, and words to pages.
//!
//! The page mapping is an estimate. Chapters do not carry per-word page
//! provenance, so the word position is interpolated across the chapter's page
//! range along a curve shaped by the density factor.

use crate::density::{MAX_DENSITY_FACTOR, MIN_DENSITY_FACTOR};

/// Inclusive page range of a chapter. Always `start_page <= end_page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    start_page: u32,
    end_page: u32,
}

impl PageRange {
    /// Returns `None` when `end_page < start_page`.
    pub fn new(start_page: u32, end_page: u32) -> Option<Self> {
        (end_page >= start_page).then_some(Self {
            start_page,
            end_page,
        })
    }

    pub fn start_page(&self) -> u32 {
        self.start_page
    }

    pub fn end_page(&self) -> u32 {
        self.end_page
    }

    /// Number of pages; `u64` so a full `0..=u32::MAX` range fits.
    pub fn page_count(&self) -> u64 {
        u64::from(self.end_page - self.start_page) + 1
    }

    pub fn clamp(&self, page: u32) -> u32 {
        page.clamp(self.start_page, self.end_page)
    }

    pub fn contains(&self, page: u32) -> bool {
        (self.start_page..=self.end_page).contains(&page)
    }
}

/// Index of the last word whose offset is `<= char_idx`; `0` when there is
/// none.
pub fn word_index_for_char(offsets: &[usize], char_idx: usize) -> usize {
    offsets
        .partition_point(|offset| *offset <= char_idx)
        .saturating_sub(1)
}

fn sanitize_density(density_factor: f64) -> f64 {
    if density_factor.is_finite() {
        density_factor.clamp(MIN_DENSITY_FACTOR, MAX_DENSITY_FACTOR)
    } else {
        1.0
    }
}

/// Estimate the page on which `word_idx` is printed.
pub fn estimate_page(
    word_idx: usize,
    word_count: usize,
    range: PageRange,
    density_factor: f64,
) -> u32 {
    if word_count == 0 {
        return range.start_page;
    }
    let position = (word_idx as f64 / word_count as f64).clamp(0.0, 1.0);
    let exponent = 0.5 * sanitize_density(density_factor);
    let curved = position.powf(exponent);
    let page = (range.start_page as f64 + curved * range.page_count() as f64).floor();
    range.clamp(page.min(u32::MAX as f64) as u32)
}

/// Estimate the first word printed on `page`; the inverse of
/// [`estimate_page`] up to floor rounding.
pub fn estimate_word_index(
    page: u32,
    range: PageRange,
    word_count: usize,
    density_factor: f64,
) -> usize {
    if word_count == 0 {
        return 0;
    }
    let relative = (page as f64 - range.start_page as f64) / range.page_count() as f64;
    let relative = relative.clamp(0.0, 1.0);
    let inverse_exponent = 2.0 / sanitize_density(density_factor);
    let word = (relative.powf(inverse_exponent) * word_count as f64).floor();
    (word.max(0.0) as usize).min(word_count - 1)
}
