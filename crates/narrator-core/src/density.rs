//! Content-density heuristic for page estimation.
//!
//! Paragraph-heavy chapters advance through pages roughly linearly with the
//! spoken words, while heading-heavy ones (front matter, outlines) do not.
//! The factor computed here bends the page interpolation curve accordingly.

pub const MIN_DENSITY_FACTOR: f64 = 0.5;
pub const MAX_DENSITY_FACTOR: f64 = 1.5;
pub const NEUTRAL_DENSITY_FACTOR: f64 = 1.0;

const BLANK_LINE_WEIGHT: f64 = 0.5;
const HEADING_LINE_WEIGHT: f64 = 0.3;

/// Line statistics of raw document text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStats {
    pub total: usize,
    pub blank: usize,
    pub headings: usize,
}

pub fn line_stats(text: &str) -> LineStats {
    let mut stats = LineStats::default();
    for line in text.split('\n') {
        stats.total += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            stats.blank += 1;
        } else if trimmed.starts_with('#') {
            stats.headings += 1;
        }
    }
    stats
}

/// Density factor of raw document text, always within
/// `[MIN_DENSITY_FACTOR, MAX_DENSITY_FACTOR]`.
pub fn density_factor(text: &str) -> f64 {
    if text.trim().is_empty() {
        return NEUTRAL_DENSITY_FACTOR;
    }
    let stats = line_stats(text);
    let total = stats.total as f64;
    let factor = NEUTRAL_DENSITY_FACTOR + (stats.blank as f64 / total) * BLANK_LINE_WEIGHT
        - (stats.headings as f64 / total) * HEADING_LINE_WEIGHT;
    factor.clamp(MIN_DENSITY_FACTOR, MAX_DENSITY_FACTOR)
}
