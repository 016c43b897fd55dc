//! Word-to-page synchronisation with debouncing.
//!
//! Progress events arrive every few hundred milliseconds and each one yields
//! a fresh page estimate. Committing those estimates directly makes the page
//! view flicker, so a page change is only committed after a delay that grows
//! with the size of the jump. A newer estimate replaces the pending one.
//!
//! Page changes committed from here come back from the page view as
//! "page changed" notifications; those echoes are recognised and not treated
//! as user navigation.

use crate::position::{PageRange, estimate_page, estimate_word_index};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSyncConfig {
    pub delay_per_page: Duration,
    pub max_delay: Duration,
}

impl Default for PageSyncConfig {
    fn default() -> Self {
        Self {
            delay_per_page: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPage {
    pub page: u32,
    pub due: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageChangeOrigin {
    /// Echo of a page this module asked the view to show.
    SelfInitiated,
    External,
}

#[derive(Debug, Clone)]
pub struct PageSync {
    range: Option<PageRange>,
    density_factor: f64,
    config: PageSyncConfig,
    current_page: Option<u32>,
    pending: Option<PendingPage>,
    awaiting_echo: Option<u32>,
}

impl PageSync {
    pub fn new(range: Option<PageRange>, density_factor: f64, config: PageSyncConfig) -> Self {
        Self {
            range,
            density_factor,
            config,
            current_page: range.map(|range| range.start_page()),
            pending: None,
            awaiting_echo: None,
        }
    }

    pub fn range(&self) -> Option<PageRange> {
        self.range
    }

    pub fn current_page(&self) -> Option<u32> {
        self.current_page
    }

    pub fn pending(&self) -> Option<PendingPage> {
        self.pending
    }

    /// Debounce delay for moving from `from` to `to`.
    pub fn delay_for_jump(&self, from: u32, to: u32) -> Duration {
        let pages = from.abs_diff(to);
        self.config
            .delay_per_page
            .saturating_mul(pages)
            .min(self.config.max_delay)
    }

    /// Schedule a page commit for the page that `word_idx` falls on.
    pub fn on_word_index(&mut self, word_idx: usize, word_count: usize, now: Instant) {
        let (Some(range), Some(current)) = (self.range, self.current_page) else {
            return;
        };
        let target = estimate_page(word_idx, word_count, range, self.density_factor);
        if target == current {
            self.pending = None;
            return;
        }
        if self.pending.is_some_and(|pending| pending.page == target) {
            // Keep the running timer; restarting it on every progress event
            // would postpone large jumps indefinitely.
            return;
        }
        let due = now + self.delay_for_jump(current, target);
        debug!(from = current, to = target, "Scheduling page sync");
        self.pending = Some(PendingPage { page: target, due });
    }

    /// Commit the pending page once its delay has elapsed. Returns the page
    /// the view should navigate to.
    pub fn poll(&mut self, now: Instant) -> Option<u32> {
        let pending = self.pending?;
        if pending.due > now {
            return None;
        }
        self.pending = None;
        self.current_page = Some(pending.page);
        self.awaiting_echo = Some(pending.page);
        debug!(page = pending.page, "Committing page sync");
        Some(pending.page)
    }

    /// Explicit navigation request; returns the clamped page to show.
    pub fn go_to_page(&mut self, page: u32) -> Option<u32> {
        let range = self.range?;
        let page = range.clamp(page);
        self.pending = None;
        self.current_page = Some(page);
        self.awaiting_echo = Some(page);
        Some(page)
    }

    /// Record a page-changed notification from the view.
    pub fn on_page_changed(&mut self, page: u32) -> PageChangeOrigin {
        let page = match self.range {
            Some(range) => range.clamp(page),
            None => page,
        };
        if self.awaiting_echo == Some(page) {
            self.awaiting_echo = None;
            self.current_page = Some(page);
            return PageChangeOrigin::SelfInitiated;
        }
        self.awaiting_echo = None;
        self.pending = None;
        self.current_page = Some(page);
        PageChangeOrigin::External
    }

    /// Estimated first word of `page`.
    pub fn word_index_for_page(&self, page: u32, word_count: usize) -> Option<usize> {
        let range = self.range?;
        if word_count == 0 {
            return None;
        }
        Some(estimate_word_index(
            page,
            range,
            word_count,
            self.density_factor,
        ))
    }

    pub fn cancel_pending(&mut self) {
        self.pending = None;
    }
}
