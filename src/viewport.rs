//! Visible-index tracking for the scrolling filmstrip.
//!
//! Scroll and resize events arrive far faster than the engine needs priority
//! hints. The tracker coalesces them: the first event after a quiet period arms
//! a deadline one interval away, later events only replace the pending
//! geometry, and a single window is produced when the deadline passes.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::trace;

/// Default debounce interval for visible window recomputation.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Scroll position and container geometry along the scroll axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportGeometry {
    /// Distance scrolled from the start of the content, in pixels.
    pub scroll_offset: f64,
    /// Visible extent of the container along the scroll axis.
    pub viewport_extent: f64,
    /// Extent of one line of items (row height or column width), including spacing.
    pub item_extent: f64,
    /// Items per line; 1 for a single-row filmstrip.
    pub items_per_line: usize,
    /// Total number of rendered items.
    pub item_count: usize,
}

impl ViewportGeometry {
    /// A horizontal filmstrip with one item per column.
    pub fn strip(scroll_offset: f64, viewport_extent: f64, item_extent: f64, item_count: usize) -> Self {
        Self {
            scroll_offset,
            viewport_extent,
            item_extent,
            items_per_line: 1,
            item_count,
        }
    }

    fn is_degenerate(&self) -> bool {
        self.item_count == 0
            || self.items_per_line == 0
            || !self.scroll_offset.is_finite()
            || !self.viewport_extent.is_finite()
            || !self.item_extent.is_finite()
            || self.viewport_extent <= 0.0
            || self.item_extent <= 0.0
    }

    /// Indices of every item that intersects the viewport.
    pub fn visible_window(&self) -> VisibleWindow {
        if self.is_degenerate() {
            return VisibleWindow::empty();
        }

        let offset = self.scroll_offset.max(0.0);
        let line_count = self.item_count.div_ceil(self.items_per_line);
        let first_line = (offset / self.item_extent).floor() as usize;
        if first_line >= line_count {
            return VisibleWindow::empty();
        }
        let end = offset + self.viewport_extent;
        let last_line = ((end / self.item_extent).ceil() as usize)
            .saturating_sub(1)
            .min(line_count - 1);

        let start = first_line * self.items_per_line;
        let stop = ((last_line + 1) * self.items_per_line).min(self.item_count);
        VisibleWindow::from_indices(start..stop)
    }
}

/// Set of currently visible item indices. Empty means "no hint".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibleWindow(BTreeSet<usize>);

impl VisibleWindow {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        Self(indices.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Indices in ascending order.
    pub fn to_vec(&self) -> Vec<usize> {
        self.0.iter().copied().collect()
    }
}

/// Debounced translation of viewport events into visible windows.
#[derive(Debug)]
pub struct ViewportTracker {
    interval: Duration,
    pending: Option<ViewportGeometry>,
    deadline: Option<Instant>,
    last: VisibleWindow,
}

impl ViewportTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            deadline: None,
            last: VisibleWindow::empty(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record a scroll or resize event.
    pub fn observe(&mut self, geometry: ViewportGeometry, now: Instant) {
        self.pending = Some(geometry);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
    }

    /// When the pending recomputation becomes due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Emit the recomputed window once the deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<VisibleWindow> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.deadline = None;
        let geometry = self.pending.take()?;
        let window = geometry.visible_window();
        trace!(visible = window.len(), "Visible window recomputed");
        self.last = window.clone();
        Some(window)
    }

    /// The most recently emitted window.
    pub fn current(&self) -> &VisibleWindow {
        &self.last
    }

    /// Forget pending events and the last window, e.g. when the folder changes.
    pub fn reset(&mut self) {
        self.pending = None;
        self.deadline = None;
        self.last = VisibleWindow::empty();
    }
}

impl Default for ViewportTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
