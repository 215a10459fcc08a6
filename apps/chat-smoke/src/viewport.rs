//! Scroll surface abstraction driven by the view bridge.

use chat_core::ScrollMetrics;

/// Scrollable message list owned by the UI layer.
pub trait ScrollSurface: Send {
    fn metrics(&self) -> ScrollMetrics;

    /// Re-render the list with `rows` message rows.
    fn render(&mut self, rows: usize);

    fn set_scroll_top(&mut self, scroll_top: f64);

    fn scroll_to_bottom(&mut self);
}

/// Headless viewport where every row has the same height.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedRowViewport {
    row_height: f64,
    viewport_height: f64,
    rows: usize,
    scroll_top: f64,
}

impl FixedRowViewport {
    pub fn new(row_height: f64, viewport_height: f64) -> Self {
        Self {
            row_height: row_height.max(1.0),
            viewport_height: viewport_height.max(0.0),
            rows: 0,
            scroll_top: 0.0,
        }
    }

    fn content_height(&self) -> f64 {
        self.rows as f64 * self.row_height
    }

    fn max_scroll_top(&self) -> f64 {
        (self.content_height() - self.viewport_height).max(0.0)
    }
}

impl ScrollSurface for FixedRowViewport {
    fn metrics(&self) -> ScrollMetrics {
        ScrollMetrics {
            scroll_top: self.scroll_top,
            scroll_height: self.content_height(),
        }
    }

    fn render(&mut self, rows: usize) {
        self.rows = rows;
        self.scroll_top = self.scroll_top.min(self.max_scroll_top());
    }

    fn set_scroll_top(&mut self, scroll_top: f64) {
        self.scroll_top = scroll_top.clamp(0.0, self.max_scroll_top());
    }

    fn scroll_to_bottom(&mut self) {
        self.scroll_top = self.max_scroll_top();
    }
}
