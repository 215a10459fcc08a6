use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::types::Message;

/// Number of most recent messages shown before any backward reveal.
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Artificial delay applied before older history is revealed.
pub const DEFAULT_LOAD_OLDER_DELAY: Duration = Duration::from_millis(500);

/// How a length-changing snapshot treats a window the user already grew.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// Always snap back to the most recent page and scroll to bottom.
    Reset,
    /// Keep already revealed history visible; only scroll on new messages.
    #[default]
    Merge,
}

/// Window tuning shared by the view state and the bridge driving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub page_size: usize,
    pub load_older_delay: Duration,
    pub snapshot_policy: SnapshotPolicy,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            load_older_delay: DEFAULT_LOAD_OLDER_DELAY,
            snapshot_policy: SnapshotPolicy::default(),
        }
    }
}

/// Scroll container geometry reported by the UI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
}

impl ScrollMetrics {
    pub fn is_at_top(&self) -> bool {
        self.scroll_top <= 0.0
    }
}

/// Scroll position captured right before older messages are prepended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    scroll_top: f64,
    scroll_height: f64,
}

impl ScrollAnchor {
    /// Scroll offset that keeps the previously topmost item in place once the
    /// content has grown to `new_scroll_height`.
    pub fn restored_scroll_top(&self, new_scroll_height: f64) -> f64 {
        (self.scroll_top + (new_scroll_height - self.scroll_height)).max(0.0)
    }
}

/// What the UI should do after a snapshot was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotEffect {
    /// Content refreshed in place; keep the scroll position.
    Refreshed,
    /// Scroll to bottom once the UI reflects the new list.
    ScrollToBottom,
}

/// Full mirror of a conversation's message array plus its visible suffix.
///
/// `visible()` is always `full[visible_start..]`.
#[derive(Debug, Clone)]
pub struct MessageWindow {
    config: WindowConfig,
    full: Vec<Message>,
    visible_start: usize,
    revealed_all: bool,
    is_loading_more: bool,
}

impl MessageWindow {
    /// Create an empty window (`page_size >= 1`).
    pub fn new(mut config: WindowConfig) -> Self {
        config.page_size = config.page_size.max(1);
        Self {
            config,
            full: Vec::new(),
            visible_start: 0,
            revealed_all: false,
            is_loading_more: false,
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Every message delivered by the last snapshot, in array order.
    pub fn full(&self) -> &[Message] {
        &self.full
    }

    /// Messages currently inside the window, in array order.
    pub fn visible(&self) -> &[Message] {
        &self.full[self.visible_start..]
    }

    pub fn is_loading_more(&self) -> bool {
        self.is_loading_more
    }

    /// Number of older messages hidden above the window.
    pub fn hidden_count(&self) -> usize {
        self.visible_start
    }

    /// Replace the full mirror with a new snapshot.
    pub fn on_snapshot(&mut self, messages: Vec<Message>) -> SnapshotEffect {
        let previous_len = self.full.len();
        self.full = messages;
        let length_changed = self.full.len() != previous_len;

        trace!(
            previous_len,
            new_len = self.full.len(),
            policy = ?self.config.snapshot_policy,
            "applying message snapshot"
        );

        match self.config.snapshot_policy {
            SnapshotPolicy::Reset => {
                if length_changed {
                    self.revealed_all = false;
                    self.visible_start = self.latest_page_start();
                } else {
                    self.clamp_start();
                }
                SnapshotEffect::ScrollToBottom
            }
            SnapshotPolicy::Merge => {
                self.visible_start = if self.revealed_all {
                    0
                } else if length_changed {
                    self.latest_page_start()
                } else {
                    self.visible_start.min(self.latest_page_start())
                };

                if self.full.len() > previous_len || previous_len == 0 {
                    SnapshotEffect::ScrollToBottom
                } else {
                    SnapshotEffect::Refreshed
                }
            }
        }
    }

    /// Whether a backward reveal may start for the given scroll position.
    pub fn can_load_older(&self, metrics: ScrollMetrics) -> bool {
        let visible_len = self.visible().len();
        metrics.is_at_top()
            && !self.is_loading_more
            && visible_len == self.config.page_size
            && self.full.len() > visible_len
    }

    /// Start a backward reveal, returning the anchor used to restore scroll.
    ///
    /// Returns `None` (and changes nothing) when `can_load_older` is false.
    pub fn begin_load_older(&mut self, metrics: ScrollMetrics) -> Option<ScrollAnchor> {
        if !self.can_load_older(metrics) {
            return None;
        }

        self.is_loading_more = true;
        debug!(
            hidden = self.hidden_count(),
            visible = self.visible().len(),
            "starting backward reveal"
        );
        Some(ScrollAnchor {
            scroll_top: metrics.scroll_top,
            scroll_height: metrics.scroll_height,
        })
    }

    /// Finish a backward reveal by prepending every hidden message.
    ///
    /// Returns how many messages were revealed; zero when no reveal was running.
    pub fn finish_load_older(&mut self) -> usize {
        if !self.is_loading_more {
            return 0;
        }

        let revealed = self.visible_start;
        self.visible_start = 0;
        self.revealed_all = true;
        self.is_loading_more = false;
        debug!(revealed, total = self.full.len(), "backward reveal finished");
        revealed
    }

    fn latest_page_start(&self) -> usize {
        self.full.len().saturating_sub(self.config.page_size)
    }

    fn clamp_start(&mut self) {
        self.visible_start = self.visible_start.min(self.full.len());
    }
}
