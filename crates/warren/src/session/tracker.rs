//! Live relay channel accounting.

use std::sync::Arc;

use dashmap::DashMap;

/// Counts relay channels attached to each session.
#[derive(Debug, Clone, Default)]
pub struct ChannelTracker {
    counts: Arc<DashMap<String, usize>>,
}

impl ChannelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new channel on `session_id`; the count drops with the guard.
    pub fn register(&self, session_id: &str) -> ChannelGuard {
        *self.counts.entry(session_id.to_string()).or_insert(0) += 1;
        ChannelGuard {
            counts: self.counts.clone(),
            session_id: session_id.to_string(),
        }
    }

    pub fn count(&self, session_id: &str) -> usize {
        self.counts.get(session_id).map(|c| *c).unwrap_or(0)
    }
}

/// Keeps one channel registered while alive.
#[derive(Debug)]
pub struct ChannelGuard {
    counts: Arc<DashMap<String, usize>>,
    session_id: String,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.counts
            .remove_if_mut(&self.session_id, |_, count| {
                *count = count.saturating_sub(1);
                *count == 0
            });
    }
}
