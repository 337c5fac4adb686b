//! Last-successful-bot tracking per capability tag.
//!
//! The dispatcher breaks equal-confidence ties deterministically toward
//! the bot that most recently completed an invocation for the capability.
//! Timestamps come from completion time; a timestamp tie falls back to
//! bot-ID ordering so the result is still deterministic.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Tracks, per `(capability tag, bot)`, the last successful completion.
pub struct RecencyTracker {
    last_success: DashMap<(String, Uuid), DateTime<Utc>>,
}

impl RecencyTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            last_success: DashMap::new(),
        }
    }

    /// Record a successful completion for one capability tag.
    pub fn record_success(&self, tag: &str, bot_id: Uuid) {
        self.record_success_at(tag, bot_id, Utc::now());
    }

    /// Record a success with an explicit timestamp.
    pub fn record_success_at(&self, tag: &str, bot_id: Uuid, at: DateTime<Utc>) {
        self.last_success
            .entry((tag.to_string(), bot_id))
            .and_modify(|t| {
                if at > *t {
                    *t = at;
                }
            })
            .or_insert(at);
    }

    /// When the bot last succeeded for the tag, if ever.
    pub fn last_success(&self, tag: &str, bot_id: Uuid) -> Option<DateTime<Utc>> {
        self.last_success
            .get(&(tag.to_string(), bot_id))
            .map(|t| *t)
    }

    /// Among `candidates`, the bot with the most recent success for any of
    /// the given tags. Returns `None` when no candidate has ever succeeded.
    pub fn most_recent_of(&self, tags: &[String], candidates: &[Uuid]) -> Option<Uuid> {
        candidates
            .iter()
            .filter_map(|bot_id| {
                tags.iter()
                    .filter_map(|tag| self.last_success(tag, *bot_id))
                    .max()
                    .map(|at| (at, *bot_id))
            })
            // Max by timestamp; equal timestamps resolve by bot ID so the
            // choice stays deterministic.
            .max()
            .map(|(_, bot_id)| bot_id)
    }
}

impl Default for RecencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecencyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecencyTracker")
            .field("tracked_pairs", &self.last_success.len())
            .finish()
    }
}
