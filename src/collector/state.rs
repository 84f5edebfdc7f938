//! Shared run state and counters of a collection run.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::links::Platform;

/// Control signal broadcast to every session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

/// Externally visible collector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorStatus {
    Idle,
    Running,
    Paused,
}

impl CollectorStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for CollectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the counters of the current (or last) run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub telegram: u64,
    pub whatsapp: u64,
    pub messages: u64,
    pub dialogs: u64,
    pub errors: u64,
}

impl CollectionStats {
    #[must_use]
    pub const fn total_links(&self) -> u64 {
        self.telegram + self.whatsapp
    }
}

/// Lock-free counters updated by every session task.
#[derive(Debug, Default)]
pub(crate) struct StatsCounter {
    telegram: AtomicU64,
    whatsapp: AtomicU64,
    messages: AtomicU64,
    dialogs: AtomicU64,
    errors: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn reset(&self) {
        for counter in [
            &self.telegram,
            &self.whatsapp,
            &self.messages,
            &self.dialogs,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn add_link(&self, platform: Platform) {
        let counter = match platform {
            Platform::WhatsApp => &self.whatsapp,
            _ => &self.telegram,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_messages(&self, count: u64) {
        self.messages.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_dialog(&self) {
        self.dialogs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CollectionStats {
        CollectionStats {
            telegram: self.telegram.load(Ordering::Relaxed),
            whatsapp: self.whatsapp.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            dialogs: self.dialogs.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_snapshot_and_reset() {
        let counter = StatsCounter::default();
        counter.add_link(Platform::Telegram);
        counter.add_link(Platform::Telegram);
        counter.add_link(Platform::WhatsApp);
        counter.add_messages(10);
        counter.add_error();

        let stats = counter.snapshot();
        assert_eq!(stats.telegram, 2);
        assert_eq!(stats.whatsapp, 1);
        assert_eq!(stats.total_links(), 3);
        assert_eq!(stats.messages, 10);
        assert_eq!(stats.errors, 1);

        counter.reset();
        assert_eq!(counter.snapshot(), CollectionStats::default());
    }
}
