//! Token usage accounting.
//!
//! Providers report usage as absolute snapshots, so within one request a new
//! value overwrites the old one. Only a completed message folds its final
//! counts into the session total.
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::protocol::{NormalizedEvent, UsageKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageCounters {
    pub input: u64,
    pub output: u64,
    pub thoughts: u64,
}

impl UsageCounters {
    #[must_use]
    pub fn get(&self, kind: UsageKind) -> u64 {
        match kind {
            UsageKind::Input => self.input,
            UsageKind::Output => self.output,
            UsageKind::Thoughts => self.thoughts,
        }
    }

    pub fn set(&mut self, kind: UsageKind, tokens: u64) {
        match kind {
            UsageKind::Input => self.input = tokens,
            UsageKind::Output => self.output = tokens,
            UsageKind::Thoughts => self.thoughts = tokens,
        }
    }

    pub fn accumulate(&mut self, other: &UsageCounters) {
        self.input = self.input.saturating_add(other.input);
        self.output = self.output.saturating_add(other.output);
        self.thoughts = self.thoughts.saturating_add(other.thoughts);
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.input
            .saturating_add(self.output)
            .saturating_add(self.thoughts)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Running totals across all exchanges of one session, shared by handle.
#[derive(Debug, Clone, Default)]
pub struct SessionUsage {
    inner: Arc<Mutex<UsageCounters>>,
}

impl SessionUsage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> UsageCounters {
        *self.inner.lock()
    }

    fn add(&self, counters: &UsageCounters) {
        self.inner.lock().accumulate(counters);
    }
}

/// Per-exchange usage tracker feeding a [`SessionUsage`].
#[derive(Debug)]
pub struct UsageAggregator {
    current: UsageCounters,
    completed: Option<UsageCounters>,
    session: SessionUsage,
}

impl UsageAggregator {
    #[must_use]
    pub fn new(session: SessionUsage) -> Self {
        Self {
            current: UsageCounters::default(),
            completed: None,
            session,
        }
    }

    pub fn observe(&mut self, event: &NormalizedEvent) {
        match event {
            NormalizedEvent::UsageUpdate { kind, tokens } => self.current.set(*kind, *tokens),
            NormalizedEvent::MessageComplete => {
                if self.completed.is_some() {
                    tracing::debug!("duplicate message completion, usage already recorded");
                    return;
                }
                self.session.add(&self.current);
                self.completed = Some(self.current);
                self.current = UsageCounters::default();
            }
            _ => {}
        }
    }

    /// Counts seen since the last completion.
    #[must_use]
    pub fn current(&self) -> UsageCounters {
        self.current
    }

    /// Final counts of the completed message, if it completed.
    #[must_use]
    pub fn completed(&self) -> Option<UsageCounters> {
        self.completed
    }

    #[must_use]
    pub fn session(&self) -> &SessionUsage {
        &self.session
    }
}
