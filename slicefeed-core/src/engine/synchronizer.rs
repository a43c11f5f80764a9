//! Multi-source merge into time-ordered slices.
//!
//! Each step:
//! 1. every source without a head is pulled once;
//! 2. the frontier is the smallest head end time;
//! 3. every source whose head sits on the frontier is drained of all its
//!    consecutive points at that time into the slice;
//! 4. silent sources with fill-forward on repeat their last price point,
//!    also after their reader has finished, until they are delisted.
//!
//! Slice times are strictly increasing. A point that arrives at or before the
//! previous slice time (late live data) goes into the next slice, whose time
//! is bumped one nanosecond past the previous one. Sources are visited in
//! registration order, so the merge is reproducible.

use crate::domain::{DataPoint, DelistingKind, Payload, Slice, SubscriptionConfig, SubscriptionId};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Outcome of asking a source for its next point.
#[derive(Debug, Clone, PartialEq)]
pub enum Pull {
    Ready(DataPoint),
    /// Nothing now, maybe later. Only live sources return this.
    Pending,
    Exhausted,
}

/// Anything the synchronizer can merge: historical readers, live queues.
pub trait PointSource: Send {
    fn pull(&mut self) -> Pull;

    /// Release handles and stop producing. Idempotent.
    fn close(&mut self) {}
}

/// A source that never produces anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExhaustedSource;

impl PointSource for ExhaustedSource {
    fn pull(&mut self) -> Pull {
        Pull::Exhausted
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncStep {
    Slice(Slice),
    /// No source has a point right now but some may later.
    Idle,
    Finished,
}

struct Entry {
    id: SubscriptionId,
    config: Arc<SubscriptionConfig>,
    source: Box<dyn PointSource>,
    head: Option<DataPoint>,
    exhausted: bool,
    /// Last emitted price point, repeated for fill-forward. Cleared on delisting.
    last: Option<DataPoint>,
}

impl Entry {
    fn refill(&mut self) {
        if self.head.is_some() || self.exhausted {
            return;
        }
        match self.source.pull() {
            Pull::Ready(point) => self.head = Some(point),
            Pull::Pending => {}
            Pull::Exhausted => {
                trace!(id = %self.id, "source exhausted");
                self.exhausted = true;
            }
        }
    }
}

pub struct Synchronizer {
    entries: Vec<Entry>,
    last_time: Option<NaiveDateTime>,
    live: bool,
    idle_sleep: Duration,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synchronizer {
    /// Backtest synchronizer: finishes once every source is exhausted.
    pub fn new() -> Self {
        Self { entries: Vec::new(), last_time: None, live: false, idle_sleep: Duration::from_millis(10) }
    }

    /// Live synchronizer: never finishes on its own.
    pub fn live(idle_sleep: Duration) -> Self {
        Self { entries: Vec::new(), last_time: None, live: true, idle_sleep }
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn add(&mut self, id: SubscriptionId, config: Arc<SubscriptionConfig>, source: Box<dyn PointSource>) {
        debug!(%id, key = %config.key(), "source registered");
        self.entries.push(Entry { id, config, source, head: None, exhausted: false, last: None });
    }

    /// Close and drop a source. Its pending head is discarded.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let Some(pos) = self.entries.iter().position(|e| e.id == id) else {
            return false;
        };
        let mut entry = self.entries.remove(pos);
        entry.source.close();
        debug!(%id, "source removed");
        true
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    /// Time of the last emitted slice.
    pub fn last_time(&self) -> Option<NaiveDateTime> {
        self.last_time
    }

    pub fn is_exhausted(&self, id: SubscriptionId) -> bool {
        self.entries.iter().any(|e| e.id == id && e.exhausted && e.head.is_none())
    }

    pub fn step(&mut self) -> SyncStep {
        for entry in &mut self.entries {
            entry.refill();
        }

        let frontier = self
            .entries
            .iter()
            .filter_map(|e| e.head.as_ref().map(|p| p.end_time))
            .min();
        let Some(frontier) = frontier else {
            let done = self.entries.iter().all(|e| e.exhausted);
            return if done && !self.live { SyncStep::Finished } else { SyncStep::Idle };
        };

        let time = match self.last_time {
            Some(last) if frontier <= last => last + ChronoDuration::nanoseconds(1),
            _ => frontier,
        };
        let mut slice = Slice::new(time);

        for entry in &mut self.entries {
            let mut fresh_price = false;
            while entry.head.as_ref().is_some_and(|p| p.end_time == frontier) {
                let Some(point) = entry.head.take() else { break };
                match &point.payload {
                    Payload::Delisting(d) if d.kind == DelistingKind::Delisted => entry.last = None,
                    _ if !point.is_auxiliary() => {
                        fresh_price = true;
                        entry.last = Some(point.clone());
                    }
                    _ => {}
                }
                slice.push(point);
                entry.refill();
            }
            if !fresh_price && entry.config.fill_forward {
                if let Some(last) = &entry.last {
                    slice.push(last.fill_forward());
                }
            }
        }

        self.last_time = Some(time);
        SyncStep::Slice(slice)
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        for entry in &mut self.entries {
            entry.source.close();
        }
    }
}

impl Iterator for Synchronizer {
    type Item = Slice;

    fn next(&mut self) -> Option<Slice> {
        loop {
            match self.step() {
                SyncStep::Slice(slice) => return Some(slice),
                SyncStep::Finished => return None,
                SyncStep::Idle => std::thread::sleep(self.idle_sleep),
            }
        }
    }
}
