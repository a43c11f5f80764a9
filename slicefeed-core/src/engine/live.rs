//! Live sources: lock-free per-instrument queues fed by producer threads and
//! drained by the synchronizer.

use super::adjust::adjust_point;
use super::reader::SubscriptionReader;
use super::synchronizer::{PointSource, Pull};
use crate::domain::{DataPoint, SubscriptionConfig};
use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace};

#[derive(Default)]
struct Shared {
    queue: SegQueue<DataPoint>,
    /// Set by the consumer on removal or by the producer when it is done.
    closed: AtomicBool,
}

/// Producer half. Cheap to clone; every clone feeds the same queue.
#[derive(Clone)]
pub struct LiveFeed {
    shared: Arc<Shared>,
}

impl LiveFeed {
    /// Enqueue a point. Returns false once the subscription has been removed.
    pub fn push(&self, point: DataPoint) -> bool {
        if self.is_closed() {
            return false;
        }
        self.shared.queue.push(point);
        true
    }

    /// No more points will come; the source ends once the queue drains.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }
}

/// Consumer half, registered with the synchronizer.
pub struct LiveSource {
    shared: Arc<Shared>,
    /// Normalize raw pushed points with this config's published factors.
    normalize: Option<Arc<SubscriptionConfig>>,
    worker: Option<JoinHandle<()>>,
    /// Stop flag of the reader behind `worker`.
    stop: Option<Arc<AtomicBool>>,
}

/// A connected feed/source pair. With `normalize`, pushed points are treated
/// as raw and adjusted with the factors the config holds at dequeue time.
pub fn live_channel(normalize: Option<Arc<SubscriptionConfig>>) -> (LiveFeed, LiveSource) {
    let shared = Arc::new(Shared::default());
    let feed = LiveFeed { shared: Arc::clone(&shared) };
    (feed, LiveSource { shared, normalize, worker: None, stop: None })
}

/// Run a live reader on its own thread, feeding a queue. The thread exits at
/// its next iteration once the source is closed.
pub fn spawn_live_reader(reader: SubscriptionReader, idle: Duration) -> LiveSource {
    let (feed, mut source) = live_channel(None);
    let stop = reader.stop_flag();
    let key = reader.config().key();
    let handle = thread::Builder::new()
        .name(format!("live-{key}"))
        .spawn(move || run_worker(reader, feed, idle));
    match handle {
        Ok(handle) => source.worker = Some(handle),
        Err(e) => {
            error!(%key, error = %e, "could not start live reader thread");
            source.shared.closed.store(true, Ordering::Release);
        }
    }
    source.stop = Some(stop);
    source
}

fn run_worker(mut reader: SubscriptionReader, feed: LiveFeed, idle: Duration) {
    let key = reader.config().key();
    debug!(%key, "live reader started");
    loop {
        if feed.is_closed() {
            reader.close();
            break;
        }
        match reader.pull() {
            Pull::Ready(point) => {
                if !feed.push(point) {
                    reader.close();
                    break;
                }
            }
            Pull::Pending => thread::sleep(idle),
            Pull::Exhausted => {
                feed.close();
                break;
            }
        }
    }
    debug!(%key, "live reader stopped");
}

impl PointSource for LiveSource {
    fn pull(&mut self) -> Pull {
        match self.shared.queue.pop() {
            Some(point) => match &self.normalize {
                Some(config) => Pull::Ready(adjust_point(point, config.normalization, &config.factors())),
                None => Pull::Ready(point),
            },
            None if self.shared.closed.load(Ordering::Acquire) => Pull::Exhausted,
            None => Pull::Pending,
        }
    }

    fn close(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Some(stop) = &self.stop {
            stop.store(true, Ordering::Release);
        }
        while self.shared.queue.pop().is_some() {}
        if let Some(worker) = self.worker.take() {
            if worker.is_finished() {
                let _ = worker.join();
            } else {
                trace!("live worker still running, detached");
            }
        }
    }
}
