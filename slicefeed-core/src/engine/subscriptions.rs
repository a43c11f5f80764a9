//! Subscription manager.
//!
//! Owns the active subscriptions and the synchronizer they feed. Subscriptions
//! can be added and removed between any two steps, directly or through a
//! `SubscriptionCommands` handle from another thread; queued commands are
//! applied at the start of the next step.
//!
//! A subscription whose configuration is invalid is reported on the result
//! channel and registered as an exhausted source, so the rest of the run is
//! unaffected.

use super::live::{live_channel, spawn_live_reader, LiveFeed};
use super::reader::SubscriptionReader;
use super::synchronizer::{ExhaustedSource, PointSource, SyncStep, Synchronizer};
use crate::data::DataEnvironment;
use crate::domain::{
    ConfigError, Resolution, Slice, SubscriptionConfig, SubscriptionId, SubscriptionKey, SubscriptionRequest,
};
use crossbeam::channel::{unbounded, Receiver, Sender};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("{key} is already subscribed at {existing}, cannot add it at {requested}")]
    ResolutionConflict { key: SubscriptionKey, existing: Resolution, requested: Resolution },

    #[error("{0} is already subscribed")]
    AlreadySubscribed(SubscriptionId),

    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    #[error("no subscription for {0}")]
    UnknownKey(SubscriptionKey),
}

/// One active subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub request: SubscriptionRequest,
    pub config: Arc<SubscriptionConfig>,
}

enum Command {
    Add(SubscriptionRequest),
    Remove(SubscriptionId),
    RemoveKey(SubscriptionKey),
}

/// Cloneable handle for changing subscriptions from other threads.
#[derive(Clone)]
pub struct SubscriptionCommands {
    tx: Sender<Command>,
}

impl SubscriptionCommands {
    /// False if the manager is gone.
    pub fn add(&self, request: SubscriptionRequest) -> bool {
        self.tx.send(Command::Add(request)).is_ok()
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.tx.send(Command::Remove(id)).is_ok()
    }

    pub fn remove_key(&self, key: SubscriptionKey) -> bool {
        self.tx.send(Command::RemoveKey(key)).is_ok()
    }
}

enum Reservation {
    Existing(SubscriptionId),
    New(SubscriptionId, Arc<SubscriptionConfig>),
}

pub struct SubscriptionManager {
    env: DataEnvironment,
    sync: Synchronizer,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    by_key: HashMap<SubscriptionKey, SubscriptionId>,
    next_id: u64,
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl SubscriptionManager {
    /// Backtest manager: historical readers, finishes when all are exhausted.
    pub fn new(env: DataEnvironment) -> Self {
        Self::with_synchronizer(env, Synchronizer::new())
    }

    /// Live manager: every `add` runs a live reader on a worker thread.
    pub fn live(env: DataEnvironment) -> Self {
        Self::with_synchronizer(env, Synchronizer::live(Duration::from_millis(10)))
    }

    fn with_synchronizer(env: DataEnvironment, sync: Synchronizer) -> Self {
        let (tx, rx) = unbounded();
        Self { env, sync, subscriptions: BTreeMap::new(), by_key: HashMap::new(), next_id: 0, tx, rx }
    }

    pub fn environment(&self) -> &DataEnvironment {
        &self.env
    }

    pub fn is_live(&self) -> bool {
        self.sync.is_live()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(&id)
    }

    pub fn id_of(&self, key: &SubscriptionKey) -> Option<SubscriptionId> {
        self.by_key.get(key).copied()
    }

    /// Active subscriptions in id (registration) order.
    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.values()
    }

    pub fn commands(&self) -> SubscriptionCommands {
        SubscriptionCommands { tx: self.tx.clone() }
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    // ── Adding ─────────────────────────────────────────────────────────

    /// Subscribe. The same symbol and data type at the same resolution
    /// returns the existing id.
    pub fn add(&mut self, request: SubscriptionRequest) -> Result<SubscriptionId, SubscriptionError> {
        if self.is_live() {
            return self.add_live_reader(request);
        }
        match self.reserve(&request)? {
            Reservation::Existing(id) => Ok(id),
            Reservation::New(id, config) => {
                let source = historical_source(&self.env, &request, &config);
                self.sync.add(id, config, source);
                Ok(id)
            }
        }
    }

    /// Subscribe to many at once. Readers are built and their first sources
    /// opened in parallel; registration keeps request order.
    pub fn add_many(&mut self, requests: Vec<SubscriptionRequest>) -> Vec<Result<SubscriptionId, SubscriptionError>> {
        if self.is_live() {
            return requests.into_iter().map(|r| self.add_live_reader(r)).collect();
        }
        let reserved: Vec<Result<Reservation, SubscriptionError>> = requests.iter().map(|r| self.reserve(r)).collect();

        let env = &self.env;
        let sources: Vec<Option<Box<dyn PointSource>>> = requests
            .par_iter()
            .zip(reserved.par_iter())
            .map(|(request, reservation)| match reservation {
                Ok(Reservation::New(_, config)) => Some(historical_source(env, request, config)),
                _ => None,
            })
            .collect();

        let mut out = Vec::with_capacity(reserved.len());
        for (reservation, source) in reserved.into_iter().zip(sources) {
            out.push(match (reservation, source) {
                (Ok(Reservation::New(id, config)), Some(source)) => {
                    self.sync.add(id, config, source);
                    Ok(id)
                }
                (Ok(Reservation::New(id, _)), None) | (Ok(Reservation::Existing(id)), _) => Ok(id),
                (Err(e), _) => Err(e),
            });
        }
        info!(count = out.len(), "subscriptions added");
        out
    }

    /// Register a push-fed live subscription and hand back its producer.
    /// Pushed points are raw; they are normalized with the factors the
    /// subscription's config holds when they are dequeued.
    pub fn add_live_feed(&mut self, request: SubscriptionRequest) -> Result<(SubscriptionId, LiveFeed), SubscriptionError> {
        let (id, config) = match self.reserve(&request)? {
            Reservation::Existing(id) => return Err(SubscriptionError::AlreadySubscribed(id)),
            Reservation::New(id, config) => (id, config),
        };
        let (feed, source) = live_channel(Some(Arc::clone(&config)));
        let source: Box<dyn PointSource> = match request.validate(&config) {
            Ok(()) => Box::new(source),
            Err(e) => {
                report_config_error(&self.env, &config, &e);
                feed.close();
                Box::new(ExhaustedSource)
            }
        };
        self.sync.add(id, config, source);
        Ok((id, feed))
    }

    /// Run a live reader for `request` on its own thread.
    pub fn add_live_reader(&mut self, request: SubscriptionRequest) -> Result<SubscriptionId, SubscriptionError> {
        let (id, config) = match self.reserve(&request)? {
            Reservation::Existing(id) => return Ok(id),
            Reservation::New(id, config) => (id, config),
        };
        let source: Box<dyn PointSource> = match build_reader(&self.env, &request, &config, true) {
            Ok(reader) => {
                let idle = Duration::from_millis(self.env.settings.poll_interval_ms);
                Box::new(spawn_live_reader(reader, idle))
            }
            Err(e) => {
                report_config_error(&self.env, &config, &e);
                Box::new(ExhaustedSource)
            }
        };
        self.sync.add(id, config, source);
        Ok(id)
    }

    fn reserve(&mut self, request: &SubscriptionRequest) -> Result<Reservation, SubscriptionError> {
        let key = request.key();
        if let Some(&id) = self.by_key.get(&key) {
            if let Some(existing) = self.subscriptions.get(&id) {
                if existing.config.resolution != request.resolution {
                    return Err(SubscriptionError::ResolutionConflict {
                        key,
                        existing: existing.config.resolution,
                        requested: request.resolution,
                    });
                }
            }
            return Ok(Reservation::Existing(id));
        }
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let config = request.to_config();
        self.by_key.insert(key, id);
        self.subscriptions
            .insert(id, Subscription { id, request: request.clone(), config: Arc::clone(&config) });
        Ok(Reservation::New(id, config))
    }

    // ── Removing ───────────────────────────────────────────────────────

    /// Unsubscribe: the source is closed and leaves the merge before the next step.
    pub fn remove(&mut self, id: SubscriptionId) -> Result<Subscription, SubscriptionError> {
        let subscription = self
            .subscriptions
            .remove(&id)
            .ok_or(SubscriptionError::UnknownSubscription(id))?;
        self.by_key.remove(&subscription.config.key());
        self.sync.remove(id);
        debug!(%id, key = %subscription.config.key(), "subscription removed");
        Ok(subscription)
    }

    pub fn remove_key(&mut self, key: &SubscriptionKey) -> Result<Subscription, SubscriptionError> {
        let id = self.id_of(key).ok_or_else(|| SubscriptionError::UnknownKey(key.clone()))?;
        self.remove(id)
    }

    // ── Stepping ───────────────────────────────────────────────────────

    fn apply_commands(&mut self) {
        let commands: Vec<Command> = self.rx.try_iter().collect();
        for command in commands {
            let outcome = match command {
                Command::Add(request) => self.add(request).map(|_| ()),
                Command::Remove(id) => self.remove(id).map(|_| ()),
                Command::RemoveKey(key) => self.remove_key(&key).map(|_| ()),
            };
            if let Err(e) = outcome {
                self.env.results.invalid_configuration(&e.to_string());
            }
        }
    }

    pub fn step(&mut self) -> SyncStep {
        self.apply_commands();
        self.sync.step()
    }
}

impl Iterator for SubscriptionManager {
    type Item = Slice;

    fn next(&mut self) -> Option<Slice> {
        loop {
            match self.step() {
                SyncStep::Slice(slice) => return Some(slice),
                SyncStep::Finished => return None,
                SyncStep::Idle => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    }
}

fn build_reader(
    env: &DataEnvironment,
    request: &SubscriptionRequest,
    config: &Arc<SubscriptionConfig>,
    is_live: bool,
) -> Result<SubscriptionReader, ConfigError> {
    request.validate(config)?;
    SubscriptionReader::new(Arc::clone(config), request.start, request.end, env, is_live)
}

fn historical_source(
    env: &DataEnvironment,
    request: &SubscriptionRequest,
    config: &Arc<SubscriptionConfig>,
) -> Box<dyn PointSource> {
    match build_reader(env, request, config, false) {
        Ok(mut reader) => {
            reader.prime();
            Box::new(reader)
        }
        Err(e) => {
            report_config_error(env, config, &e);
            Box::new(ExhaustedSource)
        }
    }
}

fn report_config_error(env: &DataEnvironment, config: &SubscriptionConfig, e: &ConfigError) {
    env.results.invalid_configuration(&format!("{}: {e}", config.key()));
}
