//! Engine: turns subscriptions into a stream of time slices.
//!
//! - `reader` walks one subscription's dates and sources, applying corporate
//!   actions and emitting normalized points plus auxiliary events
//! - `synchronizer` merges many point sources into strictly ordered slices
//! - `live` queues points pushed by producer threads
//! - `subscriptions` owns the active set and applies adds/removes between steps
//! - `adjust` holds the price normalization transforms

pub mod adjust;
pub mod live;
pub mod reader;
pub mod subscriptions;
pub mod synchronizer;

pub use adjust::{adjust_point, adjust_price, adjust_size, factors_as_of, unadjust_price};
pub use live::{live_channel, spawn_live_reader, LiveFeed, LiveSource};
pub use reader::{ReaderState, SubscriptionReader};
pub use subscriptions::{Subscription, SubscriptionCommands, SubscriptionError, SubscriptionManager};
pub use synchronizer::{ExhaustedSource, PointSource, Pull, SyncStep, Synchronizer};
