//! Named chat counters with throttled, delayed notifications.

pub mod actions;
pub mod commands;
pub mod config;
pub mod delivery;
pub mod error;
pub mod journal;
pub mod render;
pub mod state;

pub use actions::counter::{Counter, Policy, SharedCounter};
pub use actions::imbrication::Imbrication;
pub use actions::listener::ListenerKey;
pub use commands::CountersModule;
pub use config::Config;
pub use delivery::{Delivery, DeliveryOutcome, DeliveryScheduler, ScheduledDelivery};
pub use error::{CounterError, CounterResult, EntityKind};
pub use state::Registry;
