//! Core engine for Vigil - the background subsystems and the startup
//! sequence that brings them up.
//!
//! This crate contains no terminal or transport code: the binary owns the
//! host bridge wiring and the tracing subscriber.

mod aggregator;
mod cleanup;
mod config;
mod listeners;
mod startup;
mod subsystems;
mod util;

pub use aggregator::UsageAggregator;
pub use cleanup::{RetentionPolicy, RetentionSweeper, SweepTrigger};
pub use config::{AppConfig, ConfigError, RetentionConfig, StorageConfig, VigilConfig};
pub use listeners::{HostBridge, TabListenerRegistry};
pub use startup::{Startup, StartupState};
pub use subsystems::{Aggregator, Cleanup, Listeners, Storage};
