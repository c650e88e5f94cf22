//! Contracts the startup sequence drives.
//!
//! Every operation has the same shape - an async task resolving to
//! `Result<()>` - even where the underlying work completes without
//! suspending (the two registration calls). One shape per step keeps the
//! driver uniform and lets tests substitute scripted doubles for any
//! subsystem.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;

use vigil_store::EventStore;

/// Persistent storage readiness.
pub trait Storage {
    /// Bring the backing store to a ready state. Idempotent.
    fn initialize(&self) -> impl Future<Output = Result<()>> + Send;
}

/// The event-aggregation pipeline.
pub trait Aggregator {
    /// Prime the pipeline (e.g. warm caches from storage).
    fn initialize(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Periodic data cleanup.
pub trait Cleanup {
    /// Run a single cleanup pass now.
    fn run_once(&self) -> impl Future<Output = Result<()>> + Send;
    /// Start the recurring cleanup schedule.
    fn schedule_recurring(&self) -> impl Future<Output = Result<()>> + Send;
    /// Arm the on-demand cleanup trigger. Registration completes promptly;
    /// the triggers it arms fire later.
    fn register_trigger(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Tab-event capture hooks.
pub trait Listeners {
    /// Attach the runtime event hooks. Hooks attach once per process.
    fn register_tab_listeners(&self) -> impl Future<Output = Result<()>> + Send;
}

impl Storage for EventStore {
    fn initialize(&self) -> impl Future<Output = Result<()>> + Send {
        EventStore::initialize(self)
    }
}

// Subsystems are shared behind Arc in the binary; the handles forward.

impl<T: Storage + Send + Sync> Storage for Arc<T> {
    fn initialize(&self) -> impl Future<Output = Result<()>> + Send {
        T::initialize(self)
    }
}

impl<T: Aggregator + Send + Sync> Aggregator for Arc<T> {
    fn initialize(&self) -> impl Future<Output = Result<()>> + Send {
        T::initialize(self)
    }
}

impl<T: Cleanup + Send + Sync> Cleanup for Arc<T> {
    fn run_once(&self) -> impl Future<Output = Result<()>> + Send {
        T::run_once(self)
    }

    fn schedule_recurring(&self) -> impl Future<Output = Result<()>> + Send {
        T::schedule_recurring(self)
    }

    fn register_trigger(&self) -> impl Future<Output = Result<()>> + Send {
        T::register_trigger(self)
    }
}

impl<T: Listeners + Send + Sync> Listeners for Arc<T> {
    fn register_tab_listeners(&self) -> impl Future<Output = Result<()>> + Send {
        T::register_tab_listeners(self)
    }
}
