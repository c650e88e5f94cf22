//! Retention sweeps: age out old events and usage buckets.
//!
//! Three entry points, all driven by the startup sequence: an immediate
//! pass, a recurring interval task, and an on-demand trigger other
//! components can fire (e.g. a settings surface offering "clear old data
//! now"). Sweeps inside spawned tasks log failures and keep going; only the
//! initial pass propagates errors, because startup treats it as a required
//! precondition.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{Mutex, mpsc};

use vigil_store::EventStore;
use vigil_types::DayStamp;

use crate::subsystems::Cleanup;
use crate::util::now_unix;

const SECS_PER_DAY: u64 = 86_400;

/// How much history to keep and how often to sweep.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub max_event_age_days: u32,
    pub sweep_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_event_age_days: 90,
            sweep_interval: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// Clonable handle that forces an immediate sweep.
///
/// Does nothing until [`RetentionSweeper`] has its trigger armed; fires are
/// coalesced by the channel, never lost while the sweeper lives.
#[derive(Debug, Clone)]
pub struct SweepTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl SweepTrigger {
    pub fn fire(&self) {
        // Send can only fail when the sweeper is gone, in which case there
        // is nothing left to sweep.
        let _ = self.tx.send(());
    }
}

/// Owns the retention policy and the sweep schedule.
#[derive(Debug)]
pub struct RetentionSweeper {
    store: Arc<EventStore>,
    policy: RetentionPolicy,
    trigger_tx: mpsc::UnboundedSender<()>,
    trigger_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
}

impl RetentionSweeper {
    #[must_use]
    pub fn new(store: Arc<EventStore>, policy: RetentionPolicy) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        Self {
            store,
            policy,
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        }
    }

    /// Handle for forcing an immediate sweep once the trigger is armed.
    #[must_use]
    pub fn trigger_handle(&self) -> SweepTrigger {
        SweepTrigger {
            tx: self.trigger_tx.clone(),
        }
    }

    /// Run one sweep now. Returns the number of rows deleted.
    pub async fn sweep_now(&self) -> Result<u64> {
        sweep(&self.store, &self.policy).await
    }

    /// Spawn the recurring sweep task.
    ///
    /// The first interval tick is consumed immediately: the caller just ran
    /// an initial pass, so the task only sweeps after a full interval.
    fn spawn_recurring(&self) {
        let store = Arc::clone(&self.store);
        let policy = self.policy.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(policy.sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = sweep(&store, &policy).await {
                    tracing::warn!("recurring retention sweep failed: {err:#}");
                }
            }
        });
    }

    /// Take the trigger receiver and spawn the on-demand sweep task.
    async fn arm_trigger(&self) -> Result<()> {
        let mut guard = self.trigger_rx.lock().await;
        let Some(mut rx) = guard.take() else {
            anyhow::bail!("sweep trigger already armed");
        };
        drop(guard);

        let store = Arc::clone(&self.store);
        let policy = self.policy.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                if let Err(err) = sweep(&store, &policy).await {
                    tracing::warn!("triggered retention sweep failed: {err:#}");
                }
            }
        });
        Ok(())
    }
}

async fn sweep(store: &EventStore, policy: &RetentionPolicy) -> Result<u64> {
    let now = now_unix();
    let cutoff_at = now.saturating_sub(u64::from(policy.max_event_age_days) * SECS_PER_DAY);
    let cutoff_day = DayStamp::from_unix(now).days_earlier(policy.max_event_age_days);
    let deleted = store.prune_before(cutoff_at, cutoff_day).await?;
    if deleted > 0 {
        tracing::info!("retention sweep deleted {deleted} rows");
    }
    Ok(deleted)
}

impl Cleanup for RetentionSweeper {
    async fn run_once(&self) -> Result<()> {
        self.sweep_now().await.map(|_| ())
    }

    async fn schedule_recurring(&self) -> Result<()> {
        self.spawn_recurring();
        Ok(())
    }

    async fn register_trigger(&self) -> Result<()> {
        self.arm_trigger().await
    }
}
