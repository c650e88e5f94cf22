//! The startup sequence: bring the background subsystems up in a fixed
//! order with per-phase failure policies.
//!
//! Storage initialization is the only step allowed to fail without aborting
//! startup: a cold process should still accept new events and run best-effort
//! rather than refuse to start. Writes against an unready store fail
//! individually later, and that is the storage subsystem's concern. Every
//! step after storage is a required precondition - its failure aborts the
//! remainder of the sequence and propagates to the caller, with no rollback
//! of the steps already completed.
//!
//! The sequence runs once per process lifetime, driven from the binary's
//! start path. Calling [`Startup::run`] again re-executes every step; the
//! once-only discipline belongs to the caller.

use anyhow::{Context, Result};

use crate::subsystems::{Aggregator, Cleanup, Listeners, Storage};

/// Where the startup sequence currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    NotStarted,
    Running,
    /// Every step finished, whether or not storage came up.
    Completed,
    /// A required step failed. Terminal: no automatic retry.
    Aborted,
}

/// Drives the fixed startup order over the four subsystem handles.
///
/// Handles are injected at construction so tests can substitute scripted
/// doubles for any subsystem.
#[derive(Debug)]
pub struct Startup<S, A, C, L> {
    storage: S,
    aggregator: A,
    cleanup: C,
    listeners: L,
    dev_mode: bool,
    state: StartupState,
}

impl<S, A, C, L> Startup<S, A, C, L>
where
    S: Storage,
    A: Aggregator,
    C: Cleanup,
    L: Listeners,
{
    #[must_use]
    pub fn new(storage: S, aggregator: A, cleanup: C, listeners: L, dev_mode: bool) -> Self {
        Self {
            storage,
            aggregator,
            cleanup,
            listeners,
            dev_mode,
            state: StartupState::NotStarted,
        }
    }

    #[must_use]
    pub fn state(&self) -> StartupState {
        self.state
    }

    /// Execute the startup sequence.
    ///
    /// Steps, in order: startup diagnostics, storage init (isolated),
    /// aggregator init, initial cleanup pass, recurring cleanup schedule,
    /// cleanup trigger arming, tab listener registration. Steps never
    /// overlap; each one's result is awaited before the next begins. No
    /// step is retried or timed out here - a hung subsystem call blocks
    /// startup, and retry belongs to the subsystem that knows how.
    pub async fn run(&mut self) -> Result<()> {
        self.state = StartupState::Running;

        tracing::info!("vigil background engine starting");
        if self.dev_mode {
            tracing::info!("dev mode on: verbose startup diagnostics");
        }

        self.init_storage().await;

        match self.bring_up_remaining().await {
            Ok(()) => {
                self.state = StartupState::Completed;
                tracing::info!("vigil background engine ready");
                Ok(())
            }
            Err(err) => {
                self.state = StartupState::Aborted;
                Err(err)
            }
        }
    }

    /// The isolated step: storage failure is logged and swallowed.
    async fn init_storage(&self) {
        if let Err(err) = self.storage.initialize().await {
            tracing::error!("storage initialization failed, continuing degraded: {err:#}");
        }
    }

    /// Steps after storage. The first failure aborts the rest.
    async fn bring_up_remaining(&self) -> Result<()> {
        self.aggregator
            .initialize()
            .await
            .context("aggregator initialization failed")?;

        if self.dev_mode {
            tracing::info!("running initial cleanup pass");
        }
        self.cleanup
            .run_once()
            .await
            .context("initial cleanup pass failed")?;
        self.cleanup
            .schedule_recurring()
            .await
            .context("cleanup scheduling failed")?;
        self.cleanup
            .register_trigger()
            .await
            .context("cleanup trigger registration failed")?;

        self.listeners
            .register_tab_listeners()
            .await
            .context("tab listener registration failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};

    /// Shared record of subsystem calls, in invocation order.
    #[derive(Clone, Default)]
    struct CallLog(Arc<Mutex<Vec<&'static str>>>);

    impl CallLog {
        fn push(&self, step: &'static str) {
            self.0.lock().unwrap().push(step);
        }

        fn steps(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Scripted double: records each call and fails on the named step.
    #[derive(Clone)]
    struct Scripted {
        log: CallLog,
        fail_on: Option<&'static str>,
    }

    impl Scripted {
        fn call(&self, step: &'static str) -> Result<()> {
            self.log.push(step);
            match self.fail_on {
                Some(failing) if failing == step => Err(anyhow!("scripted failure at {step}")),
                _ => Ok(()),
            }
        }
    }

    impl Storage for Scripted {
        async fn initialize(&self) -> Result<()> {
            self.call("storage.initialize")
        }
    }

    impl Aggregator for Scripted {
        async fn initialize(&self) -> Result<()> {
            self.call("aggregator.initialize")
        }
    }

    impl Cleanup for Scripted {
        async fn run_once(&self) -> Result<()> {
            self.call("cleanup.run_once")
        }

        async fn schedule_recurring(&self) -> Result<()> {
            self.call("cleanup.schedule_recurring")
        }

        async fn register_trigger(&self) -> Result<()> {
            self.call("cleanup.register_trigger")
        }
    }

    impl Listeners for Scripted {
        async fn register_tab_listeners(&self) -> Result<()> {
            self.call("listeners.register_tab_listeners")
        }
    }

    const FULL_SEQUENCE: [&str; 6] = [
        "storage.initialize",
        "aggregator.initialize",
        "cleanup.run_once",
        "cleanup.schedule_recurring",
        "cleanup.register_trigger",
        "listeners.register_tab_listeners",
    ];

    fn startup_failing_on(
        fail_on: Option<&'static str>,
        dev_mode: bool,
    ) -> (Startup<Scripted, Scripted, Scripted, Scripted>, CallLog) {
        let log = CallLog::default();
        let double = Scripted {
            log: log.clone(),
            fail_on,
        };
        let startup = Startup::new(
            double.clone(),
            double.clone(),
            double.clone(),
            double,
            dev_mode,
        );
        (startup, log)
    }

    #[tokio::test]
    async fn runs_every_step_in_order() {
        let (mut startup, log) = startup_failing_on(None, false);
        assert_eq!(startup.state(), StartupState::NotStarted);

        startup.run().await.unwrap();

        assert_eq!(log.steps(), FULL_SEQUENCE);
        assert_eq!(startup.state(), StartupState::Completed);
    }

    #[tokio::test]
    async fn storage_failure_does_not_stop_the_sequence() {
        let (mut startup, log) = startup_failing_on(Some("storage.initialize"), false);

        startup.run().await.unwrap();

        // Isolation: every later step still ran, and startup completed.
        assert_eq!(log.steps(), FULL_SEQUENCE);
        assert_eq!(startup.state(), StartupState::Completed);
    }

    #[tokio::test]
    async fn aggregator_failure_aborts_before_cleanup() {
        let (mut startup, log) = startup_failing_on(Some("aggregator.initialize"), false);

        let err = startup.run().await.unwrap_err();

        assert!(err.to_string().contains("aggregator initialization failed"));
        assert_eq!(log.steps(), ["storage.initialize", "aggregator.initialize"]);
        assert_eq!(startup.state(), StartupState::Aborted);
    }

    #[tokio::test]
    async fn cleanup_pass_failure_stops_the_remaining_steps() {
        let (mut startup, log) = startup_failing_on(Some("cleanup.run_once"), false);

        startup.run().await.unwrap_err();

        assert_eq!(
            log.steps(),
            [
                "storage.initialize",
                "aggregator.initialize",
                "cleanup.run_once"
            ]
        );
        assert_eq!(startup.state(), StartupState::Aborted);
    }

    #[tokio::test]
    async fn scheduling_failure_leaves_trigger_and_listeners_unregistered() {
        let (mut startup, log) = startup_failing_on(Some("cleanup.schedule_recurring"), false);

        startup.run().await.unwrap_err();

        assert_eq!(log.steps(), &FULL_SEQUENCE[..4]);
        assert_eq!(startup.state(), StartupState::Aborted);
    }

    #[tokio::test]
    async fn trigger_registration_failure_leaves_listeners_unregistered() {
        let (mut startup, log) = startup_failing_on(Some("cleanup.register_trigger"), false);

        startup.run().await.unwrap_err();

        assert_eq!(log.steps(), &FULL_SEQUENCE[..5]);
        assert_eq!(startup.state(), StartupState::Aborted);
    }

    #[tokio::test]
    async fn listener_failure_aborts_after_everything_else_ran() {
        let (mut startup, log) = startup_failing_on(Some("listeners.register_tab_listeners"), false);

        startup.run().await.unwrap_err();

        assert_eq!(log.steps(), FULL_SEQUENCE);
        assert_eq!(startup.state(), StartupState::Aborted);
    }

    // Log-line assertions: the diagnostics are the sequence's only
    // observable output, so pin their shape with a captured subscriber.

    use std::io;

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn lines(&self) -> Vec<String> {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf)
                .lines()
                .map(ToString::to_string)
                .collect()
        }
    }

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    async fn run_with_captured_log(fail_on: Option<&'static str>, dev_mode: bool) -> Vec<String> {
        use tracing::instrument::WithSubscriber;

        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .without_time()
            .with_writer(move || writer.clone())
            .finish();

        let (mut startup, _log) = startup_failing_on(fail_on, dev_mode);
        let _ = async { startup.run().await }
            .with_subscriber(subscriber)
            .await;
        buffer.lines()
    }

    #[tokio::test]
    async fn successful_run_emits_two_base_lines() {
        let lines = run_with_captured_log(None, false).await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("starting"));
        assert!(lines[1].contains("ready"));
        assert!(lines.iter().all(|l| !l.contains("ERROR")));
    }

    #[tokio::test]
    async fn dev_mode_adds_two_diagnostic_lines() {
        let base = run_with_captured_log(None, false).await;
        let dev = run_with_captured_log(None, true).await;
        assert_eq!(dev.len(), base.len() + 2);
        assert!(dev.iter().any(|l| l.contains("dev mode on")));
        assert!(dev.iter().any(|l| l.contains("initial cleanup pass")));
    }

    #[tokio::test]
    async fn storage_failure_adds_exactly_one_error_line() {
        let lines = run_with_captured_log(Some("storage.initialize"), false).await;
        let errors: Vec<_> = lines.iter().filter(|l| l.contains("ERROR")).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("scripted failure at storage.initialize"));
        // Otherwise identical to the fully successful run.
        assert_eq!(lines.len(), 3);
        assert!(lines.last().unwrap().contains("ready"));
    }

    #[tokio::test]
    async fn aborted_run_emits_no_readiness_line() {
        let lines = run_with_captured_log(Some("aggregator.initialize"), true).await;
        assert!(lines.iter().all(|l| !l.contains("ready")));
        assert!(lines.iter().all(|l| !l.contains("cleanup")));
    }
}
