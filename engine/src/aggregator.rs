//! Per-domain foreground-time aggregation.
//!
//! The aggregator consumes the raw tab-event stream and turns it into daily
//! usage buckets: while a tab is in the foreground, elapsed time accrues to
//! that tab's domain; when the foreground changes (activation, navigation,
//! removal) the open span closes and flushes into storage.
//!
//! Storage failures on the event path are logged and dropped - the dispatch
//! task feeding this type must never die because the store is unhappy. The
//! in-memory day cache keeps accruing regardless, so a recovered store picks
//! up from the next flush.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;

use vigil_store::EventStore;
use vigil_types::{DayStamp, Domain, TabEvent, TabId, UsageBucket};

use crate::subsystems::Aggregator;
use crate::util::now_unix;

/// The tab currently holding the foreground, and since when.
#[derive(Debug, Clone, Copy)]
struct ForegroundSpan {
    tab: TabId,
    since: u64,
}

#[derive(Debug, Default)]
struct AggregatorState {
    /// Latest known domain per open tab. `None` for pages with no
    /// attributable host (about:, chrome:, file:).
    tabs: HashMap<TabId, Option<Domain>>,
    foreground: Option<ForegroundSpan>,
    /// Cache of the current day's buckets, primed at initialization.
    day: Option<DayStamp>,
    seconds: HashMap<Domain, u64>,
}

impl AggregatorState {
    /// Add seconds to the day cache, rolling it over when the day changes.
    fn accrue(&mut self, domain: &Domain, day: DayStamp, seconds: u64) {
        if self.day != Some(day) {
            self.day = Some(day);
            self.seconds.clear();
        }
        *self.seconds.entry(domain.clone()).or_insert(0) += seconds;
    }
}

/// Folds tab events into per-domain daily usage.
#[derive(Debug)]
pub struct UsageAggregator {
    store: Arc<EventStore>,
    state: Mutex<AggregatorState>,
}

impl UsageAggregator {
    #[must_use]
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            state: Mutex::new(AggregatorState::default()),
        }
    }

    /// Prime the day cache from storage.
    ///
    /// An unready store degrades to an empty cache: writes keep failing
    /// individually until storage recovers, but aggregation itself starts.
    pub async fn initialize(&self) -> Result<()> {
        let today = DayStamp::from_unix(now_unix());
        let mut state = self.state.lock().await;
        state.day = Some(today);
        match self.store.usage_for_day(today).await {
            Ok(buckets) => {
                for bucket in buckets {
                    state.seconds.insert(bucket.domain, bucket.seconds);
                }
            }
            Err(err) => {
                tracing::warn!("usage cache not primed, starting empty: {err:#}");
            }
        }
        Ok(())
    }

    /// Fold one event into the running aggregation.
    pub async fn handle_event(&self, event: &TabEvent) {
        let mut state = self.state.lock().await;
        match event {
            TabEvent::Created { tab, url, .. } => {
                state.tabs.insert(*tab, trackable_domain(url));
            }
            TabEvent::Activated { tab, at } => {
                self.close_span(&mut state, *at).await;
                state.foreground = Some(ForegroundSpan {
                    tab: *tab,
                    since: *at,
                });
            }
            TabEvent::Navigated { tab, url, at } => {
                let was_foreground = state
                    .foreground
                    .is_some_and(|span| span.tab == *tab);
                if was_foreground {
                    // Close the span under the old domain before swapping it.
                    self.close_span(&mut state, *at).await;
                }
                state.tabs.insert(*tab, trackable_domain(url));
                if was_foreground {
                    state.foreground = Some(ForegroundSpan {
                        tab: *tab,
                        since: *at,
                    });
                }
            }
            TabEvent::Removed { tab, at } => {
                if state.foreground.is_some_and(|span| span.tab == *tab) {
                    self.close_span(&mut state, *at).await;
                    state.foreground = None;
                }
                state.tabs.remove(tab);
            }
        }
    }

    /// Snapshot of the current day's accumulated usage.
    pub async fn snapshot_today(&self) -> Vec<UsageBucket> {
        let state = self.state.lock().await;
        let Some(day) = state.day else {
            return Vec::new();
        };
        let mut buckets: Vec<UsageBucket> = state
            .seconds
            .iter()
            .map(|(domain, seconds)| UsageBucket {
                domain: domain.clone(),
                day,
                seconds: *seconds,
            })
            .collect();
        buckets.sort_by(|a, b| a.domain.cmp(&b.domain));
        buckets
    }

    /// Close the open foreground span, attributing its elapsed time.
    ///
    /// A span crossing midnight lands wholly on the day it closes -
    /// acceptable imprecision for daily rollups.
    async fn close_span(&self, state: &mut AggregatorState, at: u64) {
        let Some(span) = state.foreground else {
            return;
        };
        let elapsed = at.saturating_sub(span.since);
        if elapsed == 0 {
            return;
        }
        let Some(Some(domain)) = state.tabs.get(&span.tab).cloned() else {
            return;
        };

        let day = DayStamp::from_unix(at);
        state.accrue(&domain, day, elapsed);
        if let Err(err) = self.store.add_usage(&domain, day, elapsed).await {
            tracing::warn!("failed to flush usage for {domain}: {err:#}");
        }
    }
}

fn trackable_domain(url: &str) -> Option<Domain> {
    match Domain::from_url(url) {
        Ok(domain) => Some(domain),
        Err(err) => {
            tracing::debug!("untracked page: {err}");
            None
        }
    }
}

impl Aggregator for UsageAggregator {
    async fn initialize(&self) -> Result<()> {
        UsageAggregator::initialize(self).await
    }
}
