//! SQLite-backed persistence for tab events and usage rollups.
//!
//! The store is constructed cheaply and initialized lazily: [`EventStore::initialize`]
//! opens the database, applies pragmas, and creates the schema. Until then every
//! other operation fails with a "not initialized" error. This split exists so the
//! process can come up even when the backing store cannot - callers that tolerate
//! a degraded store keep running, and their later writes fail individually.
//!
//! # Key Invariant
//!
//! **`initialize` is idempotent.** A second call against an already-open store
//! is a no-op, so callers never need to track whether someone else got there
//! first.

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use vigil_types::{DayStamp, Domain, TabEvent, TabId, UsageBucket};

/// Monotonic sequence number assigned to each recorded event.
pub type EventSeq = i64;

/// A recorded event together with its storage sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub seq: EventSeq,
    pub event: TabEvent,
}

/// Where the backing database lives.
#[derive(Debug)]
enum Location {
    Disk(PathBuf),
    /// Private in-memory database (for testing).
    Memory,
}

/// Event and usage persistence.
///
/// Shared behind `Arc`; all methods take `&self` and serialize access to the
/// single connection internally.
#[derive(Debug)]
pub struct EventStore {
    location: Location,
    db: Mutex<Option<Connection>>,
}

impl EventStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS tab_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            tab_id INTEGER NOT NULL,
            url TEXT,
            recorded_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tab_events_recorded_at
        ON tab_events(recorded_at);

        CREATE TABLE IF NOT EXISTS usage_buckets (
            domain TEXT NOT NULL,
            day TEXT NOT NULL,
            seconds INTEGER NOT NULL,
            PRIMARY KEY (domain, day)
        );
    ";

    /// A store backed by a database file at the given path.
    ///
    /// Nothing is opened yet; see [`EventStore::initialize`].
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            location: Location::Disk(path.as_ref().to_path_buf()),
            db: Mutex::new(None),
        }
    }

    /// A store backed by a private in-memory database (for testing).
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            db: Mutex::new(None),
        }
    }

    /// Open the database, apply pragmas, and create the schema.
    ///
    /// Idempotent: returns Ok without side effects if the store is already
    /// initialized.
    pub async fn initialize(&self) -> Result<()> {
        let mut guard = self.db.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let conn = match &self.location {
            Location::Memory => {
                Connection::open_in_memory().context("Failed to open in-memory event store")?
            }
            Location::Disk(path) => {
                if let Some(parent) = path.parent()
                    && !parent.exists()
                {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create directory: {}", parent.display())
                    })?;
                }
                Connection::open(path)
                    .with_context(|| format!("Failed to open event store at {}", path.display()))?
            }
        };

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .context("Failed to set event store pragmas")?;
        conn.execute_batch(Self::SCHEMA)
            .context("Failed to create event store schema")?;

        *guard = Some(conn);
        tracing::debug!("event store initialized");
        Ok(())
    }

    /// Whether [`EventStore::initialize`] has succeeded.
    pub async fn is_initialized(&self) -> bool {
        self.db.lock().await.is_some()
    }

    /// Append a raw tab event. Returns its sequence number.
    pub async fn record_event(&self, event: &TabEvent) -> Result<EventSeq> {
        let guard = self.db.lock().await;
        let conn = ready(&guard)?;
        conn.execute(
            "INSERT INTO tab_events (kind, tab_id, url, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                event.kind(),
                event.tab().as_i64(),
                event.url(),
                event.at() as i64
            ],
        )
        .context("Failed to record tab event")?;
        Ok(conn.last_insert_rowid())
    }

    /// Events with a sequence number strictly greater than `seq`, in order.
    pub async fn events_since(&self, seq: EventSeq) -> Result<Vec<StoredEvent>> {
        let guard = self.db.lock().await;
        let conn = ready(&guard)?;
        let mut stmt = conn
            .prepare(
                "SELECT seq, kind, tab_id, url, recorded_at FROM tab_events
                 WHERE seq > ?1 ORDER BY seq",
            )
            .context("Failed to prepare event query")?;
        let rows = stmt
            .query_map(params![seq], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .context("Failed to query tab events")?;

        let mut out = Vec::new();
        for row in rows {
            let (seq, kind, tab_id, url, recorded_at) = row.context("Failed to read event row")?;
            let event = decode_event(&kind, tab_id, url, recorded_at)?;
            out.push(StoredEvent { seq, event });
        }
        Ok(out)
    }

    /// Add foreground seconds to a domain's bucket for the given day,
    /// creating the bucket on first write.
    pub async fn add_usage(&self, domain: &Domain, day: DayStamp, seconds: u64) -> Result<()> {
        let guard = self.db.lock().await;
        let conn = ready(&guard)?;
        conn.execute(
            "INSERT INTO usage_buckets (domain, day, seconds) VALUES (?1, ?2, ?3)
             ON CONFLICT(domain, day) DO UPDATE SET seconds = seconds + excluded.seconds",
            params![domain.as_str(), day.to_string(), seconds as i64],
        )
        .context("Failed to upsert usage bucket")?;
        Ok(())
    }

    /// All usage buckets for one day.
    pub async fn usage_for_day(&self, day: DayStamp) -> Result<Vec<UsageBucket>> {
        let guard = self.db.lock().await;
        let conn = ready(&guard)?;
        let mut stmt = conn
            .prepare("SELECT domain, seconds FROM usage_buckets WHERE day = ?1 ORDER BY domain")
            .context("Failed to prepare usage query")?;
        let rows = stmt
            .query_map(params![day.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .context("Failed to query usage buckets")?;

        let mut out = Vec::new();
        for row in rows {
            let (domain, seconds) = row.context("Failed to read usage row")?;
            out.push(UsageBucket {
                domain: Domain::from_stored(domain),
                day,
                seconds: seconds.max(0) as u64,
            });
        }
        Ok(out)
    }

    /// Delete events recorded before `cutoff_at` (unix seconds) and usage
    /// buckets for days before `cutoff_day`. Returns the number of rows
    /// deleted.
    pub async fn prune_before(&self, cutoff_at: u64, cutoff_day: DayStamp) -> Result<u64> {
        let guard = self.db.lock().await;
        let conn = ready(&guard)?;
        let events = conn
            .execute(
                "DELETE FROM tab_events WHERE recorded_at < ?1",
                params![cutoff_at as i64],
            )
            .context("Failed to prune tab events")?;
        let buckets = conn
            .execute(
                "DELETE FROM usage_buckets WHERE day < ?1",
                params![cutoff_day.to_string()],
            )
            .context("Failed to prune usage buckets")?;
        Ok((events + buckets) as u64)
    }
}

fn ready<'a>(guard: &'a tokio::sync::MutexGuard<'_, Option<Connection>>) -> Result<&'a Connection> {
    guard
        .as_ref()
        .ok_or_else(|| anyhow!("event store not initialized"))
}

fn decode_event(kind: &str, tab_id: i64, url: Option<String>, at: i64) -> Result<TabEvent> {
    let tab = TabId::new(tab_id);
    let at = at.max(0) as u64;
    let event = match kind {
        "created" => TabEvent::Created {
            tab,
            url: url.ok_or_else(|| anyhow!("created event row missing url"))?,
            at,
        },
        "activated" => TabEvent::Activated { tab, at },
        "navigated" => TabEvent::Navigated {
            tab,
            url: url.ok_or_else(|| anyhow!("navigated event row missing url"))?,
            at,
        },
        "removed" => TabEvent::Removed { tab, at },
        other => bail!("unknown event kind in store: {other}"),
    };
    Ok(event)
}
