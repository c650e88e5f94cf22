//! Tab lifecycle events as delivered by the host bridge.

use serde::{Deserialize, Serialize};

/// Host-assigned identifier for a browser tab.
///
/// Opaque to Vigil: the host allocates it and guarantees uniqueness for the
/// lifetime of the tab, nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(i64);

impl TabId {
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single tab lifecycle event.
///
/// This is the bridge wire format: the host serializes one of these per
/// event, tagged by `kind`. Timestamps are unix seconds as reported by the
/// host, not by Vigil's own clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TabEvent {
    /// A tab was opened with an initial URL.
    Created { tab: TabId, url: String, at: u64 },
    /// A tab became the foreground tab of its window.
    Activated { tab: TabId, at: u64 },
    /// A tab committed a navigation to a new URL.
    Navigated { tab: TabId, url: String, at: u64 },
    /// A tab was closed.
    Removed { tab: TabId, at: u64 },
}

impl TabEvent {
    /// Stable kind label, used as the storage discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            TabEvent::Created { .. } => "created",
            TabEvent::Activated { .. } => "activated",
            TabEvent::Navigated { .. } => "navigated",
            TabEvent::Removed { .. } => "removed",
        }
    }

    #[must_use]
    pub const fn tab(&self) -> TabId {
        match self {
            TabEvent::Created { tab, .. }
            | TabEvent::Activated { tab, .. }
            | TabEvent::Navigated { tab, .. }
            | TabEvent::Removed { tab, .. } => *tab,
        }
    }

    /// Host timestamp in unix seconds.
    #[must_use]
    pub const fn at(&self) -> u64 {
        match self {
            TabEvent::Created { at, .. }
            | TabEvent::Activated { at, .. }
            | TabEvent::Navigated { at, .. }
            | TabEvent::Removed { at, .. } => *at,
        }
    }

    /// The URL carried by the event, if the kind has one.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            TabEvent::Created { url, .. } | TabEvent::Navigated { url, .. } => Some(url),
            TabEvent::Activated { .. } | TabEvent::Removed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_parses_tagged_json() {
        // The exact shape the host bridge emits, one object per line.
        let line = r#"{"kind":"navigated","tab":7,"url":"https://example.com/a","at":1700000000}"#;
        let event: TabEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            event,
            TabEvent::Navigated {
                tab: TabId::new(7),
                url: "https://example.com/a".to_string(),
                at: 1_700_000_000,
            }
        );
    }

    #[test]
    fn kind_labels_are_stable() {
        let removed = TabEvent::Removed {
            tab: TabId::new(1),
            at: 0,
        };
        assert_eq!(removed.kind(), "removed");
        assert_eq!(removed.url(), None);
    }

    #[test]
    fn accessors_cover_every_variant() {
        let created = TabEvent::Created {
            tab: TabId::new(3),
            url: "https://example.com".to_string(),
            at: 42,
        };
        assert_eq!(created.tab(), TabId::new(3));
        assert_eq!(created.at(), 42);
        assert_eq!(created.url(), Some("https://example.com"));
    }
}
