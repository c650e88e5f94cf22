//! Usage aggregation keys: domains and day buckets.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Why a URL could not be reduced to a trackable domain.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("not a valid URL: {0}")]
    Invalid(String),
    /// chrome://, about:, file: and friends carry no host to attribute.
    #[error("URL has no host: {0}")]
    NoHost(String),
}

/// The host a usage bucket is keyed by, extracted from a page URL.
///
/// Normalized at the boundary: lowercased, leading `www.` stripped. Invalid
/// or host-less URLs are rejected here so the rest of the system never sees
/// an unattributable domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    /// Extract the domain from a page URL.
    pub fn from_url(raw: &str) -> Result<Self, DomainError> {
        let url = Url::parse(raw).map_err(|_| DomainError::Invalid(raw.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| DomainError::NoHost(raw.to_string()))?;
        let host = host.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        if host.is_empty() {
            return Err(DomainError::NoHost(raw.to_string()));
        }
        Ok(Self(host.to_string()))
    }

    /// Wrap an already-normalized domain (e.g. read back from storage).
    #[must_use]
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A UTC calendar day, the bucket key for usage rollups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayStamp(NaiveDate);

impl DayStamp {
    /// The UTC day containing the given unix-seconds timestamp.
    ///
    /// Timestamps outside chrono's representable range clamp to the epoch
    /// day; the host clock would have to be broken for that to happen.
    #[must_use]
    pub fn from_unix(secs: u64) -> Self {
        let date = DateTime::from_timestamp(secs as i64, 0)
            .map(|dt| dt.date_naive())
            .unwrap_or_else(epoch);
        Self(date)
    }

    /// Parse the storage form (`YYYY-MM-DD`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        raw.parse::<NaiveDate>().ok().map(Self)
    }

    /// The day `days` before this one, saturating at the epoch.
    #[must_use]
    pub fn days_earlier(self, days: u32) -> Self {
        let earlier = self
            .0
            .checked_sub_signed(chrono::Duration::days(i64::from(days)))
            .unwrap_or_else(epoch);
        Self(earlier.max(epoch()))
    }
}

impl std::fmt::Display for DayStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // NaiveDate's Display is already YYYY-MM-DD, the storage form.
        write!(f, "{}", self.0)
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date is valid")
}

/// Accumulated foreground time for one domain on one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageBucket {
    pub domain: Domain,
    pub day: DayStamp,
    pub seconds: u64,
}
