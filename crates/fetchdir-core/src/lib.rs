//! Core domain model for the fetcher directory service.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "fetchdir-core";

/// Mailbox a fetcher polls when none is configured.
pub const DEFAULT_MAILBOX: &str = "inbox";
/// Per-poll time limit (minutes) when none is configured.
pub const DEFAULT_TIME_LIMIT: i64 = 15;

/// Stored fetcher configuration, including its schedules for read purposes.
///
/// Internal field names follow the storage columns; the external JSON names
/// (`name`, `username`) are bridged with serde renames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fetcher {
    pub id: i64,
    #[serde(rename = "name")]
    pub confname: String,
    pub server: String,
    pub description: String,
    #[serde(rename = "username")]
    pub userid: Option<String>,
    pub password: Option<String>,
    pub protocol: Option<String>,
    pub port: Option<i64>,
    pub quick_delete: bool,
    pub active: bool,
    pub uid_validity_key: Option<i64>,
    pub time_limit: i64,
    pub mailbox: String,
    pub domains: Option<String>,
    #[serde(default)]
    pub schedules: Vec<FetcherSchedule>,
}

/// Downtime window attached to a fetcher. `downtime_days` is a string of
/// digits 0-6 (0 = Sunday) naming the days the window applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetcherSchedule {
    pub id: i64,
    pub fetcher_id: i64,
    pub downtime_days: String,
    pub downtime_start: NaiveTime,
    pub downtime_end: NaiveTime,
}

/// Input for creating a fetcher or fully replacing one. Every scalar field is
/// taken unconditionally; optional JSON keys fall back to the column defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFetcher {
    #[serde(rename = "name")]
    pub confname: String,
    pub server: String,
    pub description: String,
    #[serde(default, rename = "username")]
    pub userid: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub port: Option<i64>,
    #[serde(default)]
    pub quick_delete: bool,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub uid_validity_key: Option<i64>,
    #[serde(default = "default_time_limit")]
    pub time_limit: i64,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default)]
    pub domains: Option<String>,
}

/// Input for creating or fully replacing a fetcher schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFetcherSchedule {
    pub fetcher_id: i64,
    pub downtime_days: String,
    pub downtime_start: NaiveTime,
    pub downtime_end: NaiveTime,
}

fn default_active() -> bool {
    true
}

fn default_time_limit() -> i64 {
    DEFAULT_TIME_LIMIT
}

fn default_mailbox() -> String {
    DEFAULT_MAILBOX.to_string()
}

/// Sparse-update wrapper distinguishing a JSON key that was never sent from
/// one that was sent with any value, including `null`, `false`, or `0`.
///
/// A missing key deserializes to `Absent` (via `#[serde(default)]` on the
/// containing struct); a present key always deserializes its value into
/// `Set`, so `Patch<Option<T>>` turns an explicit `null` into `Set(None)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Patch<T> {
    Absent,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Overwrite `target` when a value was provided, leave it untouched
    /// otherwise.
    pub fn apply_to(self, target: &mut T) {
        if let Self::Set(value) = self {
            *target = value;
        }
    }
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Self::Absent
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Patch::Set)
    }
}

/// Partial update for a fetcher's direct scalar fields. Relationships are not
/// patchable. Nullable columns use `Patch<Option<T>>` so an explicit `null`
/// clears them while a missing key leaves them alone.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FetcherPatch {
    #[serde(default, rename = "name")]
    pub confname: Patch<String>,
    #[serde(default)]
    pub server: Patch<String>,
    #[serde(default)]
    pub description: Patch<String>,
    #[serde(default, rename = "username")]
    pub userid: Patch<Option<String>>,
    #[serde(default)]
    pub password: Patch<Option<String>>,
    #[serde(default)]
    pub protocol: Patch<Option<String>>,
    #[serde(default)]
    pub port: Patch<Option<i64>>,
    #[serde(default)]
    pub quick_delete: Patch<bool>,
    #[serde(default)]
    pub active: Patch<bool>,
    #[serde(default)]
    pub uid_validity_key: Patch<Option<i64>>,
    #[serde(default)]
    pub time_limit: Patch<i64>,
    #[serde(default)]
    pub mailbox: Patch<String>,
    #[serde(default)]
    pub domains: Patch<Option<String>>,
}

impl FetcherPatch {
    /// Apply every provided field onto `fetcher`; absent fields keep their
    /// current values.
    pub fn merge_into(self, fetcher: &mut Fetcher) {
        self.confname.apply_to(&mut fetcher.confname);
        self.server.apply_to(&mut fetcher.server);
        self.description.apply_to(&mut fetcher.description);
        self.userid.apply_to(&mut fetcher.userid);
        self.password.apply_to(&mut fetcher.password);
        self.protocol.apply_to(&mut fetcher.protocol);
        self.port.apply_to(&mut fetcher.port);
        self.quick_delete.apply_to(&mut fetcher.quick_delete);
        self.active.apply_to(&mut fetcher.active);
        self.uid_validity_key.apply_to(&mut fetcher.uid_validity_key);
        self.time_limit.apply_to(&mut fetcher.time_limit);
        self.mailbox.apply_to(&mut fetcher.mailbox);
        self.domains.apply_to(&mut fetcher.domains);
    }
}
