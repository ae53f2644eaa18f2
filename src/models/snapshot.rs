//! Immutable configuration snapshots read from the coordination store.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A fully-read copy of every key/value child under a configuration path.
///
/// Snapshots are never mutated; a change in the store produces a new snapshot.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    path: String,
    entries: BTreeMap<String, String>,
    read_at: DateTime<Utc>,
}

impl ConfigSnapshot {
    pub fn new(path: impl Into<String>, entries: BTreeMap<String, String>) -> Self {
        Self {
            path: path.into(),
            entries,
            read_at: Utc::now(),
        }
    }

    /// Build a snapshot from `(key, value)` pairs. Later duplicates win.
    pub fn from_pairs<K, V, I>(path: impl Into<String>, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::new(
            path,
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// The configuration path this snapshot was read from.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// When the snapshot was read.
    pub fn read_at(&self) -> DateTime<Utc> {
        self.read_at
    }

    /// True if both snapshots hold the same entries, ignoring read time.
    pub fn same_entries(&self, other: &ConfigSnapshot) -> bool {
        self.entries == other.entries
    }
}

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.contains("password") || lower.contains("secret")
}

impl std::fmt::Debug for ConfigSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked: BTreeMap<&str, &str> = self
            .entries
            .iter()
            .map(|(k, v)| {
                let value = if is_secret_key(k) { "****" } else { v.as_str() };
                (k.as_str(), value)
            })
            .collect();
        f.debug_struct("ConfigSnapshot")
            .field("path", &self.path)
            .field("entries", &masked)
            .field("read_at", &self.read_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConfigSnapshot {
        ConfigSnapshot::from_pairs(
            "/datasource",
            [
                ("driverClassName", "org.drv.X"),
                ("dbJDBCUrl", "jdbc:x://h/db"),
                ("username", "u"),
                ("password", "p"),
            ],
        )
    }

    #[test]
    fn test_snapshot_accessors() {
        let snapshot = sample();
        assert_eq!(snapshot.path(), "/datasource");
        assert_eq!(snapshot.get("username"), Some("u"));
        assert_eq!(snapshot.get("missing"), None);
        assert_eq!(snapshot.len(), 4);
        assert!(snapshot.contains_key("dbJDBCUrl"));
    }

    #[test]
    fn test_debug_masks_password() {
        let rendered = format!("{:?}", sample());
        assert!(rendered.contains("****"));
        assert!(!rendered.contains("\"p\""));
        assert!(rendered.contains("org.drv.X"));
    }

    #[test]
    fn test_same_entries_ignores_read_time() {
        let a = sample();
        let b = sample();
        assert!(a.same_entries(&b));

        let c = ConfigSnapshot::from_pairs("/datasource", [("username", "u2")]);
        assert!(!a.same_entries(&c));
    }
}
