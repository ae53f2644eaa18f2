//! Change notifications delivered by a configuration watch.

use serde::{Deserialize, Serialize};

/// Kind of change observed on a child of the watched configuration path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    ChildAdded,
    ChildUpdated,
    ChildRemoved,
}

impl ChangeKind {
    /// All change kinds, in declaration order.
    pub const ALL: [ChangeKind; 3] = [
        ChangeKind::ChildAdded,
        ChangeKind::ChildUpdated,
        ChangeKind::ChildRemoved,
    ];

    fn bit(self) -> u8 {
        match self {
            Self::ChildAdded => 0b001,
            Self::ChildUpdated => 0b010,
            Self::ChildRemoved => 0b100,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChildAdded => write!(f, "child_added"),
            Self::ChildUpdated => write!(f, "child_updated"),
            Self::ChildRemoved => write!(f, "child_removed"),
        }
    }
}

/// A single change event for one child entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Child name, i.e. the configuration key.
    pub key: String,
    /// Raw child payload. Empty for removals. May hold credentials - never log.
    pub payload: Vec<u8>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            key: key.into(),
            payload: payload.into(),
        }
    }

    /// Payload decoded as UTF-8, replacing invalid sequences.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// The set of change kinds that cause the data source to reload.
///
/// Defaults to `ChildUpdated` only: the configuration set is treated as fixed
/// in shape, so a brand-new key does not trigger a reload unless
/// `ChildAdded` is included here.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ReloadTriggers(u8);

impl ReloadTriggers {
    pub const fn none() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0b111)
    }

    pub fn with(mut self, kind: ChangeKind) -> Self {
        self.0 |= kind.bit();
        self
    }

    pub fn contains(&self, kind: ChangeKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn kinds(&self) -> impl Iterator<Item = ChangeKind> + '_ {
        ChangeKind::ALL.into_iter().filter(|k| self.contains(*k))
    }
}

impl Default for ReloadTriggers {
    fn default() -> Self {
        Self::none().with(ChangeKind::ChildUpdated)
    }
}

impl FromIterator<ChangeKind> for ReloadTriggers {
    fn from_iter<I: IntoIterator<Item = ChangeKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::none(), Self::with)
    }
}

impl std::fmt::Debug for ReloadTriggers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.kinds()).finish()
    }
}
