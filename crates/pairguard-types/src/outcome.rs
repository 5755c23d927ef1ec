//! Existence verdicts.

use serde::{Deserialize, Serialize};

use crate::Pair;

/// What the store said about one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Existence {
    /// Confirmed to exist (index membership or a successful store answer).
    Present,
    /// The store answered "not found".
    Absent,
    /// Retries were exhausted on timeouts or transport errors.
    Unknown,
}

impl Existence {
    /// Boolean view used for filtering: anything but `Present` is missing.
    pub fn exists(self) -> bool {
        matches!(self, Existence::Present)
    }
}

/// Per-pair result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub pair: Pair,
    pub primary: Existence,
    pub secondary: Existence,
}

impl ValidationOutcome {
    pub fn primary_exists(&self) -> bool {
        self.primary.exists()
    }

    pub fn secondary_exists(&self) -> bool {
        self.secondary.exists()
    }

    /// Valid iff both members exist.
    pub fn is_valid(&self) -> bool {
        self.primary_exists() && self.secondary_exists()
    }
}
