//! Lamport stamps - the causal timestamps of every replicated operation.
//!
//! A stamp pairs a Lamport time with the replica that produced it. Stamps are
//! totally ordered by `(lamport, replica)`, which gives every container in
//! this crate the same deterministic tie-break for concurrent operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique identifier for an operation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub lamport: u64,
    pub replica: String,
}

impl Stamp {
    pub fn new(lamport: u64, replica: impl Into<String>) -> Self {
        Self {
            lamport,
            replica: replica.into(),
        }
    }

    /// The stamp of the virtual sequence head. Never produced by a clock.
    pub fn genesis() -> Self {
        Self {
            lamport: 0,
            replica: String::new(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.lamport == 0 && self.replica.is_empty()
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.lamport, self.replica)
    }
}

/// Lamport clock owned by one replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LamportClock {
    replica: String,
    time: u64,
}

impl LamportClock {
    pub fn new(replica: impl Into<String>) -> Self {
        Self {
            replica: replica.into(),
            time: 0,
        }
    }

    pub fn replica(&self) -> &str {
        &self.replica
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    /// Produce a stamp later than everything this clock has seen.
    pub fn tick(&mut self) -> Stamp {
        self.time += 1;
        Stamp::new(self.time, self.replica.clone())
    }

    /// Advance past a stamp received from elsewhere.
    pub fn observe(&mut self, stamp: &Stamp) {
        self.time = self.time.max(stamp.lamport);
    }
}
