//! Identity allocation for rows and columns.
//!
//! Row and column identities are opaque ULID strings minted locally without
//! any coordination; 80 random bits per id make collisions across replicas
//! negligible. An identity never encodes or implies a position.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use ulid::Ulid;

/// One of the two structural axes of the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Row,
    Col,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Row => write!(f, "row"),
            Axis::Col => write!(f, "column"),
        }
    }
}

/// An opaque, never-reused identity of a row or column.
pub trait Identity:
    Clone + fmt::Debug + fmt::Display + PartialEq + Eq + PartialOrd + Ord + Hash
{
    /// The axis this identity belongs to.
    const AXIS: Axis;

    /// Mint a fresh identity.
    fn new_id() -> Self;

    fn as_str(&self) -> &str;
}

/// Identity of a row.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(String);

impl RowId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Wrap an identity received from elsewhere.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl Default for RowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Identity for RowId {
    const AXIS: Axis = Axis::Row;

    fn new_id() -> Self {
        Self::new()
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity of a column.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColId(String);

impl ColId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Wrap an identity received from elsewhere.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl Default for ColId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ColId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Identity for ColId {
    const AXIS: Axis = Axis::Col;

    fn new_id() -> Self {
        Self::new()
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}
