//! The abstract grid model shared by every conflict-resolution policy.
//!
//! A policy owns one replica of a grid document. All mutation entry points
//! take positions, apply locally and return immediately; each successful
//! call produces exactly one update for the transport to carry. Updates from
//! other replicas are integrated with [`GridPolicy::apply_remote`].

use crate::error::Result;
use crate::view::Grid;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Which structural conflict-resolution policy a document runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// Rows and columns addressed by index only.
    Positional,
    /// Stable identities with the keep/veto arbiter.
    Keep,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Positional => write!(f, "positional"),
            PolicyKind::Keep => write!(f, "keep"),
        }
    }
}

/// One replica of a collaboratively edited grid.
pub trait GridPolicy: Send + Sync {
    /// A replicated transaction.
    type Update: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync;

    fn kind(&self) -> PolicyKind;

    fn replica_id(&self) -> &str;

    /// Create the default document. Does nothing on a seeded document.
    fn seed(&mut self);

    /// Whether the document holds any state yet.
    fn is_seeded(&self) -> bool;

    /// Write a cell value at a position.
    fn edit_cell(&mut self, row: usize, col: usize, value: &str) -> Result<()>;

    /// Write a column label at a position.
    fn edit_label(&mut self, col: usize, value: &str) -> Result<()>;

    /// Insert an empty row so that it lands at index `at`.
    fn insert_row(&mut self, at: usize) -> Result<()>;

    /// Insert a column with the default label at index `at`.
    fn insert_col(&mut self, at: usize) -> Result<()>;

    fn delete_row(&mut self, at: usize) -> Result<()>;

    fn delete_col(&mut self, at: usize) -> Result<()>;

    /// The projection as of the last change.
    fn grid(&self) -> &Grid;

    /// A freshly computed projection.
    fn materialize(&self) -> Grid;

    /// Drain updates produced since the last call.
    fn take_updates(&mut self) -> Vec<Self::Update>;

    /// Integrate one update from another replica.
    ///
    /// Returns whether the projected grid changed.
    fn apply_remote(&mut self, update: &Self::Update) -> bool;

    fn encode_update(update: &Self::Update) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(update)?)
    }

    fn decode_update(bytes: &[u8]) -> Result<Self::Update> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode and integrate one update.
    fn apply_encoded(&mut self, bytes: &[u8]) -> Result<bool> {
        let update = Self::decode_update(bytes)?;
        Ok(self.apply_remote(&update))
    }

    /// Drain and encode pending updates.
    fn take_encoded(&mut self) -> Result<Vec<Vec<u8>>> {
        self.take_updates()
            .iter()
            .map(|update| Self::encode_update(update))
            .collect()
    }
}
