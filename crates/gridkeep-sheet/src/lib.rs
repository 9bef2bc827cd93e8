//! # gridkeep-sheet
//!
//! Structural conflict resolution for a collaboratively edited spreadsheet.
//!
//! Two policies implement the same [`GridPolicy`] model:
//! - [`PositionalSheet`] addresses rows and columns by index only. Concurrent
//!   deletes silently win and concurrent structural edits can leave rows ragged.
//! - [`KeepSheet`] gives every row and column a stable identity. An edit that
//!   races with the deletion of its row or column vetoes that deletion, and
//!   the row or column comes back in place with the edit intact.
//!
//! ## Example
//!
//! ```rust
//! use gridkeep_sheet::{GridPolicy, KeepSheet};
//!
//! let mut alice = KeepSheet::new("alice");
//! let mut bob = KeepSheet::new("bob");
//!
//! alice.seed();
//! for update in alice.take_updates() {
//!     bob.apply_remote(&update);
//! }
//!
//! // Concurrent: alice writes into column B, bob deletes column B
//! alice.edit_cell(0, 1, "hello").unwrap();
//! bob.delete_col(1).unwrap();
//!
//! for update in alice.take_updates() {
//!     bob.apply_remote(&update);
//! }
//! for update in bob.take_updates() {
//!     alice.apply_remote(&update);
//! }
//!
//! assert_eq!(alice.grid(), bob.grid());
//! assert_eq!(alice.grid().cell(0, 1), Some("hello"));
//! ```

pub mod arbiter;
pub mod cells;
pub mod config;
pub mod error;
pub mod ids;
pub mod keep;
pub mod policy;
pub mod positional;
pub mod tracker;
pub mod view;

pub use arbiter::{KeepArbiter, Reconciliation, TouchOp, TouchSet};
pub use cells::{CellKey, CellOp, CellStore};
pub use config::{SheetConfig, SheetConfigBuilder};
pub use error::{Result, SheetError};
pub use ids::{Axis, ColId, Identity, RowId};
pub use keep::{KeepOp, KeepSheet, KeepUpdate};
pub use policy::{GridPolicy, PolicyKind};
pub use positional::{PositionalOp, PositionalSheet, PositionalUpdate};
pub use tracker::{
    Reversal, StructuralOp, StructuralTracker, Transaction, TransactionId, TransactionKind,
};
pub use view::{column_indicator, materialize, resolve_position, Grid};
