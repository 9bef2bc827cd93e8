//! Identity-with-keep policy.
//!
//! Rows and columns are stable identities held in two replicated sequences;
//! cells and labels are keyed by identity. A deletion that races with an
//! edit inside the deleted row or column is vetoed by the arbiter and the
//! row or column comes back in place, with the edit intact.

use crate::arbiter::{KeepArbiter, Reconciliation, TouchOp};
use crate::cells::{CellKey, CellOp, CellStore};
use crate::config::SheetConfig;
use crate::error::{check_gap, Result};
use crate::ids::{ColId, Identity, RowId};
use crate::policy::{GridPolicy, PolicyKind};
use crate::tracker::{StructuralOp, StructuralTracker, TransactionKind};
use crate::view::{self, Grid};
use gridkeep_core::{IdSequence, SeqOp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A primitive op inside a keep transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum KeepOp {
    Rows(SeqOp<RowId>),
    Cols(SeqOp<ColId>),
    Cells(CellOp),
    RowTouch(TouchOp<RowId>),
    ColTouch(TouchOp<ColId>),
}

/// One transaction of the keep policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeepUpdate {
    /// Replica that issued the transaction.
    pub origin: String,
    /// Position in the issuing replica's stream of updates.
    pub seq: u64,
    pub ops: Vec<KeepOp>,
}

/// A grid replica running the identity-with-keep policy.
#[derive(Clone, Debug)]
pub struct KeepSheet {
    replica_id: String,
    config: SheetConfig,
    rows: IdSequence<RowId>,
    cols: IdSequence<ColId>,
    cells: CellStore,
    arbiter: KeepArbiter,
    row_tracker: StructuralTracker<RowId>,
    col_tracker: StructuralTracker<ColId>,
    /// Local update counter.
    seq: u64,
    outbox: Vec<KeepUpdate>,
    /// Cached projection.
    grid: Grid,
}

impl KeepSheet {
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self::with_config(replica_id, SheetConfig::default())
    }

    pub fn with_config(replica_id: impl Into<String>, config: SheetConfig) -> Self {
        let replica_id = replica_id.into();
        let mut row_tracker = StructuralTracker::new(replica_id.clone());
        let mut col_tracker = StructuralTracker::new(replica_id.clone());
        row_tracker.set_max_history(config.max_history);
        col_tracker.set_max_history(config.max_history);

        Self {
            rows: IdSequence::new(replica_id.clone()),
            cols: IdSequence::new(replica_id.clone()),
            cells: CellStore::new(replica_id.clone()),
            arbiter: KeepArbiter::new(replica_id.clone()),
            row_tracker,
            col_tracker,
            replica_id,
            config,
            seq: 0,
            outbox: Vec::new(),
            grid: Grid::default(),
        }
    }

    pub fn config(&self) -> &SheetConfig {
        &self.config
    }

    pub fn rows(&self) -> &IdSequence<RowId> {
        &self.rows
    }

    pub fn cols(&self) -> &IdSequence<ColId> {
        &self.cols
    }

    pub fn cells(&self) -> &CellStore {
        &self.cells
    }

    pub fn arbiter(&self) -> &KeepArbiter {
        &self.arbiter
    }

    pub fn row_tracker(&self) -> &StructuralTracker<RowId> {
        &self.row_tracker
    }

    pub fn col_tracker(&self) -> &StructuralTracker<ColId> {
        &self.col_tracker
    }

    /// Visible row identities in order.
    pub fn row_ids(&self) -> Vec<RowId> {
        view::identities(&self.rows)
    }

    /// Visible column identities in order.
    pub fn col_ids(&self) -> Vec<ColId> {
        view::identities(&self.cols)
    }

    pub fn resolve_position(&self, row: usize, col: usize) -> Result<(RowId, ColId)> {
        view::resolve_position(&self.rows, &self.cols, row, col)
    }

    pub fn position_of(&self, row: &RowId, col: &ColId) -> Result<(usize, usize)> {
        view::position_of(&self.rows, &self.cols, row, col)
    }

    /// Cell and label entries that are no longer projected.
    pub fn orphaned_keys(&self) -> Vec<CellKey> {
        self.cells.orphaned_keys(&self.rows, &self.cols)
    }

    /// Package every pending container op into one update.
    fn commit(&mut self) {
        let mut ops: Vec<KeepOp> = Vec::new();
        ops.extend(self.cols.take_delta().into_iter().map(KeepOp::Cols));
        ops.extend(self.rows.take_delta().into_iter().map(KeepOp::Rows));
        ops.extend(self.cells.take_delta().into_iter().map(KeepOp::Cells));
        ops.extend(self.arbiter.rows.take_delta().into_iter().map(KeepOp::RowTouch));
        ops.extend(self.arbiter.cols.take_delta().into_iter().map(KeepOp::ColTouch));

        if !ops.is_empty() {
            self.seq += 1;
            debug!(replica = %self.replica_id, seq = self.seq, ops = ops.len(), "committed update");
            self.outbox.push(KeepUpdate {
                origin: self.replica_id.clone(),
                seq: self.seq,
                ops,
            });
        }
        self.refresh();
    }

    /// Recompute the cached projection; returns whether it changed.
    fn refresh(&mut self) -> bool {
        let grid = self.materialize();
        if grid == self.grid {
            return false;
        }
        self.grid = grid;
        true
    }

    fn reconcile_rows(&mut self, arrived: &[RowId]) -> Reconciliation<RowId> {
        self.arbiter
            .rows
            .reconcile(arrived, &mut self.rows, &mut self.row_tracker)
    }

    fn reconcile_cols(&mut self, arrived: &[ColId]) -> Reconciliation<ColId> {
        self.arbiter
            .cols
            .reconcile(arrived, &mut self.cols, &mut self.col_tracker)
    }
}

/// Remove every visible element holding `id` and describe the removals.
fn remove_identity<I: Identity>(sequence: &mut IdSequence<I>, id: &I) -> Vec<StructuralOp<I>> {
    let mut removed = Vec::new();
    for element in sequence.visible_elements_of(id) {
        let Some(index) = sequence.index_of_element(&element) else {
            continue;
        };
        if sequence.remove_element(&element).is_some() {
            removed.push(StructuralOp::Removed {
                element,
                id: id.clone(),
                index,
            });
        }
    }
    removed
}

fn insert_identity<I: Identity>(sequence: &mut IdSequence<I>, at: usize, id: &I) -> StructuralOp<I> {
    let op = sequence.insert(at, id.clone());
    StructuralOp::Inserted {
        element: op.stamp().clone(),
        id: id.clone(),
    }
}

impl GridPolicy for KeepSheet {
    type Update = KeepUpdate;

    fn kind(&self) -> PolicyKind {
        PolicyKind::Keep
    }

    fn replica_id(&self) -> &str {
        &self.replica_id
    }

    fn seed(&mut self) {
        if self.is_seeded() {
            return;
        }

        let mut inserted_cols = Vec::new();
        for at in 0..self.config.initial_cols {
            let col = ColId::new();
            self.cells.set_label(&col, &self.config.default_label);
            inserted_cols.push(insert_identity(&mut self.cols, at, &col));
        }
        let mut inserted_rows = Vec::new();
        for at in 0..self.config.initial_rows {
            inserted_rows.push(insert_identity(&mut self.rows, at, &RowId::new()));
        }
        self.col_tracker.record(inserted_cols);
        self.row_tracker.record(inserted_rows);

        info!(
            replica = %self.replica_id,
            rows = self.config.initial_rows,
            cols = self.config.initial_cols,
            "seeded default grid"
        );
        self.commit();
    }

    fn is_seeded(&self) -> bool {
        !self.rows.is_empty() || !self.cols.is_empty() || !self.cells.is_empty()
    }

    fn edit_cell(&mut self, row: usize, col: usize, value: &str) -> Result<()> {
        let (row_id, col_id) = self.resolve_position(row, col)?;
        if self.cells.set_cell(&row_id, &col_id, value).is_none() {
            return Ok(());
        }
        self.arbiter.touch_cell(&row_id, &col_id);
        self.commit();
        Ok(())
    }

    fn edit_label(&mut self, col: usize, value: &str) -> Result<()> {
        let col_id = view::resolve_index(&self.cols, col)?;
        self.cells.set_label(&col_id, value);
        self.arbiter.touch_label(&col_id);
        self.commit();
        Ok(())
    }

    fn insert_row(&mut self, at: usize) -> Result<()> {
        check_gap(RowId::AXIS, at, self.rows.len())?;
        let op = insert_identity(&mut self.rows, at, &RowId::new());
        self.row_tracker.record(vec![op]);
        self.commit();
        Ok(())
    }

    fn insert_col(&mut self, at: usize) -> Result<()> {
        check_gap(ColId::AXIS, at, self.cols.len())?;
        let col = ColId::new();
        self.cells.set_label(&col, &self.config.default_label);
        let op = insert_identity(&mut self.cols, at, &col);
        self.col_tracker.record(vec![op]);
        self.commit();
        Ok(())
    }

    fn delete_row(&mut self, at: usize) -> Result<()> {
        let row = view::resolve_index(&self.rows, at)?;
        self.arbiter.rows.forget(&row);
        let removed = remove_identity(&mut self.rows, &row);
        let kind = self.row_tracker.record(removed);
        debug_assert_eq!(kind, TransactionKind::RemoveOnly);
        debug!(replica = %self.replica_id, %row, at, "deleted row");
        self.commit();
        Ok(())
    }

    fn delete_col(&mut self, at: usize) -> Result<()> {
        let col = view::resolve_index(&self.cols, at)?;
        self.arbiter.cols.forget(&col);
        let removed = remove_identity(&mut self.cols, &col);
        let kind = self.col_tracker.record(removed);
        debug_assert_eq!(kind, TransactionKind::RemoveOnly);
        debug!(replica = %self.replica_id, %col, at, "deleted column");
        self.commit();
        Ok(())
    }

    fn grid(&self) -> &Grid {
        &self.grid
    }

    fn materialize(&self) -> Grid {
        view::materialize(&self.rows, &self.cols, &self.cells)
    }

    fn take_updates(&mut self) -> Vec<KeepUpdate> {
        std::mem::take(&mut self.outbox)
    }

    fn apply_remote(&mut self, update: &KeepUpdate) -> bool {
        if update.origin == self.replica_id {
            return false;
        }

        let mut arrived_rows = Vec::new();
        let mut arrived_cols = Vec::new();
        for op in &update.ops {
            match op {
                KeepOp::Rows(op) => {
                    self.rows.apply(op);
                }
                KeepOp::Cols(op) => {
                    self.cols.apply(op);
                }
                KeepOp::Cells(op) => {
                    self.cells.apply(op);
                }
                KeepOp::RowTouch(op) => {
                    if self.arbiter.rows.apply(op) {
                        arrived_rows.push(op.key.clone());
                    }
                }
                KeepOp::ColTouch(op) => {
                    if self.arbiter.cols.apply(op) {
                        arrived_cols.push(op.key.clone());
                    }
                }
            }
        }
        debug!(
            replica = %self.replica_id,
            origin = %update.origin,
            seq = update.seq,
            ops = update.ops.len(),
            "applied remote update"
        );

        if arrived_rows.is_empty() && arrived_cols.is_empty() {
            return self.refresh();
        }

        let before = self.grid.clone();
        if !arrived_rows.is_empty() {
            let outcome = self.reconcile_rows(&arrived_rows);
            if outcome.restored_any() {
                info!(replica = %self.replica_id, rows = outcome.vetoed.len(), "kept rows deleted concurrently with edits");
            }
        }
        if !arrived_cols.is_empty() {
            let outcome = self.reconcile_cols(&arrived_cols);
            if outcome.restored_any() {
                info!(replica = %self.replica_id, cols = outcome.vetoed.len(), "kept columns deleted concurrently with edits");
            }
        }
        self.commit();
        self.grid != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SheetError;

    fn sync(from: &mut KeepSheet, to: &mut KeepSheet) {
        for update in from.take_updates() {
            to.apply_remote(&update);
        }
    }

    fn pair() -> (KeepSheet, KeepSheet) {
        let mut a = KeepSheet::new("a");
        let mut b = KeepSheet::new("b");
        a.seed();
        sync(&mut a, &mut b);
        (a, b)
    }

    #[test]
    fn test_seed_default_grid() {
        let mut sheet = KeepSheet::new("a");
        assert!(!sheet.is_seeded());
        sheet.seed();

        let grid = sheet.grid();
        assert_eq!(grid.row_count(), 3);
        assert_eq!(grid.col_count(), 3);
        assert_eq!(grid.header(2), Some("XYZ"));
        assert_eq!(sheet.take_updates().len(), 1);
        assert_eq!(sheet.row_tracker().history_len(), 0);

        sheet.seed();
        assert!(sheet.take_updates().is_empty());
    }

    #[test]
    fn test_edit_cell_touches_row_and_col() {
        let (mut a, _) = pair();
        a.edit_cell(1, 2, "v").unwrap();

        let (row, col) = a.resolve_position(1, 2).unwrap();
        assert!(a.arbiter().rows.is_touched(&row));
        assert!(a.arbiter().cols.is_touched(&col));
        assert_eq!(a.grid().cell(1, 2), Some("v"));
    }

    #[test]
    fn test_empty_blur_writes_nothing() {
        let (mut a, _) = pair();
        a.take_updates();
        a.edit_cell(0, 0, "").unwrap();

        assert!(a.take_updates().is_empty());
        assert!(a.arbiter().rows.is_empty());
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let (mut a, _) = pair();
        a.take_updates();
        let before = a.grid().clone();

        assert!(matches!(
            a.delete_row(3),
            Err(SheetError::IndexOutOfBounds { index: 3, length: 3, .. })
        ));
        assert!(a.edit_cell(0, 9, "x").is_err());
        assert!(a.insert_col(4).is_err());
        assert!(a.insert_col(3).is_ok());

        assert_eq!(a.grid().row_count(), before.row_count());
    }

    #[test]
    fn test_delete_forgets_own_marker() {
        let (mut a, _) = pair();
        a.edit_cell(0, 0, "x").unwrap();
        let (row, _) = a.resolve_position(0, 0).unwrap();

        a.delete_row(0).unwrap();
        assert!(!a.arbiter().rows.is_touched(&row));
        assert!(a.row_tracker().can_reverse(&row));
    }

    #[test]
    fn test_own_echo_is_ignored() {
        let (mut a, _) = pair();
        a.delete_row(0).unwrap();
        let updates = a.take_updates();
        for update in &updates {
            assert!(!a.apply_remote(update));
        }
        assert_eq!(a.grid().row_count(), 2);
    }

    #[test]
    fn test_concurrent_edit_keeps_deleted_column() {
        let (mut a, mut b) = pair();

        a.edit_cell(0, 1, "hello").unwrap();
        b.delete_col(1).unwrap();

        sync(&mut a, &mut b);
        sync(&mut b, &mut a);
        sync(&mut a, &mut b);

        for sheet in [&a, &b] {
            let grid = sheet.grid();
            assert_eq!(grid.col_count(), 3);
            assert_eq!(grid.header(1), Some("XYZ"));
            assert_eq!(grid.cell(0, 1), Some("hello"));
        }
        assert_eq!(a.grid(), b.grid());
        assert!(a.arbiter().cols.is_empty());
        assert!(b.arbiter().cols.is_empty());
    }

    #[test]
    fn test_untouched_delete_sticks() {
        let (mut a, mut b) = pair();

        a.delete_row(2).unwrap();
        sync(&mut a, &mut b);
        sync(&mut b, &mut a);

        assert_eq!(a.grid().row_count(), 2);
        assert_eq!(b.grid().row_count(), 2);
    }

    #[test]
    fn test_update_encoding() {
        let (mut a, mut b) = pair();
        a.edit_label(0, "Name").unwrap();

        let encoded = a.take_encoded().unwrap();
        for bytes in &encoded {
            b.apply_encoded(bytes).unwrap();
        }
        assert_eq!(b.grid().header(0), Some("Name"));
        assert!(matches!(
            KeepSheet::decode_update(b"not json"),
            Err(SheetError::SerializationError(_))
        ));
    }
}
