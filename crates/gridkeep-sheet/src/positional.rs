//! Positional policy.
//!
//! Headers are a sequence of labels and every row is its own sequence of
//! cell strings; nothing has an identity beyond its slot. A cell edit is a
//! delete followed by an insert at the same index, and inserting or deleting
//! a column walks every row it can currently see. Concurrent structural
//! edits therefore lose writes or leave rows ragged. There is no arbiter.

use crate::config::SheetConfig;
use crate::error::{check_gap, check_slot, Result};
use crate::ids::Axis;
use crate::policy::{GridPolicy, PolicyKind};
use crate::view::Grid;
use gridkeep_core::{IdSequence, SeqOp, Stamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A primitive op inside a positional transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PositionalOp {
    Headers(SeqOp<String>),
    /// Row slots carry no value; the element id names the row's cell sequence.
    Rows(SeqOp<()>),
    Cells { row: Stamp, op: SeqOp<String> },
}

/// One transaction of the positional policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionalUpdate {
    pub origin: String,
    pub seq: u64,
    pub ops: Vec<PositionalOp>,
}

/// A grid replica running the positional policy.
#[derive(Clone, Debug)]
pub struct PositionalSheet {
    replica_id: String,
    config: SheetConfig,
    headers: IdSequence<String>,
    rows: IdSequence<()>,
    /// Cell sequence of each row, keyed by the row's element id.
    cells: BTreeMap<Stamp, IdSequence<String>>,
    seq: u64,
    outbox: Vec<PositionalUpdate>,
    grid: Grid,
}

impl PositionalSheet {
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self::with_config(replica_id, SheetConfig::default())
    }

    pub fn with_config(replica_id: impl Into<String>, config: SheetConfig) -> Self {
        let replica_id = replica_id.into();
        Self {
            headers: IdSequence::new(replica_id.clone()),
            rows: IdSequence::new(replica_id.clone()),
            cells: BTreeMap::new(),
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

    fn row_cells(&mut self, row: &Stamp) -> &mut IdSequence<String> {
        let replica_id = &self.replica_id;
        self.cells
            .entry(row.clone())
            .or_insert_with(|| IdSequence::new(replica_id.clone()))
    }

    /// Cell sequence of the row at visible `index`.
    fn row_at(&mut self, index: usize) -> Result<&mut IdSequence<String>> {
        check_slot(Axis::Row, index, self.rows.len())?;
        let element = self.rows.elements().swap_remove(index);
        Ok(self.row_cells(&element))
    }

    fn push_row(&mut self, at: usize) {
        let element = self.rows.insert(at, ()).stamp().clone();
        let width = self.headers.len();
        let cells = self.row_cells(&element);
        for _ in 0..width {
            cells.push_back(String::new());
        }
    }

    fn commit(&mut self) {
        let mut ops: Vec<PositionalOp> = Vec::new();
        ops.extend(self.headers.take_delta().into_iter().map(PositionalOp::Headers));
        ops.extend(self.rows.take_delta().into_iter().map(PositionalOp::Rows));
        for (row, cells) in self.cells.iter_mut() {
            ops.extend(cells.take_delta().into_iter().map(|op| PositionalOp::Cells {
                row: row.clone(),
                op,
            }));
        }

        if !ops.is_empty() {
            self.seq += 1;
            debug!(replica = %self.replica_id, seq = self.seq, ops = ops.len(), "committed update");
            self.outbox.push(PositionalUpdate {
                origin: self.replica_id.clone(),
                seq: self.seq,
                ops,
            });
        }
        self.refresh();
    }

    fn refresh(&mut self) -> bool {
        let grid = self.materialize();
        if grid == self.grid {
            return false;
        }
        self.grid = grid;
        true
    }
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

impl GridPolicy for PositionalSheet {
    type Update = PositionalUpdate;

    fn kind(&self) -> PolicyKind {
        PolicyKind::Positional
    }

    fn replica_id(&self) -> &str {
        &self.replica_id
    }

    fn seed(&mut self) {
        if self.is_seeded() {
            return;
        }
        for _ in 0..self.config.initial_cols {
            self.headers.push_back(self.config.default_label.clone());
        }
        for at in 0..self.config.initial_rows {
            self.push_row(at);
        }
        info!(replica = %self.replica_id, "seeded default grid");
        self.commit();
    }

    fn is_seeded(&self) -> bool {
        !self.rows.is_empty() || !self.headers.is_empty()
    }

    fn edit_cell(&mut self, row: usize, col: usize, value: &str) -> Result<()> {
        let cells = self.row_at(row)?;
        check_slot(Axis::Col, col, cells.len())?;
        if cells.get(col).map(String::as_str) == Some(value) {
            return Ok(());
        }
        cells.remove(col);
        cells.insert(col, value.to_string());
        self.commit();
        Ok(())
    }

    fn edit_label(&mut self, col: usize, value: &str) -> Result<()> {
        check_slot(Axis::Col, col, self.headers.len())?;
        self.headers.remove(col);
        self.headers.insert(col, value.to_string());
        self.commit();
        Ok(())
    }

    fn insert_row(&mut self, at: usize) -> Result<()> {
        check_gap(Axis::Row, at, self.rows.len())?;
        self.push_row(at);
        self.commit();
        Ok(())
    }

    fn insert_col(&mut self, at: usize) -> Result<()> {
        check_gap(Axis::Col, at, self.headers.len())?;
        self.headers.insert(at, self.config.default_label.clone());
        for element in self.rows.elements() {
            self.row_cells(&element).insert(at, String::new());
        }
        self.commit();
        Ok(())
    }

    fn delete_row(&mut self, at: usize) -> Result<()> {
        check_slot(Axis::Row, at, self.rows.len())?;
        self.rows.remove(at);
        self.commit();
        Ok(())
    }

    fn delete_col(&mut self, at: usize) -> Result<()> {
        check_slot(Axis::Col, at, self.headers.len())?;
        for element in self.rows.elements() {
            self.row_cells(&element).remove(at);
        }
        self.headers.remove(at);
        self.commit();
        Ok(())
    }

    fn grid(&self) -> &Grid {
        &self.grid
    }

    fn materialize(&self) -> Grid {
        let headers = self.headers.iter().map(|label| non_empty(label)).collect();
        let rows = self
            .rows
            .elements()
            .iter()
            .map(|element| match self.cells.get(element) {
                Some(cells) => cells.iter().map(|cell| non_empty(cell)).collect(),
                None => Vec::new(),
            })
            .collect();
        Grid { headers, rows }
    }

    fn take_updates(&mut self) -> Vec<PositionalUpdate> {
        std::mem::take(&mut self.outbox)
    }

    fn apply_remote(&mut self, update: &PositionalUpdate) -> bool {
        if update.origin == self.replica_id {
            return false;
        }
        for op in &update.ops {
            match op {
                PositionalOp::Headers(op) => {
                    self.headers.apply(op);
                }
                PositionalOp::Rows(op) => {
                    self.rows.apply(op);
                }
                PositionalOp::Cells { row, op } => {
                    self.row_cells(row).apply(op);
                }
            }
        }
        debug!(
            replica = %self.replica_id,
            origin = %update.origin,
            seq = update.seq,
            "applied remote update"
        );
        self.refresh()
    }
}
