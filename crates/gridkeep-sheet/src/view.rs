//! View materializer - dense, positional projection of the identity-keyed document.
//!
//! The projection is total and idempotent: it is rebuilt from scratch from
//! the two sequences and the cell store, never patched. Positions handed in
//! by callers are translated to identities here and nowhere else.

use crate::cells::CellStore;
use crate::error::{check_slot, Result, SheetError};
use crate::ids::{ColId, Identity, RowId};
use gridkeep_core::IdSequence;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A dense grid as consumed by a rendering layer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    /// One label per column.
    pub headers: Vec<Option<String>>,
    /// Rows of cells; `None` is an empty cell.
    pub rows: Vec<Vec<Option<String>>>,
}

impl Grid {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.headers.len()
    }

    /// Cell text at a position, `None` when empty or out of range.
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(col))
            .and_then(|cell| cell.as_deref())
    }

    pub fn header(&self, col: usize) -> Option<&str> {
        self.headers.get(col).and_then(|label| label.as_deref())
    }

    /// Whether every row has exactly one cell per column.
    pub fn is_rectangular(&self) -> bool {
        self.rows.iter().all(|cells| cells.len() == self.headers.len())
    }

    /// Number of non-empty cells.
    pub fn filled(&self) -> usize {
        self.rows
            .iter()
            .flatten()
            .filter(|cell| cell.is_some())
            .count()
    }
}

/// Spreadsheet-style letter for a column index: A..Z, then AA, AB, ...
pub fn column_indicator(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .headers
            .iter()
            .flatten()
            .chain(self.rows.iter().flatten().flatten())
            .map(|text| text.chars().count())
            .max()
            .unwrap_or(0)
            .max(3);
        let gutter = self.rows.len().to_string().len();

        write!(f, "{:gutter$} ", "")?;
        for col in 0..self.col_count() {
            write!(f, "| {:width$} ", column_indicator(col))?;
        }
        writeln!(f)?;

        write!(f, "{:gutter$} ", "")?;
        for label in &self.headers {
            write!(f, "| {:width$} ", label.as_deref().unwrap_or(""))?;
        }
        writeln!(f)?;

        for (index, cells) in self.rows.iter().enumerate() {
            write!(f, "{:>gutter$} ", index + 1)?;
            for cell in cells {
                write!(f, "| {:width$} ", cell.as_deref().unwrap_or(""))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Visible identities of a sequence, each projected once.
pub fn identities<I: Identity>(sequence: &IdSequence<I>) -> Vec<I> {
    let mut seen = HashSet::new();
    sequence
        .iter()
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}

/// Project rows, columns and cells into a dense grid.
///
/// Empty strings are shown as empty cells. Entries whose row or column is
/// not present are not projected.
pub fn materialize(rows: &IdSequence<RowId>, cols: &IdSequence<ColId>, cells: &CellStore) -> Grid {
    let row_ids = identities(rows);
    let col_ids = identities(cols);

    let headers = col_ids
        .iter()
        .map(|col| non_empty(cells.get_label(col)))
        .collect();

    let rows = row_ids
        .iter()
        .map(|row| {
            col_ids
                .iter()
                .map(|col| non_empty(cells.get_cell(row, col)))
                .collect()
        })
        .collect();

    Grid { headers, rows }
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.filter(|text| !text.is_empty()).map(str::to_string)
}

/// Translate a position into the identity currently at that index.
pub fn resolve_index<I: Identity>(sequence: &IdSequence<I>, index: usize) -> Result<I> {
    let mut ids = identities(sequence);
    check_slot(I::AXIS, index, ids.len())?;
    Ok(ids.swap_remove(index))
}

/// Translate a cell position into `(RowId, ColId)`.
pub fn resolve_position(
    rows: &IdSequence<RowId>,
    cols: &IdSequence<ColId>,
    row: usize,
    col: usize,
) -> Result<(RowId, ColId)> {
    Ok((resolve_index(rows, row)?, resolve_index(cols, col)?))
}

/// Current index of an identity.
pub fn index_of<I: Identity>(sequence: &IdSequence<I>, id: &I) -> Result<usize> {
    identities(sequence)
        .iter()
        .position(|candidate| candidate == id)
        .ok_or_else(|| SheetError::UnknownIdentity(id.to_string()))
}

/// Current position of a cell addressed by identity.
pub fn position_of(
    rows: &IdSequence<RowId>,
    cols: &IdSequence<ColId>,
    row: &RowId,
    col: &ColId,
) -> Result<(usize, usize)> {
    Ok((index_of(rows, row)?, index_of(cols, col)?))
}
