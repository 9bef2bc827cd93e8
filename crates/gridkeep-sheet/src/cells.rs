//! Sparse cell store - cell values and column labels keyed by identity.
//!
//! Cells are keyed by `(RowId, ColId)` and labels by `ColId`, both in one
//! replicated LWW map. Entries are never keyed by position, so a structural
//! edit elsewhere in the grid never moves or rewrites a value. Entries whose
//! row or column is no longer present are orphans: they stay in the map and
//! are simply not projected.

use crate::ids::{ColId, RowId};
use gridkeep_core::{IdSequence, LwwMap, MapOp};
use serde::{Deserialize, Serialize};

/// Key of an entry in the cell store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CellKey {
    Cell { row: RowId, col: ColId },
    Label(ColId),
}

impl CellKey {
    pub fn cell(row: &RowId, col: &ColId) -> Self {
        CellKey::Cell {
            row: row.clone(),
            col: col.clone(),
        }
    }

    pub fn label(col: &ColId) -> Self {
        CellKey::Label(col.clone())
    }
}

/// Replicated write to the cell store.
pub type CellOp = MapOp<CellKey, String>;

/// Identity-keyed values of one document.
#[derive(Clone, Debug, PartialEq)]
pub struct CellStore {
    map: LwwMap<CellKey, String>,
}

impl CellStore {
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self {
            map: LwwMap::new(replica_id),
        }
    }

    /// Write a cell value.
    ///
    /// Writing an empty value to a cell that has no entry is a no-op and
    /// returns `None`; no spurious empty entries are created.
    pub fn set_cell(&mut self, row: &RowId, col: &ColId, value: &str) -> Option<CellOp> {
        let key = CellKey::cell(row, col);
        if value.is_empty() && !self.map.has(&key) {
            return None;
        }
        Some(self.map.set(key, value.to_string()))
    }

    pub fn get_cell(&self, row: &RowId, col: &ColId) -> Option<&str> {
        self.map
            .get(&CellKey::cell(row, col))
            .map(|value| value.as_str())
    }

    /// Write a column label.
    pub fn set_label(&mut self, col: &ColId, text: &str) -> CellOp {
        self.map.set(CellKey::label(col), text.to_string())
    }

    pub fn get_label(&self, col: &ColId) -> Option<&str> {
        self.map.get(&CellKey::label(col)).map(|value| value.as_str())
    }

    /// Integrate a write from any replica.
    pub fn apply(&mut self, op: &CellOp) -> bool {
        self.map.apply(op)
    }

    pub fn take_delta(&mut self) -> Vec<CellOp> {
        self.map.take_delta()
    }

    /// Number of live entries, labels included.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate live entries.
    pub fn iter(&self) -> impl Iterator<Item = (&CellKey, &String)> {
        self.map.iter()
    }

    /// Keys of entries whose row or column is not currently present.
    pub fn orphaned_keys(
        &self,
        rows: &IdSequence<RowId>,
        cols: &IdSequence<ColId>,
    ) -> Vec<CellKey> {
        self.map
            .keys()
            .filter(|key| match key {
                CellKey::Cell { row, col } => !rows.contains(row) || !cols.contains(col),
                CellKey::Label(col) => !cols.contains(col),
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_cell() {
        let mut store = CellStore::new("r1");
        let (row, col) = (RowId::new(), ColId::new());

        assert!(store.get_cell(&row, &col).is_none());
        store.set_cell(&row, &col, "hello").unwrap();
        assert_eq!(store.get_cell(&row, &col), Some("hello"));
    }

    #[test]
    fn test_empty_write_on_absent_cell_is_noop() {
        let mut store = CellStore::new("r1");
        let (row, col) = (RowId::new(), ColId::new());

        assert!(store.set_cell(&row, &col, "").is_none());
        assert!(store.is_empty());
        assert!(store.take_delta().is_empty());
    }

    #[test]
    fn test_empty_write_clears_existing_cell() {
        let mut store = CellStore::new("r1");
        let (row, col) = (RowId::new(), ColId::new());

        store.set_cell(&row, &col, "x");
        assert!(store.set_cell(&row, &col, "").is_some());
        assert_eq!(store.get_cell(&row, &col), Some(""));
    }

    #[test]
    fn test_labels_are_separate_from_cells() {
        let mut store = CellStore::new("r1");
        let (row, col) = (RowId::new(), ColId::new());

        store.set_label(&col, "Name");
        store.set_cell(&row, &col, "Alice");

        assert_eq!(store.get_label(&col), Some("Name"));
        assert_eq!(store.get_cell(&row, &col), Some("Alice"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_orphaned_keys() {
        let mut store = CellStore::new("r1");
        let mut rows: IdSequence<RowId> = IdSequence::new("r1");
        let mut cols: IdSequence<ColId> = IdSequence::new("r1");

        let (kept_row, gone_row, col) = (RowId::new(), RowId::new(), ColId::new());
        rows.push_back(kept_row.clone());
        rows.push_back(gone_row.clone());
        cols.push_back(col.clone());

        store.set_label(&col, "A");
        store.set_cell(&kept_row, &col, "1");
        store.set_cell(&gone_row, &col, "2");
        rows.remove(1);

        assert_eq!(
            store.orphaned_keys(&rows, &cols),
            vec![CellKey::cell(&gone_row, &col)]
        );
    }

    #[test]
    fn test_replicated_writes() {
        let mut a = CellStore::new("a");
        let mut b = CellStore::new("b");
        let (row, col) = (RowId::new(), ColId::new());

        a.set_cell(&row, &col, "from-a");
        for op in a.take_delta() {
            b.apply(&op);
        }
        assert_eq!(b.get_cell(&row, &col), Some("from-a"));
    }
}
