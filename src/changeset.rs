//! Changeset - Incremental Change Propagation
//!
//! Every settled table mutation produces one `Changeset` describing which
//! physical rows it touched. Views consume it to update their row mapping
//! instead of re-running the whole pipeline.
//!
//! # Change Types
//!
//! - `RowInserted`: a new row was appended at `index`
//! - `RowUpdated`: the row at `index` was overwritten in place (upsert or
//!   ring-buffer overwrite)
//! - `RowSpliced`: a new row was inserted at `index` and later rows shifted
//!   up (a ring buffer refilling after a removal)
//! - `RowDeleted`: the row at `index` was removed and later rows shifted down
//! - `Cleared`: every row was dropped; consumers rebuild from scratch
//!
//! Changes are ordered: every index refers to the storage layout left
//! behind by the changes before it.

use serde::Serialize;

/// Identifies the origin of a mutation. Port 0 is the default port used by
/// plain `update` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct PortId(pub u64);

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port {}", self.0)
    }
}

/// Represents a single change to a table's physical rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableChange {
    RowInserted { index: usize },
    RowSpliced { index: usize },
    RowUpdated { index: usize },
    RowDeleted { index: usize },
    Cleared,
}

impl TableChange {
    /// Returns the row index affected by this change
    pub fn row_index(&self) -> Option<usize> {
        match self {
            TableChange::RowInserted { index }
            | TableChange::RowSpliced { index }
            | TableChange::RowUpdated { index }
            | TableChange::RowDeleted { index } => Some(*index),
            TableChange::Cleared => None,
        }
    }

    /// Returns true if this change shifts the indices of later rows
    pub fn shifts_indices(&self) -> bool {
        matches!(self, TableChange::RowSpliced { .. } | TableChange::RowDeleted { .. })
    }
}

/// The changes produced by one settled mutation.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    changes: Vec<TableChange>,
    /// Table generation after the mutation
    generation: u64,
    port: PortId,
}

impl Changeset {
    pub fn new(generation: u64, port: PortId) -> Self {
        Changeset {
            changes: Vec::new(),
            generation,
            port,
        }
    }

    /// Add a change to the changeset
    pub fn push(&mut self, change: TableChange) {
        self.changes.push(change);
    }

    pub fn changes(&self) -> &[TableChange] {
        &self.changes
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn port(&self) -> PortId {
        self.port
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// True when consumers cannot patch their state and must rebuild.
    pub fn requires_rebuild(&self) -> bool {
        self.changes.iter().any(|c| matches!(c, TableChange::Cleared))
    }

    /// Indices of rows that were inserted or overwritten, in the final
    /// layout, ascending and deduplicated. Deleted rows drop out.
    pub fn touched_rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = Vec::new();
        for change in &self.changes {
            match *change {
                TableChange::RowInserted { index } | TableChange::RowUpdated { index } => rows.push(index),
                TableChange::RowSpliced { index } => {
                    IndexAdjuster::adjust_mapping_for_insert(&mut rows, index);
                    rows.push(index);
                }
                TableChange::RowDeleted { index } => {
                    IndexAdjuster::adjust_mapping_for_delete(&mut rows, index);
                }
                TableChange::Cleared => rows.clear(),
            }
        }
        rows.sort_unstable();
        rows.dedup();
        rows
    }
}

/// Helper to adjust view index mappings when rows are inserted or deleted
/// in the middle of the table.
pub struct IndexAdjuster;

impl IndexAdjuster {
    /// Adjust an entire index mapping for a delete, dropping entries that
    /// pointed at the deleted row. Returns true if an entry was dropped.
    pub fn adjust_mapping_for_delete(mapping: &mut Vec<usize>, delete_index: usize) -> bool {
        let before = mapping.len();
        mapping.retain(|&parent_idx| parent_idx != delete_index);
        for parent_idx in mapping.iter_mut() {
            if *parent_idx > delete_index {
                *parent_idx -= 1;
            }
        }
        mapping.len() != before
    }

    /// Shift every entry at or after `insert_index` up by one.
    pub fn adjust_mapping_for_insert(mapping: &mut [usize], insert_index: usize) {
        for parent_idx in mapping.iter_mut() {
            if *parent_idx >= insert_index {
                *parent_idx += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changeset_basic() {
        let mut cs = Changeset::new(3, PortId(1));
        assert!(cs.is_empty());
        assert_eq!(cs.generation(), 3);
        assert_eq!(cs.port(), PortId(1));

        cs.push(TableChange::RowInserted { index: 4 });
        cs.push(TableChange::RowUpdated { index: 1 });
        cs.push(TableChange::RowUpdated { index: 4 });

        assert_eq!(cs.len(), 3);
        assert!(!cs.requires_rebuild());
        assert_eq!(cs.touched_rows(), vec![1, 4]);
    }

    #[test]
    fn test_cleared_requires_rebuild() {
        let mut cs = Changeset::new(1, PortId::default());
        cs.push(TableChange::Cleared);
        assert!(cs.requires_rebuild());
        assert_eq!(cs.changes()[0].row_index(), None);
    }

    #[test]
    fn test_mapping_adjust_for_delete() {
        let mut mapping = vec![7, 0, 3, 5, 2];
        assert!(IndexAdjuster::adjust_mapping_for_delete(&mut mapping, 3));
        // order is preserved, the entry for row 3 is gone
        assert_eq!(mapping, vec![6, 0, 4, 2]);
        assert!(!IndexAdjuster::adjust_mapping_for_delete(&mut mapping, 1));
        assert_eq!(mapping, vec![5, 0, 3, 1]);

        IndexAdjuster::adjust_mapping_for_insert(&mut mapping, 3);
        assert_eq!(mapping, vec![6, 0, 4, 1]);
    }

    #[test]
    fn test_touched_rows_follow_shifts() {
        let mut cs = Changeset::new(2, PortId::default());
        cs.push(TableChange::RowUpdated { index: 3 });
        cs.push(TableChange::RowSpliced { index: 1 });
        cs.push(TableChange::RowUpdated { index: 0 });
        cs.push(TableChange::RowDeleted { index: 0 });
        // 3 -> 4 after the splice, the new row at 1, then both move down
        assert_eq!(cs.touched_rows(), vec![0, 3]);
        assert!(TableChange::RowSpliced { index: 1 }.shifts_indices());
    }
}
