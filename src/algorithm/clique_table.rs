use std::collections::HashMap;

use crate::algorithm::clique::Clique;
use crate::data::peak::{Partition, PartitionId};

/// Read-only presence matrix over finished cliques.
///
/// Rows follow the clique list the table was built from, columns follow
/// the partition input order. The table is rebuilt whenever the clique
/// list changes; it never mutates in place.
#[derive(Clone, Debug)]
pub struct CliqueTable {
    data: Vec<bool>,                   // row-major, stride = cols
    rows: usize,
    cols: usize,
    column_of: HashMap<PartitionId, usize>,
}

impl CliqueTable {
    pub fn new(cliques: &[Clique], partitions: &[Partition]) -> CliqueTable {
        let rows = cliques.len();
        let cols = partitions.len();
        let column_of: HashMap<PartitionId, usize> = partitions
            .iter()
            .enumerate()
            .map(|(col, partition)| (partition.id, col))
            .collect();

        let mut data = vec![false; rows * cols];
        for (row, clique) in cliques.iter().enumerate() {
            for member in clique.member_list() {
                if let Some(&col) = column_of.get(&member.partition) {
                    data[row * cols + col] = true;
                }
            }
        }
        CliqueTable {
            data,
            rows,
            cols,
            column_of,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Whether the clique in `row` holds a member from `partition`.
    pub fn is_member(&self, row: usize, partition: PartitionId) -> bool {
        match self.column_of.get(&partition) {
            Some(&col) if row < self.rows => self.cell(row, col),
            _ => false,
        }
    }

    /// Number of cliques holding a member from `partition`. Since a
    /// clique carries at most one peak per partition, this equals the
    /// number of that partition's peaks inside any clique. Unknown
    /// partitions read 0.
    pub fn partition_member_count(&self, partition: PartitionId) -> usize {
        match self.column_of.get(&partition) {
            Some(&col) => (0..self.rows).filter(|&row| self.cell(row, col)).count(),
            None => 0,
        }
    }

    /// Row indices of cliques holding members from both partitions, in
    /// table order. Unknown partitions yield an empty result.
    pub fn cliques_spanning(&self, a: PartitionId, b: PartitionId) -> Vec<usize> {
        let (col_a, col_b) = match (self.column_of.get(&a), self.column_of.get(&b)) {
            (Some(&col_a), Some(&col_b)) => (col_a, col_b),
            _ => return Vec::new(),
        };
        (0..self.rows)
            .filter(|&row| self.cell(row, col_a) && self.cell(row, col_b))
            .collect()
    }

    #[inline]
    fn cell(&self, row: usize, col: usize) -> bool {
        self.data[row * self.cols + col]
    }
}
