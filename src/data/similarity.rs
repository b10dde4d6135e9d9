use std::collections::{BTreeSet, HashMap};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::data::peak::{PartitionId, Peak, PeakId};

/// Represents a directed best-match edge between two peaks.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct SimilarityEdge {
    pub source: PeakId,                // peak the edge starts at
    pub target: PeakId,                // best known neighbor of the source
    pub score: f64,                    // raw similarity, higher is better
}

/// Per-peak, per-target-partition record of the single best known neighbor.
///
/// The index keeps at most one edge per (source peak, target partition)
/// key. Adding an edge for an occupied key only replaces the stored one
/// when the new score is strictly higher, so the insertion order of
/// equally scored candidates never changes the outcome. Scores are stored
/// as given; infinite values are rejected later, during combination, where
/// both offending peaks can be named.
#[derive(Clone, Debug, Default)]
pub struct SimilarityIndex {
    best: HashMap<(PeakId, PartitionId), SimilarityEdge>,
    partition_of: HashMap<PeakId, PartitionId>,
    partitions: BTreeSet<PartitionId>,
}

impl SimilarityIndex {
    pub fn new() -> SimilarityIndex {
        SimilarityIndex {
            best: HashMap::new(),
            partition_of: HashMap::new(),
            partitions: BTreeSet::new(),
        }
    }

    /// Records a peak's partition so lookups by id can be answered even for
    /// peaks that end up without a single edge.
    pub fn register_peak(&mut self, peak: &Peak) {
        self.partition_of.insert(peak.id, peak.partition);
        self.partitions.insert(peak.partition);
    }

    /// Offers a candidate edge from `source` to `target`. The edge is kept
    /// only if no better edge toward the target's partition is known yet.
    pub fn add_edge(&mut self, source: &Peak, target: &Peak, score: f64) {
        self.register_peak(source);
        self.register_peak(target);

        let key = (source.id, target.partition);
        match self.best.get(&key) {
            Some(existing) if existing.score >= score => {}
            _ => {
                self.best.insert(
                    key,
                    SimilarityEdge {
                        source: source.id,
                        target: target.id,
                        score,
                    },
                );
            }
        }
    }

    /// Best known neighbor of `peak` in `partition`, if any.
    pub fn best_match(&self, peak: PeakId, partition: PartitionId) -> Option<&SimilarityEdge> {
        self.best.get(&(peak, partition))
    }

    /// Similarity between `peak` and `other`, answered from the best-edge
    /// store. `None` when `other` is not the best known neighbor of `peak`
    /// in its partition.
    pub fn score(&self, peak: PeakId, other: PeakId) -> Option<f64> {
        let partition = self.partition_of(other)?;
        let edge = self.best_match(peak, partition)?;
        if edge.target == other {
            Some(edge.score)
        } else {
            None
        }
    }

    pub fn partition_of(&self, peak: PeakId) -> Option<PartitionId> {
        self.partition_of.get(&peak).copied()
    }

    /// Drops every outgoing edge of `peak` along with its registration.
    /// Called once per exported peak after a combination pass, never
    /// inside it.
    pub fn clear_peak(&mut self, peak: PeakId) {
        for partition in &self.partitions {
            self.best.remove(&(peak, *partition));
        }
        self.partition_of.remove(&peak);
    }

    pub fn edge_count(&self) -> usize {
        self.best.len()
    }

    pub fn peak_count(&self) -> usize {
        self.partition_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(id: PeakId, partition: PartitionId, rt: f64) -> Peak {
        Peak::new(
            id,
            partition,
            format!("run_{}", partition),
            rt,
            0,
            vec![1.0, 2.0, 1.0],
        )
    }

    #[test]
    fn test_add_edge_keeps_best() {
        let mut index = SimilarityIndex::new();
        let a = peak(1, 0, 10.0);
        let b = peak(2, 1, 10.2);
        let c = peak(3, 1, 11.0);

        index.add_edge(&a, &b, 0.5);
        index.add_edge(&a, &c, 0.9);

        let edge = index.best_match(1, 1).unwrap();
        assert_eq!(edge.target, 3);
        assert!((edge.score - 0.9).abs() < 1e-12);

        // a weaker candidate must not displace the stored edge
        index.add_edge(&a, &b, 0.7);
        assert_eq!(index.best_match(1, 1).unwrap().target, 3);
        assert_eq!(index.edge_count(), 1);
    }

    #[test]
    fn test_add_edge_tie_keeps_first() {
        let mut index = SimilarityIndex::new();
        let a = peak(1, 0, 10.0);
        let b = peak(2, 1, 10.2);
        let c = peak(3, 1, 11.0);

        index.add_edge(&a, &b, 0.8);
        index.add_edge(&a, &c, 0.8);

        assert_eq!(index.best_match(1, 1).unwrap().target, 2);
    }

    #[test]
    fn test_score_resolves_via_partition() {
        let mut index = SimilarityIndex::new();
        let a = peak(1, 0, 10.0);
        let b = peak(2, 1, 10.2);
        let c = peak(3, 1, 11.0);

        index.add_edge(&a, &b, 0.5);

        assert!((index.score(1, 2).unwrap() - 0.5).abs() < 1e-12);
        // c is registered but not the best match of a
        index.register_peak(&c);
        assert!(index.score(1, 3).is_none());
        // unknown peak id
        assert!(index.score(1, 99).is_none());
    }

    #[test]
    fn test_clear_peak_drops_outgoing_edges() {
        let mut index = SimilarityIndex::new();
        let a = peak(1, 0, 10.0);
        let b = peak(2, 1, 10.2);
        let c = peak(3, 2, 10.4);

        index.add_edge(&a, &b, 0.5);
        index.add_edge(&a, &c, 0.6);
        index.add_edge(&b, &a, 0.5);
        assert_eq!(index.edge_count(), 3);

        index.clear_peak(1);

        assert!(index.best_match(1, 1).is_none());
        assert!(index.best_match(1, 2).is_none());
        assert!(index.partition_of(1).is_none());
        // the incoming edge of peak 1 stays with its source
        assert!(index.best_match(2, 0).is_some());
        assert_eq!(index.edge_count(), 1);
    }
}
