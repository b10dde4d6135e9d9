use std::collections::HashMap;
use std::sync::Arc;

use crate::data::peak::{Peak, PeakId};
use crate::data::similarity::SimilarityIndex;

/// Tests whether `p` and `q` are each other's best known match.
///
/// Peaks from the same partition are never best hits of each other, so
/// the test is false for them rather than an error.
pub fn is_bidi_best_hit(index: &SimilarityIndex, p: &Peak, q: &Peak) -> bool {
    if p.partition == q.partition {
        return false;
    }
    let forward = index
        .best_match(p.id, q.partition)
        .map_or(false, |edge| edge.target == q.id);
    let backward = index
        .best_match(q.id, p.partition)
        .map_or(false, |edge| edge.target == p.id);
    forward && backward
}

/// Number of `members` that are bidirectional best hits of `peak`.
pub fn bbh_partner_count<'a, I>(index: &SimilarityIndex, peak: &Peak, members: I) -> usize
where
    I: IntoIterator<Item = &'a Arc<Peak>>,
{
    members
        .into_iter()
        .filter(|member| is_bidi_best_hit(index, peak, member))
        .count()
}

/// Returns all peak pairs from two partitions that are each other's best
/// match (mutual nearest neighbor).
///
/// # Arguments
///
/// * `left` - peaks of the first partition
/// * `right` - peaks of the second partition
/// * `index` - best-match edges for both partitions
///
/// Returns:
///
/// * `Vec<(Arc<Peak>, Arc<Peak>)>` - the reciprocal pairs, in the order of
///   the left peak list. Empty when either list is empty or both lists
///   come from the same partition.
pub fn find_bidi_best_hits(
    left: &[Arc<Peak>],
    right: &[Arc<Peak>],
    index: &SimilarityIndex,
) -> Vec<(Arc<Peak>, Arc<Peak>)> {
    if left.is_empty() || right.is_empty() {
        return Vec::new();
    }
    let peer_partition = right[0].partition;
    if left[0].partition == peer_partition {
        return Vec::new();
    }

    // id -> peak lookup for the peer side
    let right_by_id: HashMap<PeakId, &Arc<Peak>> =
        right.iter().map(|peak| (peak.id, peak)).collect();

    let mut pairs: Vec<(Arc<Peak>, Arc<Peak>)> = Vec::new();
    for p in left {
        let target = match index.best_match(p.id, peer_partition) {
            Some(edge) => edge.target,
            None => continue,
        };
        let q = match right_by_id.get(&target) {
            Some(q) => *q,
            None => continue,
        };
        if is_bidi_best_hit(index, p, q) {
            pairs.push((p.clone(), q.clone()));
        }
    }
    pairs
}
