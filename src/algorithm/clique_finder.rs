use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use itertools::iproduct;
use ordered_float::OrderedFloat;

use crate::algorithm::bbh::is_bidi_best_hit;
use crate::algorithm::clique::{Clique, CliqueId, VarianceMode};
use crate::data::peak::{Partition, Peak, PeakId};
use crate::data::similarity::SimilarityIndex;
use crate::error::AlignmentError;

/// Tuning knobs for clique construction.
#[derive(Clone, Copy, Debug)]
pub struct CliqueConfig {
    pub min_bbh_fraction: f64,         // required reciprocal support for admission, in (0, 1]
    pub variance_mode: VarianceMode,   // divisor for reported RT variances
}

impl Default for CliqueConfig {
    fn default() -> Self {
        CliqueConfig {
            min_bbh_fraction: 1.0,
            variance_mode: VarianceMode::Legacy,
        }
    }
}

/// Final product of one combination pass.
#[derive(Clone, Debug)]
pub struct AlignmentOutcome {
    /// surviving cliques, ascending by RT mean
    pub cliques: Vec<Clique>,
    /// final assignment: peak id -> clique id
    pub peak_to_clique: HashMap<PeakId, CliqueId>,
    /// peaks displaced during merges that never rejoined a clique
    pub incompatible: Vec<Arc<Peak>>,
    /// peaks without a best match toward some partition that ended the
    /// run in no clique
    pub unassigned: Vec<Arc<Peak>>,
}

impl AlignmentOutcome {
    /// Cliques with at least `min_size` members, preserving the RT order.
    /// The combination pass itself never filters by size, this is the
    /// caller-side step.
    pub fn cliques_of_min_size(&self, min_size: usize) -> Vec<&Clique> {
        self.cliques
            .iter()
            .filter(|clique| clique.size() >= min_size)
            .collect()
    }
}

/// Drives reciprocal best-hit matching over every ordered partition pair
/// and folds the resulting pairs into cliques.
///
/// The pass is strictly sequential: it maintains one peak to clique
/// ownership map whose correctness depends on every decision being
/// visible to the next one, and the fixed iteration order (partitions in
/// input order, peaks in detection order) makes the output deterministic.
#[derive(Clone, Debug)]
pub struct CliqueFinder {
    config: CliqueConfig,
    next_clique_id: CliqueId,
}

impl CliqueFinder {
    /// Creates a finder. Fails right away when the configured
    /// `min_bbh_fraction` is outside (0, 1], before any alignment runs.
    pub fn new(config: CliqueConfig) -> Result<CliqueFinder, AlignmentError> {
        if !(config.min_bbh_fraction > 0.0 && config.min_bbh_fraction <= 1.0) {
            return Err(AlignmentError::InvalidBbhFraction(config.min_bbh_fraction));
        }
        Ok(CliqueFinder {
            config,
            next_clique_id: 0,
        })
    }

    /// Combines the peaks of all partitions into cliques.
    ///
    /// For every ordered pair of distinct partitions, every peak of the
    /// first resolves its best match in the second. Reciprocal pairs
    /// either seed a new clique, pull the unowned side into the owned
    /// side's clique, or merge two cliques; peaks without a best match
    /// are remembered as unassigned candidates. An infinite similarity
    /// score aborts the whole pass.
    ///
    /// `min_clique_size` is a caller hint carried into the summary log;
    /// the returned list is unfiltered (see
    /// [`AlignmentOutcome::cliques_of_min_size`]).
    ///
    /// The similarity annotations of the incompatible and unassigned
    /// peaks are cleared from the index once the pass is complete,
    /// strictly outside the loop; clique members keep theirs.
    ///
    /// # Arguments
    ///
    /// * `partitions` - the partitions in stable input order
    /// * `peaks_by_partition` - one peak list per partition, in detection order
    /// * `min_clique_size` - caller hint, reported but not applied
    /// * `index` - best-match edges for all peaks
    ///
    /// Returns:
    ///
    /// * `Ok(AlignmentOutcome)` - cliques sorted ascending by RT mean plus
    ///   the exported incompatible and unassigned peak sets
    /// * `Err(AlignmentError)` - on a partition table mismatch or an
    ///   infinite similarity score
    pub fn combine(
        &mut self,
        partitions: &[Partition],
        peaks_by_partition: &[Vec<Arc<Peak>>],
        min_clique_size: usize,
        index: &mut SimilarityIndex,
    ) -> Result<AlignmentOutcome, AlignmentError> {
        if partitions.len() != peaks_by_partition.len() {
            return Err(AlignmentError::PartitionCountMismatch {
                expected: partitions.len(),
                actual: peaks_by_partition.len(),
            });
        }
        #[cfg(debug_assertions)]
        {
            for (partition, peaks) in partitions.iter().zip(peaks_by_partition.iter()) {
                debug_assert!(
                    peaks.iter().all(|p| p.partition == partition.id),
                    "peak list of partition {} carries foreign peaks",
                    partition.id
                );
            }
        }
        let started = Instant::now();
        let total_peaks: usize = peaks_by_partition.iter().map(|peaks| peaks.len()).sum();

        let mut cliques: Vec<Clique> = Vec::new();               // arena, slots never move
        let mut owner: HashMap<PeakId, usize> = HashMap::new();  // peak id -> arena slot
        let mut incompatible: Vec<Arc<Peak>> = Vec::new();
        let mut incompatible_ids: HashSet<PeakId> = HashSet::new();
        let mut unassigned: Vec<Arc<Peak>> = Vec::new();
        let mut unassigned_ids: HashSet<PeakId> = HashSet::new();
        let mut opened: usize = 0;
        let mut merges: usize = 0;

        // id -> peak lookup per partition for resolving edge targets
        let lookups: Vec<HashMap<PeakId, Arc<Peak>>> = peaks_by_partition
            .iter()
            .map(|peaks| peaks.iter().map(|p| (p.id, p.clone())).collect())
            .collect();

        for (i, j) in iproduct!(0..partitions.len(), 0..partitions.len()) {
            if i == j {
                continue;
            }
            let peer_partition = partitions[j].id;
            for p in &peaks_by_partition[i] {
                // 1) resolve the best match of p in the peer partition
                let edge = match index.best_match(p.id, peer_partition) {
                    Some(edge) => *edge,
                    None => {
                        note_peak(p, &mut unassigned, &mut unassigned_ids);
                        continue;
                    }
                };
                let q = match lookups[j].get(&edge.target) {
                    Some(q) => q.clone(),
                    None => {
                        note_peak(p, &mut unassigned, &mut unassigned_ids);
                        continue;
                    }
                };

                // 2) a broken similarity function surfaces here, never as
                // a quietly degraded result
                if edge.score.is_infinite() {
                    return Err(AlignmentError::InfiniteSimilarity {
                        left_peak: p.id,
                        left_partition: p.partition_name.clone(),
                        right_peak: q.id,
                        right_partition: q.partition_name.clone(),
                    });
                }

                if !is_bidi_best_hit(index, p, &q) {
                    continue;
                }

                // 3) fold the reciprocal pair into the clique arena
                match (owner.get(&p.id).copied(), owner.get(&q.id).copied()) {
                    (None, None) => {
                        let slot = cliques.len();
                        let mut clique = Clique::new(
                            self.next_id(),
                            self.config.min_bbh_fraction,
                            self.config.variance_mode,
                        )?;
                        let seeded = clique.add(index, p, false);
                        let paired = clique.add(index, &q, false);
                        debug_assert!(seeded && paired);
                        cliques.push(clique);
                        owner.insert(p.id, slot);
                        owner.insert(q.id, slot);
                        opened += 1;
                    }
                    (Some(slot), None) => {
                        join_clique(index, &q, slot, &mut cliques, &mut owner);
                    }
                    (None, Some(slot)) => {
                        join_clique(index, p, slot, &mut cliques, &mut owner);
                    }
                    (Some(a), Some(b)) if a == b => {
                        // both already settled together, the no-op add
                        // keeps the idempotence contract honest
                        let _ = cliques[a].add(index, p, false);
                    }
                    (Some(a), Some(b)) => {
                        if merge_cliques(
                            index,
                            a,
                            b,
                            &mut cliques,
                            &mut owner,
                            &mut incompatible,
                            &mut incompatible_ids,
                        ) {
                            merges += 1;
                        }
                    }
                }
            }
        }

        // 4) deduplicate the arena, drop cleared husks, sort by RT mean
        let referenced: BTreeSet<usize> = owner.values().copied().collect();
        let peak_to_clique: HashMap<PeakId, CliqueId> = owner
            .iter()
            .map(|(peak_id, slot)| (*peak_id, cliques[*slot].id()))
            .collect();
        let mut survivors: Vec<Clique> = cliques
            .into_iter()
            .enumerate()
            .filter(|(slot, clique)| referenced.contains(slot) && !clique.is_empty())
            .map(|(_, clique)| clique)
            .collect();
        survivors.sort_by_key(|clique| OrderedFloat(clique.rt_mean()));

        // 5) resolve the exported peak sets; a displaced peak that never
        // rejoined reports as incompatible and is not double-reported as
        // unassigned
        let assigned: HashSet<PeakId> = owner.keys().copied().collect();
        let incompatible: Vec<Arc<Peak>> = incompatible
            .into_iter()
            .filter(|peak| !assigned.contains(&peak.id))
            .collect();
        let incompatible_final: HashSet<PeakId> =
            incompatible.iter().map(|peak| peak.id).collect();
        let unassigned: Vec<Arc<Peak>> = unassigned
            .into_iter()
            .filter(|peak| {
                !assigned.contains(&peak.id) && !incompatible_final.contains(&peak.id)
            })
            .collect();

        // 6) annotation cleanup runs once per exported peak, after the
        // combination loop; clique members keep their annotations
        for peak in incompatible.iter().chain(unassigned.iter()) {
            index.clear_peak(peak.id);
        }

        log::info!(
            "combined {} partitions with {} peaks into {} cliques ({} incompatible, {} unassigned, min size hint {}) in {:?}",
            partitions.len(),
            total_peaks,
            survivors.len(),
            incompatible.len(),
            unassigned.len(),
            min_clique_size,
            started.elapsed()
        );
        log::debug!("opened {} cliques, performed {} merges", opened, merges);

        Ok(AlignmentOutcome {
            cliques: survivors,
            peak_to_clique,
            incompatible,
            unassigned,
        })
    }

    fn next_id(&mut self) -> CliqueId {
        let id = self.next_clique_id;
        self.next_clique_id += 1;
        id
    }
}

// remembers a peak in first-seen order
fn note_peak(peak: &Arc<Peak>, list: &mut Vec<Arc<Peak>>, seen: &mut HashSet<PeakId>) {
    if seen.insert(peak.id) {
        list.push(peak.clone());
    }
}

/// Non-forced add of an unowned peak into an existing clique. Conflict
/// resolution inside the clique may displace (or drop) the previous
/// occupant of the slot, whose ownership entry must go with it.
fn join_clique(
    index: &SimilarityIndex,
    peak: &Arc<Peak>,
    slot: usize,
    cliques: &mut [Clique],
    owner: &mut HashMap<PeakId, usize>,
) {
    let clique = &mut cliques[slot];
    let before = clique.member_for_partition(peak.partition).cloned();
    let added = clique.add(index, peak, false);

    if let Some(previous) = before {
        let still_member = clique
            .member_for_partition(peak.partition)
            .map_or(false, |member| member.id == previous.id);
        if previous.id != peak.id && !still_member {
            owner.remove(&previous.id);
        }
    }
    if added {
        owner.insert(peak.id, slot);
    }
}

/// Merges two distinct cliques: the smaller one's members are forced into
/// the larger one, slot conflicts route the rejected member into the
/// incompatible set, and the emptied clique is abandoned. Returns whether
/// a merge actually happened (an already cleared husk makes it a no-op).
fn merge_cliques(
    index: &SimilarityIndex,
    a: usize,
    b: usize,
    cliques: &mut [Clique],
    owner: &mut HashMap<PeakId, usize>,
    incompatible: &mut Vec<Arc<Peak>>,
    incompatible_ids: &mut HashSet<PeakId>,
) -> bool {
    debug_assert!(a != b);
    if cliques[a].is_empty() || cliques[b].is_empty() {
        return false;
    }
    // the smaller clique folds into the larger one, ties fold into `a`
    let (keep, fold) = if cliques[b].size() > cliques[a].size() {
        (b, a)
    } else {
        (a, b)
    };

    let movers = cliques[fold].member_list();
    for peak in &movers {
        owner.remove(&peak.id);
        if cliques[keep].add(index, peak, true) {
            owner.insert(peak.id, keep);
        } else {
            note_peak(peak, incompatible, incompatible_ids);
        }
    }
    cliques[fold].clear();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::peak::PartitionId;

    fn peak(id: PeakId, partition: PartitionId, rt: f64) -> Arc<Peak> {
        Arc::new(Peak::new(
            id,
            partition,
            format!("run_{}", partition),
            rt,
            0,
            vec![1.0],
        ))
    }

    fn partitions(n: PartitionId) -> Vec<Partition> {
        (0..n).map(|i| Partition::new(i, format!("run_{}", i))).collect()
    }

    fn reciprocal(index: &mut SimilarityIndex, p: &Arc<Peak>, q: &Arc<Peak>, score: f64) {
        index.add_edge(p, q, score);
        index.add_edge(q, p, score);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = CliqueConfig {
            min_bbh_fraction: 0.0,
            variance_mode: VarianceMode::Legacy,
        };
        assert!(CliqueFinder::new(bad).is_err());

        let worse = CliqueConfig {
            min_bbh_fraction: 1.1,
            variance_mode: VarianceMode::Legacy,
        };
        assert!(CliqueFinder::new(worse).is_err());

        assert!(CliqueFinder::new(CliqueConfig::default()).is_ok());
    }

    #[test]
    fn test_partition_count_mismatch() {
        let mut finder = CliqueFinder::new(CliqueConfig::default()).unwrap();
        let mut index = SimilarityIndex::new();
        let err = finder
            .combine(&partitions(2), &[vec![]], 1, &mut index)
            .unwrap_err();
        assert!(matches!(
            err,
            AlignmentError::PartitionCountMismatch { expected: 2, actual: 1 }
        ));
    }

    #[test]
    fn test_three_way_alignment() {
        // one analyte seen in all three partitions at the same time
        let a1 = peak(1, 0, 10.0);
        let b1 = peak(2, 1, 10.0);
        let c1 = peak(3, 2, 10.0);

        let mut index = SimilarityIndex::new();
        reciprocal(&mut index, &a1, &b1, 0.9);
        reciprocal(&mut index, &a1, &c1, 0.9);
        reciprocal(&mut index, &b1, &c1, 0.9);

        let mut finder = CliqueFinder::new(CliqueConfig::default()).unwrap();
        let outcome = finder
            .combine(
                &partitions(3),
                &[vec![a1.clone()], vec![b1.clone()], vec![c1.clone()]],
                1,
                &mut index,
            )
            .unwrap();

        assert_eq!(outcome.cliques.len(), 1);
        let clique = &outcome.cliques[0];
        assert_eq!(clique.size(), 3);
        assert!((clique.rt_mean() - 10.0).abs() < 1e-9);
        assert!(clique.rt_variance() == 0.0);
        assert_eq!(clique.bbh_errors(), 0);

        assert!(outcome.incompatible.is_empty());
        assert!(outcome.unassigned.is_empty());
        for id in [1, 2, 3] {
            assert_eq!(outcome.peak_to_clique[&id], clique.id());
        }

        // no peak was exported, so every annotation survives the pass
        assert_eq!(index.edge_count(), 6);
        assert_eq!(index.peak_count(), 3);
    }

    #[test]
    fn test_two_analytes_two_cliques_sorted_by_rt() {
        let a1 = peak(1, 0, 250.0);
        let b1 = peak(2, 1, 250.5);
        let a2 = peak(3, 0, 100.0);
        let b2 = peak(4, 1, 100.5);

        let mut index = SimilarityIndex::new();
        reciprocal(&mut index, &a1, &b1, 0.9);
        reciprocal(&mut index, &a2, &b2, 0.9);

        let mut finder = CliqueFinder::new(CliqueConfig::default()).unwrap();
        let outcome = finder
            .combine(
                &partitions(2),
                &[vec![a1, a2], vec![b1, b2]],
                1,
                &mut index,
            )
            .unwrap();

        // the late analyte was seeded first but must sort second
        assert_eq!(outcome.cliques.len(), 2);
        assert!(outcome.cliques[0].rt_mean() < outcome.cliques[1].rt_mean());
        assert!((outcome.cliques[0].rt_mean() - 100.25).abs() < 1e-9);
        assert!((outcome.cliques[1].rt_mean() - 250.25).abs() < 1e-9);
    }

    #[test]
    fn test_merge_conservation() {
        // two cliques of size two bridge via b1 and c1; the fold side
        // loses its partition 0 member to the slot conflict
        let a1 = peak(1, 0, 10.0);
        let a2 = peak(2, 0, 25.0);
        let b1 = peak(3, 1, 10.1);
        let c1 = peak(4, 2, 10.2);

        let mut index = SimilarityIndex::new();
        reciprocal(&mut index, &a1, &b1, 0.9);
        reciprocal(&mut index, &a2, &c1, 0.9);
        reciprocal(&mut index, &b1, &c1, 0.9);

        let mut finder = CliqueFinder::new(CliqueConfig::default()).unwrap();
        let outcome = finder
            .combine(
                &partitions(3),
                &[vec![a1, a2.clone()], vec![b1], vec![c1]],
                1,
                &mut index,
            )
            .unwrap();

        assert_eq!(outcome.cliques.len(), 1);
        let clique = &outcome.cliques[0];
        assert_eq!(clique.size(), 3);
        let member_ids: Vec<PeakId> =
            clique.member_list().iter().map(|p| p.id).collect();
        assert_eq!(member_ids, vec![1, 3, 4]);

        // sizes 2 + 2 merged into 3, so exactly one peak fell out
        assert_eq!(outcome.incompatible.len(), 1);
        assert_eq!(outcome.incompatible[0].id, a2.id);
        // the incompatible peak is not double-reported as unassigned
        assert!(outcome.unassigned.is_empty());
        assert!(!outcome.peak_to_clique.contains_key(&a2.id));

        // the exported peak's outgoing annotations are gone, the member
        // annotations stay behind
        assert!(index.partition_of(a2.id).is_none());
        assert!(index.best_match(a2.id, 2).is_none());
        assert_eq!(index.peak_count(), 3);
    }

    #[test]
    fn test_unassigned_peak_reported() {
        let a1 = peak(1, 0, 10.0);
        let lonely = peak(2, 0, 50.0);
        let b1 = peak(3, 1, 10.1);

        let mut index = SimilarityIndex::new();
        reciprocal(&mut index, &a1, &b1, 0.9);
        index.register_peak(&lonely);

        let mut finder = CliqueFinder::new(CliqueConfig::default()).unwrap();
        let outcome = finder
            .combine(
                &partitions(2),
                &[vec![a1, lonely.clone()], vec![b1]],
                1,
                &mut index,
            )
            .unwrap();

        assert_eq!(outcome.cliques.len(), 1);
        assert_eq!(outcome.unassigned.len(), 1);
        assert_eq!(outcome.unassigned[0].id, lonely.id);
        assert!(outcome.incompatible.is_empty());

        // only the exported peak loses its annotations
        assert!(index.partition_of(lonely.id).is_none());
        assert_eq!(index.peak_count(), 2);
        assert_eq!(index.edge_count(), 2);
    }

    #[test]
    fn test_infinite_similarity_aborts() {
        let a1 = peak(1, 0, 10.0);
        let b1 = peak(2, 1, 10.1);

        let mut index = SimilarityIndex::new();
        reciprocal(&mut index, &a1, &b1, f64::INFINITY);

        let mut finder = CliqueFinder::new(CliqueConfig::default()).unwrap();
        let err = finder
            .combine(&partitions(2), &[vec![a1], vec![b1]], 1, &mut index)
            .unwrap_err();

        match err {
            AlignmentError::InfiniteSimilarity {
                left_peak,
                left_partition,
                right_peak,
                right_partition,
            } => {
                assert_eq!(left_peak, 1);
                assert_eq!(left_partition, "run_0");
                assert_eq!(right_peak, 2);
                assert_eq!(right_partition, "run_1");
            }
            other => panic!("expected InfiniteSimilarity, got {:?}", other),
        }
    }

    #[test]
    fn test_combine_is_deterministic() {
        let a1 = peak(1, 0, 10.0);
        let a2 = peak(2, 0, 25.0);
        let b1 = peak(3, 1, 10.1);
        let b2 = peak(4, 1, 24.9);
        let c1 = peak(5, 2, 10.2);

        let mut index = SimilarityIndex::new();
        reciprocal(&mut index, &a1, &b1, 0.9);
        reciprocal(&mut index, &a2, &b2, 0.8);
        reciprocal(&mut index, &b1, &c1, 0.7);
        reciprocal(&mut index, &a1, &c1, 0.7);

        let peaks = [vec![a1, a2], vec![b1, b2], vec![c1]];
        let parts = partitions(3);

        let mut first_index = index.clone();
        let mut first_finder = CliqueFinder::new(CliqueConfig::default()).unwrap();
        let first = first_finder
            .combine(&parts, &peaks, 1, &mut first_index)
            .unwrap();

        let mut second_index = index.clone();
        let mut second_finder = CliqueFinder::new(CliqueConfig::default()).unwrap();
        let second = second_finder
            .combine(&parts, &peaks, 1, &mut second_index)
            .unwrap();

        let ids = |outcome: &AlignmentOutcome| -> Vec<Vec<PeakId>> {
            outcome
                .cliques
                .iter()
                .map(|c| c.member_list().iter().map(|p| p.id).collect())
                .collect()
        };
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.peak_to_clique, second.peak_to_clique);
        let peak_ids =
            |peaks: &[Arc<Peak>]| -> Vec<PeakId> { peaks.iter().map(|p| p.id).collect() };
        assert_eq!(peak_ids(&first.incompatible), peak_ids(&second.incompatible));
        assert_eq!(peak_ids(&first.unassigned), peak_ids(&second.unassigned));
    }

    #[test]
    fn test_cliques_of_min_size() {
        let a1 = peak(1, 0, 10.0);
        let b1 = peak(2, 1, 10.1);
        let c1 = peak(3, 2, 10.2);
        let a2 = peak(4, 0, 50.0);
        let b2 = peak(5, 1, 50.1);

        let mut index = SimilarityIndex::new();
        reciprocal(&mut index, &a1, &b1, 0.9);
        reciprocal(&mut index, &a1, &c1, 0.9);
        reciprocal(&mut index, &b1, &c1, 0.9);
        reciprocal(&mut index, &a2, &b2, 0.9);

        let mut finder = CliqueFinder::new(CliqueConfig::default()).unwrap();
        let outcome = finder
            .combine(
                &partitions(3),
                &[vec![a1, a2], vec![b1, b2], vec![c1]],
                3,
                &mut index,
            )
            .unwrap();

        assert_eq!(outcome.cliques.len(), 2);
        let large = outcome.cliques_of_min_size(3);
        assert_eq!(large.len(), 1);
        assert_eq!(large[0].size(), 3);
    }

    #[test]
    fn test_merge_with_husk_is_noop() {
        let a1 = peak(1, 0, 10.0);
        let b1 = peak(2, 1, 10.1);
        let index = {
            let mut index = SimilarityIndex::new();
            reciprocal(&mut index, &a1, &b1, 0.9);
            index
        };

        let mut cliques = vec![
            Clique::new(0, 1.0, VarianceMode::Legacy).unwrap(),
            Clique::new(1, 1.0, VarianceMode::Legacy).unwrap(),
        ];
        assert!(cliques[0].add(&index, &a1, false));
        assert!(cliques[0].add(&index, &b1, false));
        // slot 1 stays an empty husk

        let mut owner: HashMap<PeakId, usize> = HashMap::new();
        owner.insert(1, 0);
        owner.insert(2, 0);
        let mut incompatible = Vec::new();
        let mut incompatible_ids = HashSet::new();

        let merged = merge_cliques(
            &index,
            0,
            1,
            &mut cliques,
            &mut owner,
            &mut incompatible,
            &mut incompatible_ids,
        );
        assert!(!merged);
        assert_eq!(cliques[0].size(), 2);
        assert!(incompatible.is_empty());
        assert_eq!(owner.len(), 2);
    }
}
