use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::algorithm::bbh::bbh_partner_count;
use crate::data::peak::{PartitionId, Peak, PeakId};
use crate::data::similarity::SimilarityIndex;
use crate::error::AlignmentError;

// Stable 64-bit id for cliques, unique within one finder run
pub type CliqueId = i64;

/// Divisor applied when turning the running M2 accumulator into a
/// variance.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum VarianceMode {
    /// Divide by (n - 2), the historical behavior of this tool chain.
    /// Reads 0.0 below three members, where the estimator is undefined.
    Legacy,
    /// Divide by (n - 1), the textbook sample variance.
    Sample,
}

impl Default for VarianceMode {
    fn default() -> Self {
        VarianceMode::Legacy
    }
}

/// Represents one cross-sample cluster of peaks, at most one per
/// partition.
///
/// Retention time mean and variance are maintained incrementally on every
/// add and remove (Welford update and its inverse), the centroid is the
/// medoid of the current members. `bbh_errors` accumulates, over all
/// non-forced admissions, how many already present members were not
/// reciprocal best hits of the incoming peak; removals subtract the same
/// quantity measured at removal time, so the counter is signed.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use chromalign::algorithm::clique::{Clique, VarianceMode};
/// use chromalign::data::peak::Peak;
/// use chromalign::data::similarity::SimilarityIndex;
///
/// let a = Arc::new(Peak::new(1, 0, "run_a".to_string(), 10.0, 100, vec![1.0]));
/// let b = Arc::new(Peak::new(2, 1, "run_b".to_string(), 10.2, 101, vec![1.0]));
///
/// let mut index = SimilarityIndex::new();
/// index.add_edge(&a, &b, 0.9);
/// index.add_edge(&b, &a, 0.9);
///
/// let mut clique = Clique::new(0, 1.0, VarianceMode::Legacy).unwrap();
/// assert!(clique.add(&index, &a, false));
/// assert!(clique.add(&index, &b, false));
/// assert_eq!(clique.size(), 2);
/// assert!((clique.rt_mean() - 10.1).abs() < 1e-9);
/// ```
#[derive(Clone, Debug)]
pub struct Clique {
    id: CliqueId,
    members: HashMap<PartitionId, Arc<Peak>>,
    rt_mean: f64,
    rt_m2: f64,                        // Welford accumulator
    centroid: Option<Arc<Peak>>,
    bbh_errors: i64,
    min_bbh_fraction: f64,
    variance_mode: VarianceMode,
}

impl Clique {
    /// Creates an empty clique. Fails right away when `min_bbh_fraction`
    /// is outside (0, 1], before any peak is touched.
    pub fn new(
        id: CliqueId,
        min_bbh_fraction: f64,
        variance_mode: VarianceMode,
    ) -> Result<Clique, AlignmentError> {
        if !(min_bbh_fraction > 0.0 && min_bbh_fraction <= 1.0) {
            return Err(AlignmentError::InvalidBbhFraction(min_bbh_fraction));
        }
        Ok(Clique {
            id,
            members: HashMap::new(),
            rt_mean: 0.0,
            rt_m2: 0.0,
            centroid: None,
            bbh_errors: 0,
            min_bbh_fraction,
            variance_mode,
        })
    }

    pub fn id(&self) -> CliqueId {
        self.id
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn rt_mean(&self) -> f64 {
        self.rt_mean
    }

    /// Variance of the member retention times under the configured
    /// divisor. Empty and singleton cliques read 0.0 in both modes.
    pub fn rt_variance(&self) -> f64 {
        let n = self.members.len();
        match self.variance_mode {
            VarianceMode::Legacy => {
                if n < 3 {
                    0.0
                } else {
                    self.rt_m2 / (n as f64 - 2.0)
                }
            }
            VarianceMode::Sample => {
                if n < 2 {
                    0.0
                } else {
                    self.rt_m2 / (n as f64 - 1.0)
                }
            }
        }
    }

    pub fn bbh_errors(&self) -> i64 {
        self.bbh_errors
    }

    pub fn centroid(&self) -> Option<&Arc<Peak>> {
        self.centroid.as_ref()
    }

    pub fn member_for_partition(&self, partition: PartitionId) -> Option<&Arc<Peak>> {
        self.members.get(&partition)
    }

    /// Members sorted by partition name, for deterministic output.
    pub fn member_list(&self) -> Vec<Arc<Peak>> {
        let mut members: Vec<Arc<Peak>> = self.members.values().cloned().collect();
        members.sort_by(|a, b| {
            a.partition_name
                .cmp(&b.partition_name)
                .then_with(|| a.partition.cmp(&b.partition))
        });
        members
    }

    /// Number of pairwise best-hit edges a fully consistent group of `n`
    /// members would exhibit.
    ///
    /// # Example
    ///
    /// ```
    /// use chromalign::algorithm::clique::Clique;
    ///
    /// assert_eq!(Clique::expected_bbh_count(4), 6);
    /// assert_eq!(Clique::expected_bbh_count(1), 0);
    /// ```
    #[inline]
    pub fn expected_bbh_count(n: usize) -> usize {
        n * n.saturating_sub(1) / 2
    }

    /// Adds `peak` to the clique.
    ///
    /// Without `force`, an empty partition slot runs the admission test
    /// (the fraction of current members that are reciprocal best hits of
    /// the candidate must reach the configured minimum), an occupied slot
    /// triggers conflict resolution against the incumbent. With `force`,
    /// used while merging cliques, an empty slot accepts unconditionally
    /// and an occupied slot rejects; a forced add never displaces and
    /// never touches the error counter.
    ///
    /// Re-adding a peak that already occupies its slot succeeds with no
    /// change in either mode.
    ///
    /// Returns whether the peak is a member afterwards.
    pub fn add(&mut self, index: &SimilarityIndex, peak: &Arc<Peak>, force: bool) -> bool {
        if force {
            return self.add_forced(peak);
        }

        // Conflict resolution runs as a bounded loop: every round either
        // settles the slot or evicts the incumbent, so the visited guard
        // can only trip on a logic error.
        let mut visited: HashSet<PeakId> = HashSet::new();
        loop {
            match self.members.get(&peak.partition) {
                None => return self.admit(index, peak),
                Some(incumbent) if incumbent.id == peak.id => return true,
                Some(incumbent) => {
                    if !visited.insert(incumbent.id) {
                        return false;
                    }
                    let incumbent = incumbent.clone();
                    if !self.candidate_beats_incumbent(index, peak, &incumbent) {
                        return false;
                    }
                    let evicted = self.remove(index, &incumbent);
                    debug_assert!(evicted);
                    // next round re-attempts the now-empty slot
                }
            }
        }
    }

    /// Removes the occupant of the peak's partition slot if it is this
    /// very peak. Returns whether a member was removed.
    pub fn remove(&mut self, index: &SimilarityIndex, peak: &Peak) -> bool {
        let occupied = self
            .members
            .get(&peak.partition)
            .map_or(false, |member| member.id == peak.id);
        if !occupied {
            return false;
        }
        let removed = match self.members.remove(&peak.partition) {
            Some(removed) => removed,
            None => return false,
        };
        if self.members.is_empty() {
            self.reset_state();
            return true;
        }
        let rest = self.members.len();
        let partners = bbh_partner_count(index, &removed, self.members.values());
        self.bbh_errors -= (rest - partners) as i64;
        self.stat_remove(removed.retention_time);
        self.recompute_centroid();
        true
    }

    /// Empties the clique and resets all statistics. The id is permanent.
    pub fn clear(&mut self) {
        self.members.clear();
        self.reset_state();
    }

    fn add_forced(&mut self, peak: &Arc<Peak>) -> bool {
        match self.members.get(&peak.partition) {
            Some(existing) if existing.id == peak.id => true,
            Some(_) => false,
            None => {
                self.insert_member(peak.clone());
                true
            }
        }
    }

    fn admit(&mut self, index: &SimilarityIndex, peak: &Arc<Peak>) -> bool {
        debug_assert!(!self.members.contains_key(&peak.partition));
        if !self.members.is_empty() {
            let actual = bbh_partner_count(index, peak, self.members.values());
            let fraction = actual as f64 / self.members.len() as f64;
            if fraction < self.min_bbh_fraction {
                return false;
            }
            self.bbh_errors += (self.members.len() - actual) as i64;
        }
        self.insert_member(peak.clone());
        true
    }

    /// Decides a slot conflict between a candidate and the sitting member.
    /// Support against the rest of the clique wins; a retention time
    /// closer to the current mean breaks nonzero ties. Everything else
    /// keeps the incumbent.
    fn candidate_beats_incumbent(
        &self,
        index: &SimilarityIndex,
        candidate: &Peak,
        incumbent: &Peak,
    ) -> bool {
        let rest: Vec<&Arc<Peak>> = self
            .members
            .values()
            .filter(|member| member.id != incumbent.id)
            .collect();
        let candidate_hits = bbh_partner_count(index, candidate, rest.iter().copied());
        let incumbent_hits = bbh_partner_count(index, incumbent, rest.iter().copied());
        if candidate_hits != incumbent_hits {
            return candidate_hits > incumbent_hits;
        }
        if candidate_hits == 0 {
            return false;
        }
        let candidate_dist = (candidate.retention_time - self.rt_mean).abs();
        let incumbent_dist = (incumbent.retention_time - self.rt_mean).abs();
        if candidate_dist < incumbent_dist {
            return true;
        }
        if candidate_dist > incumbent_dist {
            return false;
        }
        log::warn!(
            "unresolved conflict in clique {}: peak {} and peak {} tie on support and distance in partition {}, keeping the incumbent",
            self.id,
            candidate.id,
            incumbent.id,
            incumbent.partition_name
        );
        false
    }

    fn insert_member(&mut self, peak: Arc<Peak>) {
        let rt = peak.retention_time;
        self.members.insert(peak.partition, peak);
        self.stat_add(rt);
        self.recompute_centroid();
    }

    fn stat_add(&mut self, rt: f64) {
        let n = self.members.len() as f64;
        let delta = rt - self.rt_mean;
        self.rt_mean += delta / n;
        self.rt_m2 += delta * (rt - self.rt_mean);
    }

    // exact algebraic inverse of stat_add, clamped against rounding
    fn stat_remove(&mut self, rt: f64) {
        let n = self.members.len() as f64;
        debug_assert!(n >= 1.0);
        let delta = rt - self.rt_mean;
        self.rt_mean -= delta / n;
        self.rt_m2 -= delta * (rt - self.rt_mean);
        if self.rt_m2 < 0.0 {
            self.rt_m2 = 0.0;
        }
    }

    fn reset_state(&mut self) {
        self.rt_mean = 0.0;
        self.rt_m2 = 0.0;
        self.centroid = None;
        self.bbh_errors = 0;
    }

    // medoid: member with the smallest summed squared RT distance to the
    // others, ties resolve to the lowest partition id
    fn recompute_centroid(&mut self) {
        if self.members.is_empty() {
            self.centroid = None;
            return;
        }
        let mut members: Vec<&Arc<Peak>> = self.members.values().collect();
        members.sort_by_key(|member| member.partition);

        let mut best: Option<(&Arc<Peak>, f64)> = None;
        for candidate in &members {
            let spread: f64 = members
                .iter()
                .filter(|other| other.id != candidate.id)
                .map(|other| {
                    let d = candidate.retention_time - other.retention_time;
                    d * d
                })
                .sum();
            match best {
                Some((_, best_spread)) if spread >= best_spread => {}
                _ => best = Some((candidate, spread)),
            }
        }
        self.centroid = best.map(|(peak, _)| (*peak).clone());
    }
}

impl Display for Clique {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "Clique(id: {}, size: {}, rt mean: {:.4}, rt variance: {:.4}, bbh errors: {})",
            self.id,
            self.size(),
            self.rt_mean,
            self.rt_variance(),
            self.bbh_errors
        )
    }
}
