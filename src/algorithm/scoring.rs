use std::sync::Arc;

use itertools::Itertools;
use nalgebra::DVector;
use rayon::prelude::*;
use statrs::distribution::{Continuous, Normal};

use crate::data::peak::{Partition, Peak};
use crate::data::similarity::SimilarityIndex;
use crate::error::AlignmentError;

/// Scores the similarity of two peaks, higher is better.
///
/// Implementations are consulted once per peak pair and the result is
/// used for both directions, so the function should be symmetric. `Sync`
/// lets one instance serve all scoring workers.
pub trait SimilarityFunction: Sync {
    fn score(&self, a: &Peak, b: &Peak) -> f64;
}

/// Cosine similarity of the intensity summaries, weighted by a Gaussian
/// penalty on the retention time difference.
///
/// The weight is `pdf(Δrt) / pdf(0)` of a zero-mean normal with the
/// configured bandwidth, so two identical peaks at the same retention
/// time score exactly 1.0 and the score decays toward 0.0 with growing
/// distance.
#[derive(Clone, Debug)]
pub struct RtWeightedCosine {
    rt_kernel: Normal,
    peak_density: f64,                 // pdf at zero, normalizes the weight
}

impl RtWeightedCosine {
    /// Creates the function with the given retention time bandwidth in
    /// seconds. Fails for a non-positive or non-finite bandwidth.
    pub fn new(rt_sigma: f64) -> Result<RtWeightedCosine, AlignmentError> {
        if !rt_sigma.is_finite() || rt_sigma <= 0.0 {
            return Err(AlignmentError::InvalidRtSigma(rt_sigma));
        }
        let rt_kernel =
            Normal::new(0.0, rt_sigma).map_err(|_| AlignmentError::InvalidRtSigma(rt_sigma))?;
        let peak_density = rt_kernel.pdf(0.0);
        Ok(RtWeightedCosine {
            rt_kernel,
            peak_density,
        })
    }
}

impl SimilarityFunction for RtWeightedCosine {
    fn score(&self, a: &Peak, b: &Peak) -> f64 {
        let shape = cosine_similarity(&a.intensity, &b.intensity);
        if shape <= 0.0 {
            return 0.0;
        }
        let dt = a.retention_time - b.retention_time;
        shape * self.rt_kernel.pdf(dt) / self.peak_density
    }
}

/// Cosine similarity of two equally sized vectors. Mismatched lengths,
/// empty input and zero-norm vectors all read 0.0.
///
/// # Example
///
/// ```
/// use chromalign::algorithm::scoring::cosine_similarity;
///
/// let sim = cosine_similarity(&[1.0, 2.0, 1.0], &[2.0, 4.0, 2.0]);
/// assert!((sim - 1.0).abs() < 1e-12);
/// assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
/// ```
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let va = DVector::from_column_slice(a);
    let vb = DVector::from_column_slice(b);
    let denom = va.norm() * vb.norm();
    if denom == 0.0 {
        return 0.0;
    }
    va.dot(&vb) / denom
}

/// Options for building the best-match index.
#[derive(Clone, Copy, Debug)]
pub struct SimilarityOpts {
    pub rt_cutoff: f64,                // max |Δrt| in seconds scored at all
}

impl Default for SimilarityOpts {
    fn default() -> Self {
        SimilarityOpts { rt_cutoff: 60.0 }
    }
}

/// Builds the best-match index for all partition pairs.
///
/// Every unordered pair of partitions is scored as one independent task
/// on the rayon pool. A task scans the cross product of the two peak
/// lists once, applies the retention time cutoff before calling the
/// similarity function and keeps, per source peak, only the best scoring
/// edge in each direction inside its own local buffer. The buffers are
/// folded into the index sequentially afterwards, so equal scores always
/// resolve the same way.
pub fn build_similarity_index(
    partitions: &[Partition],
    peaks_by_partition: &[Vec<Arc<Peak>>],
    function: &dyn SimilarityFunction,
    opts: SimilarityOpts,
) -> Result<SimilarityIndex, AlignmentError> {
    if partitions.len() != peaks_by_partition.len() {
        return Err(AlignmentError::PartitionCountMismatch {
            expected: partitions.len(),
            actual: peaks_by_partition.len(),
        });
    }
    let pairs: Vec<(usize, usize)> = (0..partitions.len()).tuple_combinations().collect();

    let buffers: Vec<Vec<(Arc<Peak>, Arc<Peak>, f64)>> = pairs
        .par_iter()
        .map(|&(i, j)| score_pair(&peaks_by_partition[i], &peaks_by_partition[j], function, opts))
        .collect();

    let mut index = SimilarityIndex::new();
    for peaks in peaks_by_partition {
        for peak in peaks {
            index.register_peak(peak);
        }
    }
    for buffer in buffers {
        for (source, target, score) in buffer {
            index.add_edge(&source, &target, score);
        }
    }
    Ok(index)
}

// one task: best edges in both directions for a single partition pair
fn score_pair(
    left: &[Arc<Peak>],
    right: &[Arc<Peak>],
    function: &dyn SimilarityFunction,
    opts: SimilarityOpts,
) -> Vec<(Arc<Peak>, Arc<Peak>, f64)> {
    let mut best_left: Vec<Option<(usize, f64)>> = vec![None; left.len()];
    let mut best_right: Vec<Option<(usize, f64)>> = vec![None; right.len()];

    for (i, p) in left.iter().enumerate() {
        for (j, q) in right.iter().enumerate() {
            if (p.retention_time - q.retention_time).abs() > opts.rt_cutoff {
                continue;
            }
            let score = function.score(p, q);
            if best_left[i].map_or(true, |(_, s)| score > s) {
                best_left[i] = Some((j, score));
            }
            if best_right[j].map_or(true, |(_, s)| score > s) {
                best_right[j] = Some((i, score));
            }
        }
    }

    let mut edges: Vec<(Arc<Peak>, Arc<Peak>, f64)> =
        Vec::with_capacity(left.len() + right.len());
    for (i, best) in best_left.iter().enumerate() {
        if let Some((j, score)) = best {
            edges.push((left[i].clone(), right[*j].clone(), *score));
        }
    }
    for (j, best) in best_right.iter().enumerate() {
        if let Some((i, score)) = best {
            edges.push((right[j].clone(), left[*i].clone(), *score));
        }
    }
    edges
}
