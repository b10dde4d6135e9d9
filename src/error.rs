//! Error types for the alignment core.

use thiserror::Error;

use crate::data::peak::PeakId;

/// Errors that can occur while building or combining cliques.
#[derive(Debug, Error)]
pub enum AlignmentError {
    /// Minimum BBH fraction outside the half-open interval (0, 1].
    #[error("Invalid minimum BBH fraction: must be in (0, 1], got {0}")]
    InvalidBbhFraction(f64),

    /// Non-positive or non-finite retention time bandwidth.
    #[error("Invalid retention time sigma: must be positive and finite, got {0}")]
    InvalidRtSigma(f64),

    /// Partition list and peak list table disagree in length.
    #[error("Partition count mismatch: expected {expected}, actual {actual}")]
    PartitionCountMismatch {
        /// Number of partitions supplied
        expected: usize,
        /// Number of peak lists supplied
        actual: usize,
    },

    /// An infinite similarity score surfaced during combination. This
    /// signals a broken upstream similarity function and aborts the run.
    #[error(
        "Infinite similarity between peak {left_peak} ({left_partition}) and peak {right_peak} ({right_partition})"
    )]
    InfiniteSimilarity {
        /// Source peak of the offending edge
        left_peak: PeakId,
        /// Name of the source peak's partition
        left_partition: String,
        /// Target peak of the offending edge
        right_peak: PeakId,
        /// Name of the target peak's partition
        right_partition: String,
    },
}
