use std::fmt;
use std::fmt::{Display, Formatter};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

// Stable 64-bit id for peaks
pub type PeakId = i64;
// Stable 32-bit id for partitions (input samples)
pub type PartitionId = i32;

/// Represents one input sample, typically a single chromatogram file.
///
/// The id fixes the iteration order of the alignment pass and the column
/// order of the presence table; the name is carried into diagnostics.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct Partition {
    pub id: PartitionId,               // stable id, fixes input order
    pub name: String,                  // display name, e.g. the file stem
}

impl Partition {
    pub fn new(id: PartitionId, name: String) -> Partition {
        Partition { id, name }
    }
}

impl Display for Partition {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Partition(id: {}, name: {})", self.id, self.name)
    }
}

/// Represents a single detected chromatographic peak.
///
/// The record is immutable once created and shared across cliques, result
/// sets and input lists via `Arc`. Identity is the id, never the
/// allocation: two records with the same id denote the same peak.
///
/// # Example
///
/// ```
/// use chromalign::data::peak::Peak;
///
/// let peak = Peak::new(1, 0, "run_a".to_string(), 102.5, 512, vec![1.0, 4.0, 1.0]);
/// assert_eq!(peak.partition, 0);
/// assert!((peak.retention_time - 102.5).abs() < 1e-9);
/// ```
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct Peak {
    pub id: PeakId,                    // unique across all partitions
    pub partition: PartitionId,        // owning partition, immutable
    pub partition_name: String,        // materialized for diagnostics
    pub retention_time: f64,           // apex acquisition time in seconds
    pub scan_index: i32,               // apex scan index in the source file
    pub intensity: Vec<f64>,           // opaque summary, read only by similarity functions
}

impl Peak {
    pub fn new(
        id: PeakId,
        partition: PartitionId,
        partition_name: String,
        retention_time: f64,
        scan_index: i32,
        intensity: Vec<f64>,
    ) -> Peak {
        Peak {
            id,
            partition,
            partition_name,
            retention_time,
            scan_index,
            intensity,
        }
    }
}

impl Display for Peak {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "Peak(id: {}, partition: {}, rt: {}, scan: {})",
            self.id, self.partition_name, self.retention_time, self.scan_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_display() {
        let peak = Peak::new(7, 1, "run_b".to_string(), 99.5, 480, vec![2.0]);
        let text = format!("{}", peak);
        assert_eq!(text, "Peak(id: 7, partition: run_b, rt: 99.5, scan: 480)");
    }

    #[test]
    fn test_partition_display() {
        let partition = Partition::new(3, "run_c".to_string());
        assert_eq!(format!("{}", partition), "Partition(id: 3, name: run_c)");
    }
}
