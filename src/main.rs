use std::sync::Arc;

use chromalign::algorithm::clique_finder::{CliqueConfig, CliqueFinder};
use chromalign::algorithm::clique_table::CliqueTable;
use chromalign::algorithm::scoring::{build_similarity_index, RtWeightedCosine, SimilarityOpts};
use chromalign::data::peak::{Partition, Peak};
use chromalign::error::AlignmentError;

fn main() -> Result<(), AlignmentError> {
    // three runs, two analytes around 100 s and 250 s
    let partitions = vec![
        Partition::new(0, "run_a".to_string()),
        Partition::new(1, "run_b".to_string()),
        Partition::new(2, "run_c".to_string()),
    ];
    let peaks = vec![
        vec![
            Arc::new(Peak::new(1, 0, "run_a".to_string(), 100.0, 1000, vec![1.0, 5.0, 1.0])),
            Arc::new(Peak::new(2, 0, "run_a".to_string(), 251.0, 2510, vec![3.0, 1.0, 0.5])),
        ],
        vec![
            Arc::new(Peak::new(3, 1, "run_b".to_string(), 101.5, 1015, vec![1.1, 5.2, 0.9])),
            Arc::new(Peak::new(4, 1, "run_b".to_string(), 249.0, 2490, vec![2.9, 1.2, 0.4])),
        ],
        vec![
            Arc::new(Peak::new(5, 2, "run_c".to_string(), 99.0, 990, vec![0.9, 4.8, 1.2])),
        ],
    ];

    let function = RtWeightedCosine::new(10.0)?;
    let mut index =
        build_similarity_index(&partitions, &peaks, &function, SimilarityOpts::default())?;

    let mut finder = CliqueFinder::new(CliqueConfig::default())?;
    let outcome = finder.combine(&partitions, &peaks, 2, &mut index)?;

    for clique in &outcome.cliques {
        println!("{}", clique);
        for member in clique.member_list() {
            println!("  {}", member);
        }
    }
    println!("incompatible: {}", outcome.incompatible.len());
    println!("unassigned: {}", outcome.unassigned.len());

    let table = CliqueTable::new(&outcome.cliques, &partitions);
    println!(
        "run_a appears in {} cliques, run_a and run_b share {}",
        table.partition_member_count(0),
        table.cliques_spanning(0, 1).len()
    );
    Ok(())
}
