// data module
pub mod data {
    pub mod peak;
    pub mod similarity;
}

// algorithm module
pub mod algorithm {
    pub mod scoring;
    pub mod bbh;
    pub mod clique;
    pub mod clique_finder;
    pub mod clique_table;
}

// error module
pub mod error;
