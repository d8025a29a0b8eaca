// src/weighting/mod.rs

pub mod utils;
pub mod normalization;
pub mod options;
pub mod raking;
pub mod finalize;

// Re-export main implementations for easier access
pub use utils::{Result, WeightingError};
pub use normalization::{aggregate_duplicates, normalize_constraint, ConstraintRow, ConstraintTable};
pub use options::IpfOptions;
pub use raking::{rake, rake_parallel, IpfEngine, RakeOutcome, RakeReport, UnreachableRow};
pub use finalize::{finalize_weights, FinalizeReport, Residual, WeightSummary, WeightedTable};
