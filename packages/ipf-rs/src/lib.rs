// src/lib.rs
//! Iterative proportional fitting (raking) of a joint distribution over
//! categorical dimensions.
//!
//! A [`DimensionCatalog`] declares the dimensions and their values. A
//! [`BaseTableBuilder`] enumerates the admissible joint cells with uniform
//! weights. An [`IpfEngine`] then rescales the weights until the marginals
//! over each [`ConstraintTable`]'s scope match the targets.
//!
//! ```
//! use ipf_rs::{BaseTableBuilder, ConstraintTable, Dimension, DimensionCatalog, IpfOptions};
//! use ipf_rs::{normalize_constraint, rake};
//!
//! let catalog = DimensionCatalog::new(vec![
//!     Dimension::new("Gender", ["M", "F"])?,
//!     Dimension::new("Income", ["low", "high"])?,
//! ])?;
//! let base = BaseTableBuilder::new(&catalog).build()?;
//!
//! let gender = ConstraintTable::new("gender", ["Gender"])
//!     .with_row(["M"], 480.0)?
//!     .with_row(["F"], 520.0)?;
//!
//! let outcome = rake(base, &[normalize_constraint(&gender)], IpfOptions::default())?;
//! assert!(outcome.report.converged);
//! # Ok::<(), ipf_rs::WeightingError>(())
//! ```

pub mod base;
pub mod catalog;
pub mod weighting;

pub use base::{BaseTable, BaseTableBuilder, ValidCombinations, DEFAULT_MAX_CELLS};
pub use catalog::{Dimension, DimensionCatalog};
pub use weighting::{
    aggregate_duplicates, finalize_weights, normalize_constraint, rake, rake_parallel,
    ConstraintRow, ConstraintTable, FinalizeReport, IpfEngine, IpfOptions, RakeOutcome,
    RakeReport, Residual, Result, UnreachableRow, WeightSummary, WeightedTable, WeightingError,
};
