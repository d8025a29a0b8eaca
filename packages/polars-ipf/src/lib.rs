// src/lib.rs
//! polars front end for the `ipf-rs` raking engine.
//!
//! Constraint tables come in as DataFrames (scope columns plus a `total` or
//! `value` mass column) and the weighted joint table goes back out as one.
//! With the `python` feature the crate also builds the `_internal` extension
//! module.

mod error;
pub mod frame;

#[cfg(feature = "python")]
mod python;

pub use error::{FrameError, FrameResult};
pub use frame::{
    catalog_from_frames, catalog_from_values, constraint_from_frame, filter_from_frame,
    history_to_frame, rake_frames, residuals_to_frame, table_to_frame, ConstraintFrame,
    FrameOutcome, VALUE_COLUMNS,
};
