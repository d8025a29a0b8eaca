// src/error.rs

use ipf_rs::WeightingError;
use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Weighting(#[from] WeightingError),

    #[error("DataFrame error: {0}")]
    Polars(#[from] PolarsError),

    /// The frame's shape does not fit the requested conversion.
    #[error("Invalid frame '{frame}': {reason}")]
    InvalidFrame { frame: String, reason: String },
}

pub type FrameResult<T> = std::result::Result<T, FrameError>;
