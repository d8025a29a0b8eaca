// src/python.rs
use pyo3::prelude::*;
use pyo3_polars::PyDataFrame;
use polars::prelude::*;

use ipf_rs::IpfOptions;

use crate::error::{FrameError, FrameResult};
use crate::frame::{
    catalog_from_frames, catalog_from_values, rake_frames, ConstraintFrame, FrameOutcome,
};

fn to_py_err(e: FrameError) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string())
}

/// Raking (Iterative Proportional Fitting) of a joint table to constraint frames
///
/// `dimensions` lists `(name, values)` in output column order; when omitted the
/// catalog is derived from the constraint frames. Returns the weighted frame,
/// the convergence flag, the iteration count and the final max deviation.
#[pyfunction]
#[pyo3(signature = (constraints, dimensions=None, filter=None, value_col=None, convergence_rate=1e-6, max_iter=50, weight_col="Weight"))]
fn rake(
    py: Python<'_>,
    constraints: Vec<(String, PyDataFrame)>,
    dimensions: Option<Vec<(String, Vec<String>)>>,
    filter: Option<PyDataFrame>,
    value_col: Option<String>,
    convergence_rate: f64,
    max_iter: usize,
    weight_col: &str,
) -> PyResult<(PyDataFrame, bool, usize, f64)> {
    let frames: Vec<(String, DataFrame)> = constraints
        .into_iter()
        .map(|(name, df)| (name, df.into()))
        .collect();
    let filter: Option<DataFrame> = filter.map(Into::into);

    let options = IpfOptions::default()
        .with_convergence_rate(convergence_rate)
        .with_max_iterations(max_iter)
        .with_weight_column(weight_col);

    let outcome = py
        .allow_threads(|| -> FrameResult<FrameOutcome> {
            let constraint_frames: Vec<ConstraintFrame<'_>> = frames
                .iter()
                .map(|(name, df)| ConstraintFrame {
                    name,
                    frame: df,
                    value_col: value_col.as_deref(),
                })
                .collect();

            let catalog = match dimensions {
                Some(dims) => catalog_from_values(dims)?,
                None => catalog_from_frames(&constraint_frames)?,
            };

            rake_frames(&catalog, &constraint_frames, filter.as_ref(), options)
        })
        .map_err(to_py_err)?;

    Ok((
        PyDataFrame(outcome.frame),
        outcome.report.converged,
        outcome.report.iterations,
        outcome.report.max_deviation,
    ))
}

#[pymodule]
fn _internal(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(rake, m)?)?;
    Ok(())
}
