// src/frame.rs
//! Conversions between polars DataFrames and the raking engine's types.
//!
//! A constraint frame holds one column per scope dimension plus a numeric
//! mass column. Every other column is taken as part of the scope.

use std::collections::BTreeSet;

use ipf_rs::{
    aggregate_duplicates, normalize_constraint, rake, BaseTableBuilder, ConstraintTable,
    Dimension, DimensionCatalog, IpfOptions, RakeReport, ValidCombinations, WeightedTable,
    WeightingError,
};
use polars::prelude::*;
use tracing::{debug, warn};

use crate::error::{FrameError, FrameResult};

/// Mass column names tried in order when none is given.
pub const VALUE_COLUMNS: [&str; 2] = ["total", "value"];

/// A constraint frame plus the name reported in diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct ConstraintFrame<'a> {
    pub name: &'a str,
    pub frame: &'a DataFrame,
    /// Mass column; falls back to [`VALUE_COLUMNS`].
    pub value_col: Option<&'a str>,
}

impl<'a> ConstraintFrame<'a> {
    pub fn new(name: &'a str, frame: &'a DataFrame) -> Self {
        Self {
            name,
            frame,
            value_col: None,
        }
    }

    pub fn with_value_col(mut self, value_col: &'a str) -> Self {
        self.value_col = Some(value_col);
        self
    }
}

/// Weighted output frame and the run's diagnostics.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub frame: DataFrame,
    pub report: RakeReport,
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

fn resolve_value_column(df: &DataFrame, frame: &str, requested: Option<&str>) -> FrameResult<String> {
    match requested {
        Some(col) if has_column(df, col) => Ok(col.to_string()),
        Some(col) => Err(FrameError::InvalidFrame {
            frame: frame.to_string(),
            reason: format!("value column '{}' not found", col),
        }),
        None => VALUE_COLUMNS
            .iter()
            .find(|c| has_column(df, c))
            .map(|c| c.to_string())
            .ok_or_else(|| FrameError::InvalidFrame {
                frame: frame.to_string(),
                reason: format!("no value column, expected one of {:?}", VALUE_COLUMNS),
            }),
    }
}

fn scope_columns(df: &DataFrame, value_col: &str) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .filter(|c| c.as_str() != value_col)
        .map(|c| c.to_string())
        .collect()
}

fn string_column(df: &DataFrame, name: &str) -> FrameResult<StringChunked> {
    let col = df.column(name)?.cast(&DataType::String)?;
    Ok(col.str()?.clone())
}

fn float_column(df: &DataFrame, name: &str) -> FrameResult<Float64Chunked> {
    let col = df.column(name)?.cast(&DataType::Float64)?;
    Ok(col.f64()?.clone())
}

/// Scope tuple of row `i`. A null anywhere in the tuple is a configuration error.
fn row_key(columns: &[StringChunked], names: &[String], i: usize, context: &str) -> FrameResult<Vec<String>> {
    columns
        .iter()
        .zip(names)
        .map(|(ca, name)| {
            ca.get(i).map(str::to_string).ok_or_else(|| {
                WeightingError::Configuration(format!(
                    "{}: null in column '{}' at row {}",
                    context, name, i
                ))
                .into()
            })
        })
        .collect()
}

/// Read a constraint frame into a normalized [`ConstraintTable`].
///
/// Rows with a null mass are dropped. Rows sharing a scope tuple are summed
/// before normalizing.
pub fn constraint_from_frame(
    df: &DataFrame,
    name: &str,
    value_col: Option<&str>,
) -> FrameResult<ConstraintTable> {
    let value_col = resolve_value_column(df, name, value_col)?;
    let scope = scope_columns(df, &value_col);
    if scope.is_empty() {
        return Err(FrameError::InvalidFrame {
            frame: name.to_string(),
            reason: "no scope columns besides the value column".to_string(),
        });
    }

    let keys = scope
        .iter()
        .map(|c| string_column(df, c))
        .collect::<FrameResult<Vec<_>>>()?;
    let values = float_column(df, &value_col)?;

    let context = format!("constraint '{}'", name);
    let mut table = ConstraintTable::new(name, scope.iter().cloned());
    let mut dropped = 0usize;

    for (i, value) in values.into_iter().enumerate() {
        let Some(value) = value else {
            dropped += 1;
            continue;
        };
        table.push(row_key(&keys, &scope, i, &context)?, value)?;
    }

    if dropped > 0 {
        warn!(constraint = name, dropped, "dropped rows with a missing value");
    }
    debug!(constraint = name, scope = ?scope, rows = table.len(), "constraint read from frame");

    Ok(normalize_constraint(&aggregate_duplicates(&table)))
}

/// Read a valid-combination filter; every column is a filter dimension.
pub fn filter_from_frame(df: &DataFrame) -> FrameResult<ValidCombinations> {
    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|c| c.to_string())
        .collect();
    let columns = names
        .iter()
        .map(|c| string_column(df, c))
        .collect::<FrameResult<Vec<_>>>()?;

    let mut filter = ValidCombinations::new(names.iter().cloned());
    for i in 0..df.height() {
        filter.insert(row_key(&columns, &names, i, "valid-combination filter")?)?;
    }
    Ok(filter)
}

/// Derive a catalog from constraint frames.
///
/// Dimensions are ordered by first appearance; each dimension's values are
/// the sorted union of the non-null values seen in any frame.
pub fn catalog_from_frames(frames: &[ConstraintFrame<'_>]) -> FrameResult<DimensionCatalog> {
    let mut order: Vec<String> = Vec::new();
    let mut values: Vec<BTreeSet<String>> = Vec::new();

    for cf in frames {
        let value_col = resolve_value_column(cf.frame, cf.name, cf.value_col)?;
        for name in scope_columns(cf.frame, &value_col) {
            let ca = string_column(cf.frame, &name)?;
            let slot = match order.iter().position(|n| *n == name) {
                Some(slot) => slot,
                None => {
                    order.push(name);
                    values.push(BTreeSet::new());
                    order.len() - 1
                }
            };
            values[slot].extend(ca.into_iter().flatten().map(str::to_string));
        }
    }

    let dimensions = order
        .into_iter()
        .zip(values)
        .map(|(name, vals)| Dimension::new(name, vals))
        .collect::<Result<Vec<_>, WeightingError>>()?;
    Ok(DimensionCatalog::new(dimensions)?)
}

/// Build a catalog from `(name, values)` pairs, keeping the given order.
pub fn catalog_from_values(dimensions: Vec<(String, Vec<String>)>) -> FrameResult<DimensionCatalog> {
    let dimensions = dimensions
        .into_iter()
        .map(|(name, values)| Dimension::new(name, values))
        .collect::<Result<Vec<_>, WeightingError>>()?;
    Ok(DimensionCatalog::new(dimensions)?)
}

/// One string column per dimension plus the weight column.
pub fn table_to_frame(table: &WeightedTable) -> FrameResult<DataFrame> {
    let mut columns: Vec<Column> = table
        .dimension_names()
        .into_iter()
        .map(|name| Column::new(name.into(), table.column(name).unwrap_or_default()))
        .collect();
    columns.push(Column::new(
        table.weight_column().into(),
        table.weights().to_vec(),
    ));
    Ok(DataFrame::new(columns)?)
}

/// Per-iteration maximum deviation, one row per iteration.
pub fn history_to_frame(report: &RakeReport) -> FrameResult<DataFrame> {
    let iteration: Vec<u32> = (1..=report.deviation_history.len() as u32).collect();
    Ok(df![
        "iteration" => iteration,
        "max_deviation" => report.deviation_history.clone(),
    ]?)
}

/// Target versus achieved mass for each row of `constraint`.
pub fn residuals_to_frame(table: &WeightedTable, constraint: &ConstraintTable) -> FrameResult<DataFrame> {
    let residuals = table.residuals(constraint)?;

    let mut columns: Vec<Column> = constraint
        .scope()
        .iter()
        .enumerate()
        .map(|(pos, name)| {
            let values: Vec<&str> = residuals.iter().map(|r| r.key[pos].as_str()).collect();
            Column::new(name.as_str().into(), values)
        })
        .collect();
    columns.push(Column::new("target".into(), residuals.iter().map(|r| r.target).collect::<Vec<_>>()));
    columns.push(Column::new("achieved".into(), residuals.iter().map(|r| r.achieved).collect::<Vec<_>>()));
    columns.push(Column::new("abs_diff".into(), residuals.iter().map(|r| r.abs_diff).collect::<Vec<_>>()));
    columns.push(Column::new("reachable".into(), residuals.iter().map(|r| r.reachable).collect::<Vec<_>>()));

    Ok(DataFrame::new(columns)?)
}

/// Build the base table, read the constraint frames, rake, and return the weighted frame.
pub fn rake_frames(
    catalog: &DimensionCatalog,
    constraints: &[ConstraintFrame<'_>],
    filter: Option<&DataFrame>,
    options: IpfOptions,
) -> FrameResult<FrameOutcome> {
    let filter = filter.map(filter_from_frame).transpose()?;

    let mut builder = BaseTableBuilder::new(catalog);
    if let Some(filter) = &filter {
        builder = builder.with_filter(filter);
    }
    let base = builder.build()?;

    let tables = constraints
        .iter()
        .map(|c| constraint_from_frame(c.frame, c.name, c.value_col))
        .collect::<FrameResult<Vec<_>>>()?;

    let outcome = rake(base, &tables, options)?;
    Ok(FrameOutcome {
        frame: table_to_frame(&outcome.table)?,
        report: outcome.report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ab_frame() -> DataFrame {
        df![
            "A" => ["a1", "a1", "a2", "a2"],
            "B" => ["b1", "b2", "b1", "b2"],
            "value" => [40.0, 30.0, 20.0, 10.0],
        ]
        .unwrap()
    }

    #[test]
    fn test_constraint_from_frame() {
        let table = constraint_from_frame(&ab_frame(), "ab", None).unwrap();

        assert_eq!(table.scope(), ["A".to_string(), "B".to_string()]);
        assert_eq!(table.len(), 4);
        assert_relative_eq!(table.total(), 1.0, epsilon = 1e-12);
        assert_eq!(table.rows()[0].key, vec!["a1", "b1"]);
        assert_relative_eq!(table.rows()[0].value, 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_total_column_preferred() {
        let df = df![
            "Gender" => ["M", "F"],
            "value" => [1.0, 1.0],
            "total" => [30.0, 70.0],
        ]
        .unwrap();

        // `value` is not the mass column here, so it joins the scope
        let table = constraint_from_frame(&df, "g", None).unwrap();
        assert_eq!(table.scope(), ["Gender".to_string(), "value".to_string()]);
        assert_relative_eq!(table.rows()[1].value, 0.7, epsilon = 1e-12);

        let explicit = constraint_from_frame(&df.drop("value").unwrap(), "g", Some("total")).unwrap();
        assert_eq!(explicit.scope(), ["Gender".to_string()]);
    }

    #[test]
    fn test_nulls_and_duplicates() {
        let df = df![
            "Age" => [20i32, 20, 25, 30],
            "value" => [Some(1.0), Some(2.0), None, Some(1.0)],
        ]
        .unwrap();

        let table = constraint_from_frame(&df, "age", None).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].key, vec!["20"]);
        assert_relative_eq!(table.rows()[0].value, 0.75, epsilon = 1e-12);

        let null_scope = df![
            "Gender" => [Some("M"), None],
            "value" => [1.0, 1.0],
        ]
        .unwrap();
        assert!(matches!(
            constraint_from_frame(&null_scope, "g", None),
            Err(FrameError::Weighting(WeightingError::Configuration(_)))
        ));
    }

    #[test]
    fn test_missing_value_column() {
        let df = df!["Gender" => ["M", "F"]].unwrap();
        assert!(matches!(
            constraint_from_frame(&df, "g", None),
            Err(FrameError::InvalidFrame { .. })
        ));
        assert!(matches!(
            constraint_from_frame(&ab_frame(), "ab", Some("count")),
            Err(FrameError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn test_catalog_from_frames() {
        let ab = ab_frame();
        let bc = df![
            "B" => ["b1", "b3"],
            "C" => ["c2", "c1"],
            "total" => [1.0, 1.0],
        ]
        .unwrap();

        let catalog =
            catalog_from_frames(&[ConstraintFrame::new("ab", &ab), ConstraintFrame::new("bc", &bc)])
                .unwrap();

        assert_eq!(catalog.names(), vec!["A", "B", "C"]);
        assert_eq!(catalog.dimension("B").unwrap().values(), ["b1", "b2", "b3"]);
        assert_eq!(catalog.dimension("C").unwrap().values(), ["c1", "c2"]);
    }

    #[test]
    fn test_catalog_from_values() {
        let catalog = catalog_from_values(vec![
            ("Gender".to_string(), vec!["M".to_string(), "F".to_string()]),
            ("Age".to_string(), vec!["20-24".to_string(), "85+".to_string()]),
        ])
        .unwrap();
        assert_eq!(catalog.names(), vec!["Gender", "Age"]);
        assert_eq!(catalog.dimension("Gender").unwrap().values(), ["M", "F"]);

        let repeated_value = catalog_from_values(vec![(
            "Gender".to_string(),
            vec!["M".to_string(), "M".to_string()],
        )]);
        assert!(matches!(
            repeated_value,
            Err(FrameError::Weighting(WeightingError::Configuration(_)))
        ));

        let repeated_dimension = catalog_from_values(vec![
            ("Gender".to_string(), vec!["M".to_string()]),
            ("Gender".to_string(), vec!["F".to_string()]),
        ]);
        assert!(matches!(
            repeated_dimension,
            Err(FrameError::Weighting(WeightingError::Configuration(_)))
        ));
    }

    #[test]
    fn test_rake_frames_round_trip() {
        let ab = ab_frame();
        let catalog = catalog_from_frames(&[ConstraintFrame::new("ab", &ab)]).unwrap();
        let filter = df![
            "A" => ["a1", "a1", "a2"],
            "B" => ["b1", "b2", "b1"],
        ]
        .unwrap();

        let outcome = rake_frames(
            &catalog,
            &[ConstraintFrame::new("ab", &ab)],
            Some(&filter),
            IpfOptions::default(),
        )
        .unwrap();

        assert!(outcome.report.converged);
        assert_eq!(outcome.report.unreachable_rows.len(), 1);

        let frame = &outcome.frame;
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.width(), 3);

        let weights = frame.column("Weight").unwrap().f64().unwrap();
        let total: f64 = weights.into_iter().flatten().sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
        assert_relative_eq!(weights.get(0).unwrap(), 0.4 / 0.9, epsilon = 1e-6);

        let history = history_to_frame(&outcome.report).unwrap();
        assert_eq!(history.height(), outcome.report.iterations);
    }

    #[test]
    fn test_residuals_to_frame() {
        let ab = ab_frame();
        let catalog = catalog_from_frames(&[ConstraintFrame::new("ab", &ab)]).unwrap();
        let constraint = constraint_from_frame(&ab, "ab", None).unwrap();
        let base = BaseTableBuilder::new(&catalog).build().unwrap();
        let outcome = rake(base, &[constraint.clone()], IpfOptions::default()).unwrap();

        let residuals = residuals_to_frame(&outcome.table, &constraint).unwrap();
        assert_eq!(residuals.height(), 4);
        let diffs = residuals.column("abs_diff").unwrap().f64().unwrap();
        assert!(diffs.into_iter().flatten().all(|d| d < 1e-6));
    }
}
