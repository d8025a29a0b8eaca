// src/weighting/finalize.rs

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use tracing::info;

use super::normalization::ConstraintTable;
use super::utils::{check_weights, GroupIndex, Result, WeightingError};
use crate::catalog::DimensionCatalog;

/// What the finalizer did to the weight column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalizeReport {
    /// Weight sum before any correction.
    pub sum_before: f64,
    pub renormalized: bool,
}

/// Validate weights and restore a unit sum if drift exceeds `tolerance`.
///
/// Weights within tolerance are left untouched.
pub fn finalize_weights(weights: &mut Array1<f64>, tolerance: f64) -> Result<FinalizeReport> {
    check_weights(weights.view())?;

    let total = weights.sum();
    if total <= 0.0 {
        return Err(WeightingError::Numerical(
            "all weights are zero, nothing to renormalize".to_string(),
        ));
    }

    let renormalized = (total - 1.0).abs() > tolerance;
    if renormalized {
        weights.mapv_inplace(|w| w / total);
        info!(sum_before = total, "renormalized weights to sum to 1");
    }

    Ok(FinalizeReport {
        sum_before: total,
        renormalized,
    })
}

/// Summary statistics of a weight column.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSummary {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Distinct values present per dimension, in catalog order.
    pub distinct_values: Vec<(String, usize)>,
}

/// Target versus achieved mass for one constraint row.
#[derive(Debug, Clone, PartialEq)]
pub struct Residual {
    pub key: Vec<String>,
    pub target: f64,
    pub achieved: f64,
    pub abs_diff: f64,
    /// False when no cell of the table realizes the row's group.
    pub reachable: bool,
}

/// Final output: one row per joint cell plus its weight.
///
/// Rows keep the base table's order.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedTable {
    catalog: DimensionCatalog,
    codes: Array2<u32>,
    weights: Array1<f64>,
    weight_column: String,
}

impl WeightedTable {
    pub(crate) fn new(
        catalog: DimensionCatalog,
        codes: Array2<u32>,
        weights: Array1<f64>,
        weight_column: String,
    ) -> Self {
        Self {
            catalog,
            codes,
            weights,
            weight_column,
        }
    }

    pub fn catalog(&self) -> &DimensionCatalog {
        &self.catalog
    }

    pub fn dimension_names(&self) -> Vec<&str> {
        self.catalog.names()
    }

    pub fn weight_column(&self) -> &str {
        &self.weight_column
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    pub fn codes(&self) -> ArrayView2<'_, u32> {
        self.codes.view()
    }

    pub fn cell(&self, index: usize) -> Vec<&str> {
        self.codes
            .row(index)
            .iter()
            .zip(self.catalog.dimensions())
            .map(|(&code, dim)| dim.value(code))
            .collect()
    }

    /// Iterate over `(cell values, weight)` pairs.
    pub fn rows(&self) -> impl Iterator<Item = (Vec<&str>, f64)> + '_ {
        (0..self.len()).map(move |i| (self.cell(i), self.weights[i]))
    }

    /// Values of one dimension column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let pos = self.catalog.position(name)?;
        let dim = &self.catalog.dimensions()[pos];
        Some(self.codes.column(pos).iter().map(|&c| dim.value(c)).collect())
    }

    pub fn summary(&self) -> WeightSummary {
        let count = self.weights.len();
        let sum = self.weights.sum();
        let min = self.weights.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = self.weights.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = if count > 0 { sum / count as f64 } else { 0.0 };

        let distinct_values = self
            .catalog
            .dimensions()
            .iter()
            .enumerate()
            .map(|(pos, dim)| {
                let mut seen = vec![false; dim.len()];
                for &code in self.codes.column(pos) {
                    seen[code as usize] = true;
                }
                (dim.name().to_string(), seen.iter().filter(|&&s| s).count())
            })
            .collect();

        WeightSummary {
            count,
            sum,
            min,
            max,
            mean,
            distinct_values,
        }
    }

    /// Total weight per group over `scope`, groups in order of first appearance.
    pub fn marginal<S: AsRef<str>>(&self, scope: &[S]) -> Result<Vec<(Vec<String>, f64)>> {
        let positions = self.catalog.resolve_scope(scope, "marginal")?;
        let index = GroupIndex::build(self.codes.view(), &positions);
        let sums = super::utils::sum_by_group_1d(
            self.weights.view(),
            &index.cell_groups,
            index.n_groups(),
        );

        Ok(index
            .keys
            .iter()
            .zip(sums.iter())
            .map(|(key, &mass)| (self.catalog.decode(&positions, key), mass))
            .collect())
    }

    /// Compare every row of `constraint` with the mass this table assigns to it.
    ///
    /// Rows whose group has no cells report an achieved mass of zero.
    pub fn residuals(&self, constraint: &ConstraintTable) -> Result<Vec<Residual>> {
        let context = format!("constraint '{}'", constraint.name());
        let positions = self.catalog.resolve_scope(constraint.scope(), &context)?;
        let index = GroupIndex::build(self.codes.view(), &positions);
        let sums = super::utils::sum_by_group_1d(
            self.weights.view(),
            &index.cell_groups,
            index.n_groups(),
        );

        constraint
            .rows()
            .iter()
            .map(|row| {
                let key = self.catalog.encode(&positions, row.key.as_slice(), &context)?;
                let group = index.group_of(&key);
                let achieved = group.map(|g| sums[g]).unwrap_or(0.0);
                Ok(Residual {
                    key: row.key.clone(),
                    target: row.value,
                    achieved,
                    abs_diff: (achieved - row.value).abs(),
                    reachable: group.is_some(),
                })
            })
            .collect()
    }

    /// Largest absolute residual over the reachable rows of `constraint`.
    pub fn max_residual(&self, constraint: &ConstraintTable) -> Result<f64> {
        Ok(self
            .residuals(constraint)?
            .iter()
            .filter(|r| r.reachable)
            .fold(0.0_f64, |worst, r| worst.max(r.abs_diff)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::BaseTableBuilder;
    use crate::catalog::Dimension;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn table(weights: Array1<f64>) -> WeightedTable {
        let cat = DimensionCatalog::new(vec![
            Dimension::new("A", ["a1", "a2"]).unwrap(),
            Dimension::new("B", ["b1", "b2"]).unwrap(),
        ])
        .unwrap();
        let (catalog, codes, _) = BaseTableBuilder::new(&cat).build().unwrap().into_parts();
        WeightedTable::new(catalog, codes, weights, "Weight".to_string())
    }

    #[test]
    fn test_finalize_leaves_small_drift() {
        let mut w = array![0.25, 0.25, 0.25, 0.25 + 5e-5];
        let before = w.clone();
        let report = finalize_weights(&mut w, 1e-4).unwrap();

        assert!(!report.renormalized);
        assert_eq!(w, before);
    }

    #[test]
    fn test_finalize_renormalizes_drift() {
        let mut w = array![0.2, 0.2, 0.2, 0.3];
        let report = finalize_weights(&mut w, 1e-4).unwrap();

        assert!(report.renormalized);
        assert_relative_eq!(report.sum_before, 0.9, epsilon = 1e-12);
        assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(w[3], 0.3 / 0.9, epsilon = 1e-12);
    }

    #[test]
    fn test_finalize_rejects_bad_weights() {
        let mut w = array![0.5, f64::INFINITY];
        assert!(matches!(
            finalize_weights(&mut w, 1e-4),
            Err(WeightingError::Numerical(_))
        ));

        let mut w = array![0.0, 0.0];
        assert!(matches!(
            finalize_weights(&mut w, 1e-4),
            Err(WeightingError::Numerical(_))
        ));
    }

    #[test]
    fn test_marginal_and_summary() {
        let t = table(array![0.1, 0.2, 0.3, 0.4]);

        let by_a = t.marginal(&["A"]).unwrap();
        assert_eq!(by_a.len(), 2);
        assert_eq!(by_a[0].0, vec!["a1"]);
        assert_relative_eq!(by_a[0].1, 0.3, epsilon = 1e-12);
        assert_relative_eq!(by_a[1].1, 0.7, epsilon = 1e-12);

        let summary = t.summary();
        assert_eq!(summary.count, 4);
        assert_relative_eq!(summary.sum, 1.0, epsilon = 1e-12);
        assert_relative_eq!(summary.min, 0.1);
        assert_relative_eq!(summary.max, 0.4);
        assert_eq!(summary.distinct_values, vec![("A".to_string(), 2), ("B".to_string(), 2)]);

        assert_eq!(t.column("B").unwrap(), vec!["b1", "b2", "b1", "b2"]);
        assert!(t.column("C").is_none());
    }

    #[test]
    fn test_residuals() {
        let t = table(array![0.1, 0.2, 0.3, 0.4]);
        let target = ConstraintTable::new("b", ["B"])
            .with_row(["b1"], 0.5)
            .unwrap()
            .with_row(["b2"], 0.5)
            .unwrap();

        let residuals = t.residuals(&target).unwrap();
        assert_relative_eq!(residuals[0].achieved, 0.4, epsilon = 1e-12);
        assert_relative_eq!(residuals[1].abs_diff, 0.1, epsilon = 1e-12);
        assert!(residuals.iter().all(|r| r.reachable));
        assert_relative_eq!(t.max_residual(&target).unwrap(), 0.1, epsilon = 1e-12);
    }
}
