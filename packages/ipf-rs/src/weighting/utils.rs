// src/weighting/utils.rs

use ndarray::{Array1, ArrayView1, ArrayView2};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeightingError {
    /// A constraint, filter or option refers to something the catalog does not declare,
    /// or is malformed. Raised before any iteration starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The base table has no cells after filtering.
    #[error("Empty domain: {0}")]
    EmptyDomain(String),

    /// A weight became NaN, infinite or negative.
    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, WeightingError>;

/// Sum weights by group for a 1D array
pub fn sum_by_group_1d(
    weights: ArrayView1<f64>,
    indices: &[usize],
    n_groups: usize,
) -> Array1<f64> {
    let mut sums = Array1::zeros(n_groups);

    for (i, &group_id) in indices.iter().enumerate() {
        sums[group_id] += weights[i];
    }

    sums
}

/// Cells grouped by their projection onto a set of dimension positions.
///
/// Group ids are dense and assigned in order of first appearance, so the
/// grouping is deterministic for a given cell order.
#[derive(Debug, Clone)]
pub struct GroupIndex {
    /// Group id of every cell, in cell order.
    pub cell_groups: Vec<usize>,
    /// Value codes of each group, indexed by group id.
    pub keys: Vec<Vec<u32>>,
    lookup: HashMap<Vec<u32>, usize>,
}

impl GroupIndex {
    /// Project each row of `codes` onto `positions` and assign group ids.
    pub fn build(codes: ArrayView2<u32>, positions: &[usize]) -> Self {
        let mut lookup: HashMap<Vec<u32>, usize> = HashMap::new();
        let mut keys: Vec<Vec<u32>> = Vec::new();
        let mut cell_groups = Vec::with_capacity(codes.nrows());
        let mut key = Vec::with_capacity(positions.len());

        for row in codes.rows() {
            key.clear();
            key.extend(positions.iter().map(|&p| row[p]));

            let id = match lookup.get(&key) {
                Some(&id) => id,
                None => {
                    let id = keys.len();
                    keys.push(key.clone());
                    lookup.insert(key.clone(), id);
                    id
                }
            };
            cell_groups.push(id);
        }

        Self {
            cell_groups,
            keys,
            lookup,
        }
    }

    pub fn n_groups(&self) -> usize {
        self.keys.len()
    }

    /// Group id for a projected key, if any cell realizes it.
    pub fn group_of(&self, key: &[u32]) -> Option<usize> {
        self.lookup.get(key).copied()
    }
}

/// Reject NaN, infinite and negative weights.
pub fn check_weights(weights: ArrayView1<f64>) -> Result<()> {
    for (i, &w) in weights.iter().enumerate() {
        if !w.is_finite() {
            return Err(WeightingError::Numerical(format!(
                "weight of cell {} is not finite ({})",
                i, w
            )));
        }
        if w < 0.0 {
            return Err(WeightingError::Numerical(format!(
                "weight of cell {} is negative ({})",
                i, w
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sum_by_group_1d() {
        let weights = array![1.0, 2.0, 3.0, 4.0];
        let indices = vec![0, 0, 1, 1];
        let sums = sum_by_group_1d(weights.view(), &indices, 2);

        assert_eq!(sums[0], 3.0);
        assert_eq!(sums[1], 7.0);
    }

    #[test]
    fn test_group_index_projection() {
        // Two dimensions, 2 x 2 cells; project onto the second one
        let codes = array![[0u32, 0], [0, 1], [1, 0], [1, 1]];
        let index = GroupIndex::build(codes.view(), &[1]);

        assert_eq!(index.n_groups(), 2);
        assert_eq!(index.cell_groups, vec![0, 1, 0, 1]);
        assert_eq!(index.group_of(&[1]), Some(1));
        assert_eq!(index.group_of(&[2]), None);
    }

    #[test]
    fn test_group_index_empty_projection_is_one_group() {
        let codes = array![[0u32, 1], [1, 0]];
        let index = GroupIndex::build(codes.view(), &[]);

        assert_eq!(index.n_groups(), 1);
        assert_eq!(index.cell_groups, vec![0, 0]);
    }

    #[test]
    fn test_check_weights() {
        assert!(check_weights(array![0.0, 0.5, 0.5].view()).is_ok());

        let err = check_weights(array![0.5, f64::NAN].view()).unwrap_err();
        assert!(matches!(err, WeightingError::Numerical(_)));

        let err = check_weights(array![0.5, -1e-3].view()).unwrap_err();
        assert!(err.to_string().contains("negative"));
    }
}
