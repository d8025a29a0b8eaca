// src/base.rs
//! Base (seed) table: the joint support over all dimensions.

use std::collections::HashSet;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use tracing::{debug, info};

use crate::catalog::DimensionCatalog;
use crate::weighting::utils::{check_weights, Result, WeightingError};

/// Default ceiling on the unfiltered Cartesian product size.
pub const DEFAULT_MAX_CELLS: usize = 50_000_000;

/// Admissible tuples over a subset of dimensions, e.g. real (region, sub-region) pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidCombinations {
    dimensions: Vec<String>,
    tuples: HashSet<Vec<String>>,
}

impl ValidCombinations {
    pub fn new<I, S>(dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dimensions: dimensions.into_iter().map(Into::into).collect(),
            tuples: HashSet::new(),
        }
    }

    /// Build a filter from a list of tuples.
    pub fn from_tuples<I, T, V>(dimensions: &[&str], tuples: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut filter = Self::new(dimensions.iter().copied());
        for tuple in tuples {
            filter.insert(tuple)?;
        }
        Ok(filter)
    }

    /// Add an admissible tuple. Returns `false` if it was already present.
    pub fn insert<T, V>(&mut self, tuple: T) -> Result<bool>
    where
        T: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let tuple: Vec<String> = tuple.into_iter().map(Into::into).collect();
        if tuple.len() != self.dimensions.len() {
            return Err(WeightingError::DimensionMismatch {
                expected: self.dimensions.len(),
                got: tuple.len(),
            });
        }
        Ok(self.tuples.insert(tuple))
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn contains<S: AsRef<str>>(&self, tuple: &[S]) -> bool {
        let tuple: Vec<String> = tuple.iter().map(|s| s.as_ref().to_string()).collect();
        self.tuples.contains(&tuple)
    }

    fn tuples(&self) -> impl Iterator<Item = &Vec<String>> {
        self.tuples.iter()
    }
}

/// Builds the Cartesian product of a catalog's dimensions.
#[derive(Debug, Clone)]
pub struct BaseTableBuilder<'a> {
    catalog: &'a DimensionCatalog,
    filter: Option<&'a ValidCombinations>,
    max_cells: usize,
}

impl<'a> BaseTableBuilder<'a> {
    pub fn new(catalog: &'a DimensionCatalog) -> Self {
        Self {
            catalog,
            filter: None,
            max_cells: DEFAULT_MAX_CELLS,
        }
    }

    pub fn with_filter(mut self, filter: &'a ValidCombinations) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_max_cells(mut self, max_cells: usize) -> Self {
        self.max_cells = max_cells;
        self
    }

    /// Materialize the (filtered) product with uniform weight `1 / N`.
    ///
    /// Rows follow declaration order with the last dimension varying fastest.
    pub fn build(&self) -> Result<BaseTable> {
        let catalog = self.catalog;
        let n_dims = catalog.len();

        if n_dims == 0 {
            return Err(WeightingError::EmptyDomain(
                "no dimensions declared".to_string(),
            ));
        }
        if let Some(dim) = catalog.dimensions().iter().find(|d| d.is_empty()) {
            return Err(WeightingError::EmptyDomain(format!(
                "dimension '{}' has no values",
                dim.name()
            )));
        }

        // Validate the filter before doing any work
        let filter = match self.filter {
            Some(filter) => {
                let positions = catalog.resolve_scope(filter.dimensions(), "valid-combination filter")?;
                let encoded = filter
                    .tuples()
                    .map(|t| catalog.encode(&positions, t.as_slice(), "valid-combination filter"))
                    .collect::<Result<HashSet<Vec<u32>>>>()?;
                Some((positions, encoded))
            }
            None => None,
        };

        let total = catalog.cartesian_size().ok_or_else(|| {
            WeightingError::Configuration("Cartesian product size overflows".to_string())
        })?;
        if total > self.max_cells {
            return Err(WeightingError::Configuration(format!(
                "Cartesian product has {} cells, above the limit of {}",
                total, self.max_cells
            )));
        }

        let sizes: Vec<usize> = catalog.dimensions().iter().map(|d| d.len()).collect();
        debug!(expected_cells = total, dimensions = n_dims, "building base table");

        let mut flat: Vec<u32> = Vec::with_capacity(total * n_dims);
        let mut current = vec![0u32; n_dims];
        let mut key: Vec<u32> = Vec::new();
        let mut n_cells = 0usize;

        for _ in 0..total {
            let keep = match &filter {
                None => true,
                Some((positions, allowed)) => {
                    key.clear();
                    key.extend(positions.iter().map(|&p| current[p]));
                    allowed.contains(&key)
                }
            };
            if keep {
                flat.extend_from_slice(&current);
                n_cells += 1;
            }

            // Odometer step, last dimension fastest
            for d in (0..n_dims).rev() {
                current[d] += 1;
                if (current[d] as usize) < sizes[d] {
                    break;
                }
                current[d] = 0;
            }
        }

        if n_cells == 0 {
            return Err(WeightingError::EmptyDomain(
                "every combination was removed by the valid-combination filter".to_string(),
            ));
        }

        let flat_len = flat.len();
        let codes = Array2::from_shape_vec((n_cells, n_dims), flat).map_err(|_| {
            WeightingError::DimensionMismatch {
                expected: n_cells * n_dims,
                got: flat_len,
            }
        })?;
        let weights = Array1::from_elem(n_cells, 1.0 / n_cells as f64);

        info!(
            cells = n_cells,
            filtered_out = total - n_cells,
            dimensions = n_dims,
            "base table built"
        );

        Ok(BaseTable {
            catalog: catalog.clone(),
            codes,
            weights,
        })
    }
}

/// The joint cells with their current weights.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseTable {
    catalog: DimensionCatalog,
    codes: Array2<u32>,
    weights: Array1<f64>,
}

impl BaseTable {
    pub fn catalog(&self) -> &DimensionCatalog {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.codes.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.nrows() == 0
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    /// Value codes, one row per cell and one column per dimension.
    pub fn codes(&self) -> ArrayView2<'_, u32> {
        self.codes.view()
    }

    /// The category values of cell `index`, in dimension order.
    pub fn cell(&self, index: usize) -> Vec<&str> {
        self.codes
            .row(index)
            .iter()
            .zip(self.catalog.dimensions())
            .map(|(&code, dim)| dim.value(code))
            .collect()
    }

    /// Replace the uniform seed with custom relative proportions.
    ///
    /// The weights are rescaled to sum to 1; they must be finite, non-negative
    /// and not all zero.
    pub fn with_seed_weights(mut self, seed: Array1<f64>) -> Result<Self> {
        if seed.len() != self.len() {
            return Err(WeightingError::DimensionMismatch {
                expected: self.len(),
                got: seed.len(),
            });
        }
        check_weights(seed.view())?;

        let total = seed.sum();
        if total <= 0.0 {
            return Err(WeightingError::Configuration(
                "seed weights sum to zero".to_string(),
            ));
        }
        self.weights = seed.mapv(|w| w / total);
        Ok(self)
    }

    pub(crate) fn into_parts(self) -> (DimensionCatalog, Array2<u32>, Array1<f64>) {
        (self.catalog, self.codes, self.weights)
    }
}
