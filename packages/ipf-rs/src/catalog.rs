// src/catalog.rs
//! Dimension catalog: the named categorical dimensions and their admissible values.

use std::collections::HashMap;

use crate::weighting::utils::{Result, WeightingError};

/// A named categorical dimension with an ordered set of unique values.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    name: String,
    values: Vec<String>,
    codes: HashMap<String, u32>,
}

impl Dimension {
    /// Create a dimension. Values keep their given order; duplicates are rejected.
    ///
    /// A dimension with no values is accepted here and rejected when the base
    /// table is built, since it leaves the joint domain empty.
    pub fn new<N, I, V>(name: N, values: I) -> Result<Self>
    where
        N: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let name = name.into();
        let values: Vec<String> = values.into_iter().map(Into::into).collect();

        if values.len() > u32::MAX as usize {
            return Err(WeightingError::Configuration(format!(
                "dimension '{}' has too many values ({})",
                name,
                values.len()
            )));
        }

        let mut codes = HashMap::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            if codes.insert(value.clone(), i as u32).is_some() {
                return Err(WeightingError::Configuration(format!(
                    "dimension '{}' declares value '{}' more than once",
                    name, value
                )));
            }
        }

        Ok(Self {
            name,
            values,
            codes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of `value` in this dimension's value list.
    pub fn code_of(&self, value: &str) -> Option<u32> {
        self.codes.get(value).copied()
    }

    pub(crate) fn value(&self, code: u32) -> &str {
        &self.values[code as usize]
    }
}

/// Ordered collection of dimensions, read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionCatalog {
    dimensions: Vec<Dimension>,
    positions: HashMap<String, usize>,
}

impl DimensionCatalog {
    pub fn new(dimensions: Vec<Dimension>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(dimensions.len());
        for (i, dim) in dimensions.iter().enumerate() {
            if positions.insert(dim.name.clone(), i).is_some() {
                return Err(WeightingError::Configuration(format!(
                    "dimension '{}' is declared more than once",
                    dim.name
                )));
            }
        }
        Ok(Self {
            dimensions,
            positions,
        })
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn names(&self) -> Vec<&str> {
        self.dimensions.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.position(name).map(|i| &self.dimensions[i])
    }

    /// Number of cells in the unfiltered Cartesian product, or `None` on overflow.
    ///
    /// This is the memory bound of the base table: every cell stores one code
    /// per dimension plus one weight.
    pub fn cartesian_size(&self) -> Option<usize> {
        self.dimensions
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(d.len()))
    }

    /// Map scope dimension names to catalog positions.
    ///
    /// `context` names the constraint or filter in error messages.
    pub(crate) fn resolve_scope<S: AsRef<str>>(
        &self,
        scope: &[S],
        context: &str,
    ) -> Result<Vec<usize>> {
        if scope.is_empty() {
            return Err(WeightingError::Configuration(format!(
                "{} has an empty scope",
                context
            )));
        }

        let mut positions = Vec::with_capacity(scope.len());
        for name in scope {
            let name = name.as_ref();
            let pos = self.position(name).ok_or_else(|| {
                WeightingError::Configuration(format!(
                    "{} references unknown dimension '{}'",
                    context, name
                ))
            })?;
            if positions.contains(&pos) {
                return Err(WeightingError::Configuration(format!(
                    "{} lists dimension '{}' twice",
                    context, name
                )));
            }
            positions.push(pos);
        }
        Ok(positions)
    }

    /// Encode a tuple of values over `positions` into value codes.
    pub(crate) fn encode<S: AsRef<str>>(
        &self,
        positions: &[usize],
        values: &[S],
        context: &str,
    ) -> Result<Vec<u32>> {
        if values.len() != positions.len() {
            return Err(WeightingError::Configuration(format!(
                "{}: tuple has {} values but the scope has {} dimensions",
                context,
                values.len(),
                positions.len()
            )));
        }

        positions
            .iter()
            .zip(values)
            .map(|(&pos, value)| {
                let dim = &self.dimensions[pos];
                dim.code_of(value.as_ref()).ok_or_else(|| {
                    WeightingError::Configuration(format!(
                        "{}: value '{}' is not declared for dimension '{}'",
                        context,
                        value.as_ref(),
                        dim.name
                    ))
                })
            })
            .collect()
    }

    /// Resolve codes over `positions` back into their string values.
    pub(crate) fn decode(&self, positions: &[usize], codes: &[u32]) -> Vec<String> {
        positions
            .iter()
            .zip(codes)
            .map(|(&pos, &code)| self.dimensions[pos].value(code).to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> DimensionCatalog {
        DimensionCatalog::new(vec![
            Dimension::new("Region", ["Seoul", "Busan"]).unwrap(),
            Dimension::new("Gender", ["M", "F"]).unwrap(),
            Dimension::new("AgeGroup", ["20-24", "25-29", "30-34"]).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_duplicate_value_rejected() {
        let err = Dimension::new("Gender", ["M", "F", "M"]).unwrap_err();
        assert!(matches!(err, WeightingError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_dimension_rejected() {
        let result = DimensionCatalog::new(vec![
            Dimension::new("Gender", ["M"]).unwrap(),
            Dimension::new("Gender", ["F"]).unwrap(),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cartesian_size() {
        assert_eq!(catalog().cartesian_size(), Some(12));

        let huge: Vec<Dimension> = (0..8)
            .map(|i| Dimension::new(format!("D{i}"), (0..1000).map(|v| v.to_string())).unwrap())
            .collect();
        let huge = DimensionCatalog::new(huge).unwrap();
        assert_eq!(huge.cartesian_size(), None);
    }

    #[test]
    fn test_resolve_scope() {
        let cat = catalog();
        assert_eq!(cat.resolve_scope(&["AgeGroup", "Region"], "c").unwrap(), vec![2, 0]);
        assert!(cat.resolve_scope(&["Income"], "c").is_err());
        assert!(cat.resolve_scope(&["Gender", "Gender"], "c").is_err());
        assert!(cat.resolve_scope::<&str>(&[], "c").is_err());
    }

    #[test]
    fn test_encode_decode() {
        let cat = catalog();
        let codes = cat.encode(&[1, 2], &["F", "25-29"], "c").unwrap();
        assert_eq!(codes, vec![1, 1]);
        assert_eq!(cat.decode(&[1, 2], &codes), vec!["F", "25-29"]);

        let err = cat.encode(&[1], &["X"], "c").unwrap_err();
        assert!(err.to_string().contains("not declared"));
        assert!(cat.encode(&[1], &["M", "F"], "c").is_err());
    }
}
