// src/weighting/normalization.rs

use std::collections::HashMap;
use tracing::{debug, warn};

use super::utils::{Result, WeightingError};

/// One target row of a constraint: a tuple over the scope plus its mass.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintRow {
    pub key: Vec<String>,
    pub value: f64,
}

/// Target marginal over a subset of dimensions (the scope).
///
/// Values are raw non-negative masses until passed through
/// [`normalize_constraint`], after which they sum to 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintTable {
    name: String,
    scope: Vec<String>,
    rows: Vec<ConstraintRow>,
}

impl ConstraintTable {
    pub fn new<N, I, S>(name: N, scope: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            scope: scope.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row. The tuple must match the scope's arity and the value
    /// must be finite and non-negative.
    pub fn push<K, V>(&mut self, key: K, value: f64) -> Result<()>
    where
        K: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let key: Vec<String> = key.into_iter().map(Into::into).collect();
        if key.len() != self.scope.len() {
            return Err(WeightingError::Configuration(format!(
                "constraint '{}': row {:?} has {} values but the scope has {} dimensions",
                self.name,
                key,
                key.len(),
                self.scope.len()
            )));
        }
        if !value.is_finite() || value < 0.0 {
            return Err(WeightingError::Configuration(format!(
                "constraint '{}': row {:?} has invalid mass {}",
                self.name, key, value
            )));
        }
        self.rows.push(ConstraintRow { key, value });
        Ok(())
    }

    /// Builder form of [`push`](Self::push).
    pub fn with_row<K, V>(mut self, key: K, value: f64) -> Result<Self>
    where
        K: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.push(key, value)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    pub fn rows(&self) -> &[ConstraintRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.rows.iter().map(|r| r.value).sum()
    }

    /// True when the masses sum to zero or less; such a constraint is inert.
    pub fn is_degenerate(&self) -> bool {
        self.total() <= 0.0
    }
}

/// Rescale a constraint so its masses sum to 1.0.
///
/// A degenerate table (total <= 0) is returned unchanged with a warning.
/// Rows are not deduplicated; see [`aggregate_duplicates`].
pub fn normalize_constraint(table: &ConstraintTable) -> ConstraintTable {
    let total = table.total();

    if total <= 0.0 {
        warn!(
            constraint = %table.name,
            rows = table.rows.len(),
            "constraint masses sum to zero, leaving it unnormalized"
        );
        return table.clone();
    }

    let rows = table
        .rows
        .iter()
        .map(|r| ConstraintRow {
            key: r.key.clone(),
            value: r.value / total,
        })
        .collect();

    debug!(constraint = %table.name, raw_total = total, "constraint normalized");

    ConstraintTable {
        name: table.name.clone(),
        scope: table.scope.clone(),
        rows,
    }
}

/// Sum rows that share the same scope tuple, keeping first-seen order.
pub fn aggregate_duplicates(table: &ConstraintTable) -> ConstraintTable {
    let mut positions: HashMap<&[String], usize> = HashMap::with_capacity(table.rows.len());
    let mut rows: Vec<ConstraintRow> = Vec::with_capacity(table.rows.len());

    for row in &table.rows {
        match positions.get(row.key.as_slice()) {
            Some(&i) => rows[i].value += row.value,
            None => {
                positions.insert(row.key.as_slice(), rows.len());
                rows.push(row.clone());
            }
        }
    }

    if rows.len() < table.rows.len() {
        debug!(
            constraint = %table.name,
            merged = table.rows.len() - rows.len(),
            "merged duplicate constraint rows"
        );
    }

    ConstraintTable {
        name: table.name.clone(),
        scope: table.scope.clone(),
        rows,
    }
}
