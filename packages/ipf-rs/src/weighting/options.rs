// src/weighting/options.rs

use super::utils::{Result, WeightingError};

pub const DEFAULT_CONVERGENCE_RATE: f64 = 1e-6;
pub const DEFAULT_MAX_ITERATIONS: usize = 50;
/// Added to a group's current mass before dividing.
pub const DEFAULT_EPSILON: f64 = 1e-10;
/// Allowed drift of the final weight sum from 1.0 before renormalizing.
pub const DEFAULT_SUM_TOLERANCE: f64 = 1e-4;
pub const DEFAULT_WEIGHT_COLUMN: &str = "Weight";

/// Options for the raking loop and the weight finalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct IpfOptions {
    /// Stop once the largest `|ratio - 1|` of an iteration falls below this.
    pub convergence_rate: f64,
    pub max_iterations: usize,
    pub epsilon: f64,
    pub sum_tolerance: f64,
    /// Name of the weight column in the output table.
    pub weight_column: String,
}

impl Default for IpfOptions {
    fn default() -> Self {
        Self {
            convergence_rate: DEFAULT_CONVERGENCE_RATE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            epsilon: DEFAULT_EPSILON,
            sum_tolerance: DEFAULT_SUM_TOLERANCE,
            weight_column: DEFAULT_WEIGHT_COLUMN.to_string(),
        }
    }
}

impl IpfOptions {
    pub fn with_convergence_rate(mut self, rate: f64) -> Self {
        self.convergence_rate = rate;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_sum_tolerance(mut self, tolerance: f64) -> Self {
        self.sum_tolerance = tolerance;
        self
    }

    pub fn with_weight_column(mut self, name: impl Into<String>) -> Self {
        self.weight_column = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(WeightingError::Configuration(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )))
            }
        };

        positive("convergence_rate", self.convergence_rate)?;
        positive("epsilon", self.epsilon)?;
        positive("sum_tolerance", self.sum_tolerance)?;

        if self.max_iterations == 0 {
            return Err(WeightingError::Configuration(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.weight_column.is_empty() {
            return Err(WeightingError::Configuration(
                "weight_column must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = IpfOptions::default();
        assert_eq!(opts.convergence_rate, 1e-6);
        assert_eq!(opts.max_iterations, 50);
        assert_eq!(opts.weight_column, "Weight");
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_invalid_options() {
        assert!(IpfOptions::default().with_max_iterations(0).validate().is_err());
        assert!(IpfOptions::default().with_convergence_rate(0.0).validate().is_err());
        assert!(IpfOptions::default().with_epsilon(f64::NAN).validate().is_err());
        assert!(IpfOptions::default().with_sum_tolerance(-1.0).validate().is_err());
        assert!(IpfOptions::default().with_weight_column("").validate().is_err());
    }
}
