// src/weighting/raking.rs

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::finalize::{finalize_weights, WeightedTable};
use super::normalization::ConstraintTable;
use super::options::IpfOptions;
use super::utils::{check_weights, sum_by_group_1d, GroupIndex, Result, WeightingError};
use crate::base::BaseTable;
use crate::catalog::DimensionCatalog;

/// A constraint row whose group no base cell realizes.
#[derive(Debug, Clone, PartialEq)]
pub struct UnreachableRow {
    pub constraint: String,
    pub key: Vec<String>,
    pub target: f64,
}

/// Diagnostics of one engine run.
#[derive(Debug, Clone, PartialEq)]
pub struct RakeReport {
    pub iterations: usize,
    pub converged: bool,
    /// Largest `|ratio - 1|` seen in the last iteration.
    pub max_deviation: f64,
    pub deviation_history: Vec<f64>,
    /// Degenerate constraints that were left out of the loop.
    pub skipped_constraints: Vec<String>,
    pub unreachable_rows: Vec<UnreachableRow>,
    /// Weight sum before the finalizer ran.
    pub sum_before_finalize: f64,
    pub renormalized: bool,
}

/// Converged (or best-effort) table plus the run's diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct RakeOutcome {
    pub table: WeightedTable,
    pub report: RakeReport,
}

/// Margin structure for efficient raking
struct MarginSpec {
    name: String,
    /// Group id of each cell.
    indices: Vec<usize>,
    /// Target mass per group; `None` leaves the group untouched.
    targets: Vec<Option<f64>>,
    n_groups: usize,
}

impl MarginSpec {
    fn compile(
        catalog: &DimensionCatalog,
        codes: ArrayView2<u32>,
        constraint: &ConstraintTable,
        unreachable: &mut Vec<UnreachableRow>,
    ) -> Result<Self> {
        let context = format!("constraint '{}'", constraint.name());
        let positions = catalog.resolve_scope(constraint.scope(), &context)?;
        let index = GroupIndex::build(codes, &positions);

        let mut targets = vec![None; index.n_groups()];
        let mut seen: HashSet<Vec<u32>> = HashSet::with_capacity(constraint.len());

        for row in constraint.rows() {
            let key = catalog.encode(&positions, row.key.as_slice(), &context)?;
            if !seen.insert(key.clone()) {
                return Err(WeightingError::Configuration(format!(
                    "{}: group {:?} appears more than once, aggregate rows first",
                    context, row.key
                )));
            }

            match index.group_of(&key) {
                Some(g) => targets[g] = Some(row.value),
                None => {
                    debug!(
                        constraint = %constraint.name(),
                        key = ?row.key,
                        "target row has no cells in the base table, ignoring it"
                    );
                    unreachable.push(UnreachableRow {
                        constraint: constraint.name().to_string(),
                        key: row.key.clone(),
                        target: row.value,
                    });
                }
            }
        }

        Ok(Self {
            name: constraint.name().to_string(),
            n_groups: index.n_groups(),
            indices: index.cell_groups,
            targets,
        })
    }

    /// One raking step in place. Returns the largest `|ratio - 1|` applied.
    fn apply(&self, weights: &mut Array1<f64>, epsilon: f64) -> f64 {
        let current = sum_by_group_1d(weights.view(), &self.indices, self.n_groups);

        let mut factors = vec![1.0; self.n_groups];
        let mut max_deviation = 0.0_f64;

        for g in 0..self.n_groups {
            if let Some(target) = self.targets[g] {
                let ratio = target / (current[g] + epsilon);
                factors[g] = ratio;

                // An empty group with a zero target is already satisfied
                if current[g] > 0.0 || target > 0.0 {
                    max_deviation = max_deviation.max((ratio - 1.0).abs());
                }
            }
        }

        for (cell, &group_id) in self.indices.iter().enumerate() {
            weights[cell] *= factors[group_id];
        }

        max_deviation
    }

    /// True when no reachable group has a positive target.
    fn is_inert(&self) -> bool {
        self.targets.iter().flatten().all(|&t| t <= 0.0)
    }
}

/// Iterative proportional fitting over a base table and a fixed list of constraints.
///
/// Construction validates every constraint against the catalog; `run` then
/// cannot fail except on a numerical fault.
pub struct IpfEngine {
    catalog: DimensionCatalog,
    codes: Array2<u32>,
    weights: Array1<f64>,
    margins: Vec<MarginSpec>,
    options: IpfOptions,
    skipped: Vec<String>,
    unreachable: Vec<UnreachableRow>,
}

impl IpfEngine {
    pub fn new(base: BaseTable, constraints: &[ConstraintTable], options: IpfOptions) -> Result<Self> {
        options.validate()?;

        if base.is_empty() {
            return Err(WeightingError::EmptyDomain(
                "base table has no cells".to_string(),
            ));
        }

        let (catalog, codes, weights) = base.into_parts();
        let mut margins = Vec::with_capacity(constraints.len());
        let mut skipped = Vec::new();
        let mut unreachable = Vec::new();

        for constraint in constraints {
            let margin = MarginSpec::compile(&catalog, codes.view(), constraint, &mut unreachable)?;

            // Mass on unreachable rows alone would zero every cell
            if margin.is_inert() {
                warn!(
                    constraint = %constraint.name(),
                    total = constraint.total(),
                    "constraint has no mass on reachable groups, skipping it"
                );
                skipped.push(margin.name);
                continue;
            }
            margins.push(margin);
        }

        Ok(Self {
            catalog,
            codes,
            weights,
            margins,
            options,
            skipped,
            unreachable,
        })
    }

    /// Number of constraints that take part in the loop.
    pub fn active_constraints(&self) -> usize {
        self.margins.len()
    }

    pub fn options(&self) -> &IpfOptions {
        &self.options
    }

    pub fn run(self) -> Result<RakeOutcome> {
        let Self {
            catalog,
            codes,
            mut weights,
            margins,
            options,
            skipped,
            unreachable,
        } = self;

        let mut deviation_history = Vec::new();
        let mut max_deviation = 0.0;
        let mut iterations = 0;
        let mut converged = false;

        if margins.is_empty() {
            warn!("no active constraints, returning the seed weights");
            converged = true;
        } else {
            for iteration in 1..=options.max_iterations {
                iterations = iteration;

                // Cycle through margins (IPF steps)
                let mut deviation = 0.0_f64;
                for margin in &margins {
                    deviation = deviation.max(margin.apply(&mut weights, options.epsilon));
                }

                check_weights(weights.view())?;

                debug!(iteration, max_deviation = deviation, "raking iteration");
                deviation_history.push(deviation);
                max_deviation = deviation;

                if deviation < options.convergence_rate {
                    converged = true;
                    break;
                }
            }

            if converged {
                info!(iterations, max_deviation, "raking converged");
            } else {
                warn!(
                    iterations,
                    max_deviation,
                    convergence_rate = options.convergence_rate,
                    "raking hit the iteration cap without converging"
                );
            }
        }

        let finalized = finalize_weights(&mut weights, options.sum_tolerance)?;
        let table = WeightedTable::new(catalog, codes, weights, options.weight_column);

        Ok(RakeOutcome {
            table,
            report: RakeReport {
                iterations,
                converged,
                max_deviation,
                deviation_history,
                skipped_constraints: skipped,
                unreachable_rows: unreachable,
                sum_before_finalize: finalized.sum_before,
                renormalized: finalized.renormalized,
            },
        })
    }
}

/// Build an engine and run it.
pub fn rake(
    base: BaseTable,
    constraints: &[ConstraintTable],
    options: IpfOptions,
) -> Result<RakeOutcome> {
    IpfEngine::new(base, constraints, options)?.run()
}

/// Parallel raking - rake several seeds against the same constraints
///
/// Each seed gets its own engine; the constraints are shared read-only.
/// Uses rayon for parallel processing.
pub fn rake_parallel(
    seeds: Vec<BaseTable>,
    constraints: &[ConstraintTable],
    options: IpfOptions,
) -> Result<Vec<RakeOutcome>> {
    seeds
        .into_par_iter()
        .map(|base| rake(base, constraints, options.clone()))
        .collect()
}
