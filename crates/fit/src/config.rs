//! Options controlling a KPC fit.

use std::fmt;
use std::str::FromStr;

use crate::error::FitError;

/// Largest number of composed two-state components: `2^7 = 128` states.
pub const MAX_COMPONENTS: usize = 7;

/// Criterion used to choose the number of components automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderCriterion {
    /// Bayesian information criterion on an autoregression of the
    /// autocorrelation.
    #[default]
    Bic,
    /// Akaike information criterion. Not implemented.
    Aic,
    /// Minimum error selection. Not implemented.
    Mes,
}

impl fmt::Display for OrderCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bic => "BIC",
            Self::Aic => "AIC",
            Self::Mes => "MES",
        };
        f.write_str(name)
    }
}

impl FromStr for OrderCriterion {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bic" => Ok(Self::Bic),
            "aic" => Ok(Self::Aic),
            "mes" => Ok(Self::Mes),
            other => Err(FitError::InvalidOption {
                name: "criterion",
                reason: format!("unknown criterion '{other}'"),
            }),
        }
    }
}

/// Configuration of a [`TraceFitter`](crate::TraceFitter).
///
/// # Example
///
/// ```
/// use kpc_fit::FitOptions;
///
/// let options = FitOptions::new()
///     .with_num_maps(2)
///     .with_only_ac(false)
///     .with_ac_runs(8)
///     .with_seed(7);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    /// Number of composed components; 0 selects it automatically.
    num_maps: usize,
    /// Candidate component counts `1..=possible_orders` for order selection.
    possible_orders: usize,
    /// Skip the bicorrelation stage.
    only_ac: bool,
    /// Allow a semi-Markov head component.
    allow_semi_markov: bool,
    criterion: OrderCriterion,
    /// Base seed; `None` draws from OS entropy.
    seed: Option<u64>,
    ac_runs: usize,
    /// Objective evaluations per AC run; 0 is unlimited.
    ac_max_evals: usize,
    ac_max_iters: usize,
    /// Initial simplex scale of the AC search.
    ac_sigma: f64,
    /// AC results carried into the BC stage.
    ac_keep: usize,
    bc_runs: usize,
    bc_max_iters: usize,
    /// Initial simplex radius of the BC search.
    bc_rho_begin: f64,
    /// Final simplex spread of the BC search.
    bc_rho_end: f64,
}

impl FitOptions {
    /// Creates options with the defaults.
    ///
    /// | Option | Default |
    /// |--------|---------|
    /// | `num_maps` | 0 (automatic) |
    /// | `possible_orders` | 6 |
    /// | `only_ac` | `true` |
    /// | `allow_semi_markov` | `false` |
    /// | `criterion` | BIC |
    /// | `seed` | `None` |
    /// | `ac_runs` / `ac_max_evals` / `ac_max_iters` | 30 / 3000 / 300 |
    /// | `ac_sigma` / `ac_keep` | 0.5 / 10 |
    /// | `bc_runs` / `bc_max_iters` | 5 / 30 |
    /// | `bc_rho_begin` / `bc_rho_end` | 0.05 / 1e-8 |
    pub fn new() -> Self {
        Self {
            num_maps: 0,
            possible_orders: 6,
            only_ac: true,
            allow_semi_markov: false,
            criterion: OrderCriterion::Bic,
            seed: None,
            ac_runs: 30,
            ac_max_evals: 3000,
            ac_max_iters: 300,
            ac_sigma: 0.5,
            ac_keep: 10,
            bc_runs: 5,
            bc_max_iters: 30,
            bc_rho_begin: 0.05,
            bc_rho_end: 1e-8,
        }
    }

    /// Sets the number of components (0 for automatic selection).
    pub fn with_num_maps(mut self, num_maps: usize) -> Self {
        self.num_maps = num_maps;
        self
    }

    /// Sets the largest component count considered by order selection.
    pub fn with_possible_orders(mut self, possible_orders: usize) -> Self {
        self.possible_orders = possible_orders;
        self
    }

    /// Enables or disables the bicorrelation stage.
    pub fn with_only_ac(mut self, only_ac: bool) -> Self {
        self.only_ac = only_ac;
        self
    }

    /// Allows semi-Markov results.
    pub fn with_allow_semi_markov(mut self, allow: bool) -> Self {
        self.allow_semi_markov = allow;
        self
    }

    /// Sets the order-selection criterion.
    pub fn with_criterion(mut self, criterion: OrderCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Fixes the base seed for reproducible fits.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the number of AC restarts.
    pub fn with_ac_runs(mut self, runs: usize) -> Self {
        self.ac_runs = runs;
        self
    }

    /// Sets the evaluation cap per AC run (0 is unlimited).
    pub fn with_ac_max_evals(mut self, evals: usize) -> Self {
        self.ac_max_evals = evals;
        self
    }

    /// Sets the iteration cap per AC run.
    pub fn with_ac_max_iters(mut self, iters: usize) -> Self {
        self.ac_max_iters = iters;
        self
    }

    /// Sets the initial simplex scale of the AC search.
    pub fn with_ac_sigma(mut self, sigma: f64) -> Self {
        self.ac_sigma = sigma;
        self
    }

    /// Sets how many AC results are kept.
    pub fn with_ac_keep(mut self, keep: usize) -> Self {
        self.ac_keep = keep;
        self
    }

    /// Sets the number of BC restarts per AC result.
    pub fn with_bc_runs(mut self, runs: usize) -> Self {
        self.bc_runs = runs;
        self
    }

    /// Sets the iteration cap per BC run.
    pub fn with_bc_max_iters(mut self, iters: usize) -> Self {
        self.bc_max_iters = iters;
        self
    }

    /// Sets the initial and final simplex radii of the BC search.
    pub fn with_bc_radii(mut self, rho_begin: f64, rho_end: f64) -> Self {
        self.bc_rho_begin = rho_begin;
        self.bc_rho_end = rho_end;
        self
    }

    /// Returns the number of components (0 is automatic).
    pub fn num_maps(&self) -> usize {
        self.num_maps
    }

    /// Returns the largest component count considered by order selection.
    pub fn possible_orders(&self) -> usize {
        self.possible_orders
    }

    /// Returns whether the bicorrelation stage is skipped.
    pub fn only_ac(&self) -> bool {
        self.only_ac
    }

    /// Returns whether semi-Markov results are allowed.
    pub fn allow_semi_markov(&self) -> bool {
        self.allow_semi_markov
    }

    /// Returns the order-selection criterion.
    pub fn criterion(&self) -> OrderCriterion {
        self.criterion
    }

    /// Returns the base seed.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Returns the number of AC restarts.
    pub fn ac_runs(&self) -> usize {
        self.ac_runs
    }

    /// Returns the evaluation cap per AC run.
    pub fn ac_max_evals(&self) -> usize {
        self.ac_max_evals
    }

    /// Returns the iteration cap per AC run.
    pub fn ac_max_iters(&self) -> usize {
        self.ac_max_iters
    }

    /// Returns the initial simplex scale of the AC search.
    pub fn ac_sigma(&self) -> f64 {
        self.ac_sigma
    }

    /// Returns how many AC results are kept.
    pub fn ac_keep(&self) -> usize {
        self.ac_keep
    }

    /// Returns the number of BC restarts.
    pub fn bc_runs(&self) -> usize {
        self.bc_runs
    }

    /// Returns the iteration cap per BC run.
    pub fn bc_max_iters(&self) -> usize {
        self.bc_max_iters
    }

    /// Returns the initial BC simplex radius.
    pub fn bc_rho_begin(&self) -> f64 {
        self.bc_rho_begin
    }

    /// Returns the final BC simplex spread.
    pub fn bc_rho_end(&self) -> f64 {
        self.bc_rho_end
    }

    /// Validates these options.
    pub fn validate(&self) -> Result<(), FitError> {
        let invalid = |name: &'static str, reason: String| FitError::InvalidOption { name, reason };

        if self.num_maps > MAX_COMPONENTS {
            return Err(invalid(
                "num_maps",
                format!("{} exceeds the maximum of {MAX_COMPONENTS}", self.num_maps),
            ));
        }
        if self.possible_orders == 0 || self.possible_orders > MAX_COMPONENTS {
            return Err(invalid(
                "possible_orders",
                format!("{} is outside 1..={MAX_COMPONENTS}", self.possible_orders),
            ));
        }
        for (name, value) in [
            ("ac_runs", self.ac_runs),
            ("ac_max_iters", self.ac_max_iters),
            ("ac_keep", self.ac_keep),
            ("bc_runs", self.bc_runs),
            ("bc_max_iters", self.bc_max_iters),
        ] {
            if value == 0 {
                return Err(invalid(name, "must be at least 1".into()));
            }
        }
        for (name, value) in [
            ("ac_sigma", self.ac_sigma),
            ("bc_rho_begin", self.bc_rho_begin),
            ("bc_rho_end", self.bc_rho_end),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(name, format!("{value} is not a positive number")));
            }
        }
        if self.bc_rho_end >= self.bc_rho_begin {
            return Err(invalid(
                "bc_rho_end",
                format!(
                    "{} must be below bc_rho_begin ({})",
                    self.bc_rho_end, self.bc_rho_begin
                ),
            ));
        }
        Ok(())
    }
}

impl Default for FitOptions {
    fn default() -> Self {
        Self::new()
    }
}
