//! Pure conversion functions: TOML config structs -> crate API config types.

use anyhow::{Context, Result};

use kpc_fit::{FitOptions, OrderCriterion};
use kpc_trace::TraceConfig;

use crate::cli::FitArgs;
use crate::config::{KpcfitConfig, TraceToml};

/// Builds a validated `TraceConfig` from the `[trace]` section.
pub fn build_trace_config(t: &TraceToml) -> Result<TraceConfig> {
    let config = TraceConfig::new()
        .with_n_lags(t.n_lags)
        .with_n_bc_values(t.n_bc_values)
        .with_max_moments(t.max_moments)
        .with_min_ac_support(t.min_ac_support);
    config.validate().context("invalid [trace] settings")?;
    Ok(config)
}

/// Builds validated `FitOptions` from the config, with CLI overrides applied.
pub fn build_fit_options(config: &KpcfitConfig, args: &FitArgs) -> Result<FitOptions> {
    let f = &config.fit;
    let criterion: OrderCriterion = f.criterion.parse().context("invalid [fit] criterion")?;

    let mut options = FitOptions::new()
        .with_num_maps(args.maps.unwrap_or(f.num_maps))
        .with_possible_orders(f.possible_orders)
        .with_only_ac(f.only_ac && !args.with_bc)
        .with_allow_semi_markov(f.allow_semi_markov)
        .with_criterion(criterion)
        .with_ac_runs(f.ac.runs)
        .with_ac_max_evals(f.ac.max_evals)
        .with_ac_max_iters(f.ac.max_iters)
        .with_ac_sigma(f.ac.sigma)
        .with_ac_keep(f.ac.keep)
        .with_bc_runs(f.bc.runs)
        .with_bc_max_iters(f.bc.max_iters)
        .with_bc_radii(f.bc.rho_begin, f.bc.rho_end);
    if let Some(seed) = args.seed.or(config.seed) {
        options = options.with_seed(seed);
    }
    options.validate().context("invalid [fit] settings")?;
    Ok(options)
}
