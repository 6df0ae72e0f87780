use serde::Deserialize;

/// Top-level kpcfit configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KpcfitConfig {
    /// Global RNG seed.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Trace statistic settings.
    #[serde(default)]
    pub trace: TraceToml,

    /// Fitting settings.
    #[serde(default)]
    pub fit: FitToml,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceToml {
    #[serde(default = "default_n_lags")]
    pub n_lags: usize,
    #[serde(default = "default_n_bc_values")]
    pub n_bc_values: usize,
    #[serde(default = "default_max_moments")]
    pub max_moments: usize,
    #[serde(default = "default_min_ac_support")]
    pub min_ac_support: usize,
}

impl Default for TraceToml {
    fn default() -> Self {
        Self {
            n_lags: default_n_lags(),
            n_bc_values: default_n_bc_values(),
            max_moments: default_max_moments(),
            min_ac_support: default_min_ac_support(),
        }
    }
}

fn default_n_lags() -> usize {
    500
}
fn default_n_bc_values() -> usize {
    5
}
fn default_max_moments() -> usize {
    10
}
fn default_min_ac_support() -> usize {
    10
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FitToml {
    /// Number of composed components; 0 selects it automatically.
    #[serde(default)]
    pub num_maps: usize,
    #[serde(default = "default_possible_orders")]
    pub possible_orders: usize,
    #[serde(default = "default_true")]
    pub only_ac: bool,
    #[serde(default)]
    pub allow_semi_markov: bool,
    #[serde(default = "default_criterion")]
    pub criterion: String,
    #[serde(default)]
    pub ac: AcToml,
    #[serde(default)]
    pub bc: BcToml,
}

impl Default for FitToml {
    fn default() -> Self {
        Self {
            num_maps: 0,
            possible_orders: default_possible_orders(),
            only_ac: true,
            allow_semi_markov: false,
            criterion: default_criterion(),
            ac: AcToml::default(),
            bc: BcToml::default(),
        }
    }
}

fn default_possible_orders() -> usize {
    6
}
fn default_true() -> bool {
    true
}
fn default_criterion() -> String {
    "bic".to_string()
}

/// Autocorrelation stage settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcToml {
    #[serde(default = "default_ac_runs")]
    pub runs: usize,
    /// Objective evaluations per run; 0 means unlimited.
    #[serde(default = "default_ac_max_evals")]
    pub max_evals: usize,
    #[serde(default = "default_ac_max_iters")]
    pub max_iters: usize,
    #[serde(default = "default_ac_sigma")]
    pub sigma: f64,
    #[serde(default = "default_ac_keep")]
    pub keep: usize,
}

impl Default for AcToml {
    fn default() -> Self {
        Self {
            runs: default_ac_runs(),
            max_evals: default_ac_max_evals(),
            max_iters: default_ac_max_iters(),
            sigma: default_ac_sigma(),
            keep: default_ac_keep(),
        }
    }
}

fn default_ac_runs() -> usize {
    30
}
fn default_ac_max_evals() -> usize {
    3000
}
fn default_ac_max_iters() -> usize {
    300
}
fn default_ac_sigma() -> f64 {
    0.5
}
fn default_ac_keep() -> usize {
    10
}

/// Bicorrelation stage settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BcToml {
    #[serde(default = "default_bc_runs")]
    pub runs: usize,
    #[serde(default = "default_bc_max_iters")]
    pub max_iters: usize,
    #[serde(default = "default_rho_begin")]
    pub rho_begin: f64,
    #[serde(default = "default_rho_end")]
    pub rho_end: f64,
}

impl Default for BcToml {
    fn default() -> Self {
        Self {
            runs: default_bc_runs(),
            max_iters: default_bc_max_iters(),
            rho_begin: default_rho_begin(),
            rho_end: default_rho_end(),
        }
    }
}

fn default_bc_runs() -> usize {
    5
}
fn default_bc_max_iters() -> usize {
    30
}
fn default_rho_begin() -> f64 {
    0.05
}
fn default_rho_end() -> f64 {
    1e-8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: KpcfitConfig = toml::from_str("").unwrap();
        assert_eq!(config.seed, None);
        assert_eq!(config.trace.n_lags, 500);
        assert_eq!(config.fit.possible_orders, 6);
        assert!(config.fit.only_ac);
        assert_eq!(config.fit.ac.runs, 30);
        assert_eq!(config.fit.bc.max_iters, 30);
    }

    #[test]
    fn nested_sections_parse() {
        let text = r#"
            seed = 7

            [trace]
            n_lags = 100

            [fit]
            num_maps = 3
            only_ac = false
            criterion = "BIC"

            [fit.ac]
            runs = 4
            sigma = 0.25

            [fit.bc]
            rho_begin = 0.1
        "#;
        let config: KpcfitConfig = toml::from_str(text).unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.trace.n_lags, 100);
        assert_eq!(config.trace.n_bc_values, 5);
        assert_eq!(config.fit.num_maps, 3);
        assert!(!config.fit.only_ac);
        assert_eq!(config.fit.ac.runs, 4);
        assert_eq!(config.fit.ac.sigma, 0.25);
        assert_eq!(config.fit.ac.keep, 10);
        assert_eq!(config.fit.bc.rho_begin, 0.1);
        assert_eq!(config.fit.bc.rho_end, 1e-8);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<KpcfitConfig>("[fit]\nmaps = 2\n").is_err());
    }
}
