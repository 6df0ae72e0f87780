//! Fit command: trace file in, TOML report out.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, info_span};

use kpc_fit::TraceFitter;
use kpc_trace::Trace;

use crate::cli::FitArgs;
use crate::config::KpcfitConfig;
use crate::convert;
use crate::report::FitReport;

/// Run the fitting pipeline.
pub fn run(args: FitArgs) -> Result<()> {
    let _cmd = info_span!("fit").entered();
    let config = load_config(args.config.as_deref())?;
    let trace_config = convert::build_trace_config(&config.trace)?;
    let options = convert::build_fit_options(&config, &args)?;

    info!(path = %args.trace.display(), "reading trace");
    let samples = read_trace(&args.trace)?;
    let trace = Trace::from_samples(&samples, &trace_config)
        .context("failed to compute trace statistics")?;
    info!(
        n = trace.len(),
        mean = trace.mean(),
        scv = trace.scv(),
        "trace loaded"
    );

    let outcome = TraceFitter::new(&trace, options)?
        .fit()
        .context("fit failed")?;
    let report =
        FitReport::from_outcome(&outcome).ok_or_else(|| anyhow!("fit produced no candidates"))?;
    let text = toml::to_string_pretty(&report).context("failed to serialize fit report")?;

    match &args.output {
        Some(path) => {
            fs::write(path, text)
                .with_context(|| format!("failed to write report: {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<KpcfitConfig> {
    let Some(path) = path else {
        return Ok(KpcfitConfig::default());
    };
    let toml_str = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    toml::from_str(&toml_str).context("failed to parse TOML config")
}

/// Reads whitespace-separated inter-arrival times.
fn read_trace(path: &Path) -> Result<Vec<f64>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read trace: {}", path.display()))?;
    let samples = text
        .split_whitespace()
        .enumerate()
        .map(|(i, token)| {
            token
                .parse::<f64>()
                .with_context(|| format!("sample {} is not a number: {token:?}", i + 1))
        })
        .collect::<Result<Vec<_>>>()?;
    if samples.is_empty() {
        bail!("trace file {} holds no samples", path.display());
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;

    use super::*;

    /// Deterministic bursty series without an RNG dependency.
    fn write_trace(path: &Path, n: usize) {
        let mut text = String::new();
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        for i in 0..n {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let u = ((state >> 11) as f64 + 0.5) / (1u64 << 53) as f64;
            let rate = if (i / 50) % 2 == 0 { 2.0 } else { 0.25 };
            writeln!(text, "{}", -u.ln() / rate).unwrap();
        }
        fs::write(path, text).unwrap();
    }

    #[test]
    fn read_trace_accepts_mixed_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.txt");
        fs::write(&path, "1.0 2.5\n\t3e-1\n\n4").unwrap();
        assert_eq!(read_trace(&path).unwrap(), vec![1.0, 2.5, 0.3, 4.0]);
    }

    #[test]
    fn read_trace_reports_bad_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.txt");
        fs::write(&path, "1.0 two 3.0").unwrap();
        let err = read_trace(&path).unwrap_err();
        assert!(format!("{err:#}").contains("sample 2"));
    }

    #[test]
    fn read_trace_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.txt");
        fs::write(&path, "  \n").unwrap();
        assert!(read_trace(&path).is_err());
    }

    #[test]
    fn missing_config_uses_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.fit.ac.runs, 30);
    }

    #[test]
    fn fit_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let trace_path = dir.path().join("trace.txt");
        let config_path = dir.path().join("kpcfit.toml");
        let output_path = dir.path().join("fit.toml");
        write_trace(&trace_path, 2000);
        fs::write(
            &config_path,
            "[trace]\nn_lags = 40\n\n[fit.ac]\nruns = 2\nmax_iters = 60\nkeep = 2\n",
        )
        .unwrap();

        run(FitArgs {
            trace: trace_path,
            config: Some(config_path),
            output: Some(output_path.clone()),
            seed: Some(11),
            maps: Some(1),
            with_bc: false,
        })
        .unwrap();

        let report: toml::Value = toml::from_str(&fs::read_to_string(&output_path).unwrap()).unwrap();
        assert_eq!(report["num_maps"].as_integer(), Some(1));
        assert_eq!(report["states"].as_integer(), Some(2));
        assert_eq!(report["d0"].as_array().unwrap().len(), 2);
        assert_eq!(report["d1"].as_array().unwrap().len(), 2);
        assert!(report["score"]["ac"].as_float().unwrap().is_finite());
        let finalists = report["finalists"].as_array().unwrap();
        assert!(!finalists.is_empty() && finalists.len() <= 2);
        assert_eq!(finalists[0]["rank"].as_integer(), Some(1));
    }
}
