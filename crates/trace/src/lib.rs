//! # kpc-trace
//!
//! Statistical signature of an inter-arrival time trace: raw moments, the
//! FFT-based autocorrelation at every lag and at a log-spaced subset, and
//! bicorrelations over a grid of log-spaced lag pairs.
//!
//! ```
//! use kpc_trace::{Trace, TraceConfig};
//!
//! let samples: Vec<f64> = (0..200).map(|i| 0.5 + (i % 7) as f64).collect();
//! let trace = Trace::from_samples(&samples, &TraceConfig::new()).unwrap();
//! assert_eq!(trace.ac_full()[0], 1.0);
//! assert_eq!(trace.bc().len(), trace.bc_lags().len());
//! ```

mod config;
mod error;
mod lags;
mod trace;

pub use config::TraceConfig;
pub use error::TraceError;
pub use lags::logspacei;
pub use trace::Trace;
