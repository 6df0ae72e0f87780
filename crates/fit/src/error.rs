//! Error types for the kpc-fit crate.

use kpc_map::MapError;
use kpc_trace::TraceError;

/// Error type for all fallible operations in the kpc-fit crate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FitError {
    /// A MAP construction or statistic failed.
    #[error(transparent)]
    Map(#[from] MapError),

    /// Trace statistics were unavailable or invalid.
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// Returned when a [`FitOptions`](crate::FitOptions) value is out of range.
    #[error("invalid fit option {name}: {reason}")]
    InvalidOption {
        /// Option name.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Returned for order-selection criteria other than BIC.
    #[error("order selection criterion {criterion} is not implemented")]
    CriterionNotImplemented {
        /// Name of the requested criterion.
        criterion: String,
    },

    /// Returned when a minimizer cannot produce any evaluated point.
    #[error("optimization failed: {0}")]
    OptimizationFailed(String),

    /// Returned when no fitted candidate could be assembled into a MAP.
    #[error("no feasible MAP among {candidates} fitted candidates")]
    NoFeasibleFinalists {
        /// Number of AC results that were carried into assembly.
        candidates: usize,
    },
}
