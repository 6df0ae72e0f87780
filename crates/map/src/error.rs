//! Error types for the kpc-map crate.

/// Error type for all fallible operations in the kpc-map crate.
///
/// Numeric degeneracy (near-singular generators, degenerate null spaces) is
/// deliberately absent: those paths return best-effort values and callers
/// re-check feasibility instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MapError {
    /// Returned when D0 and D1 are not square matrices of equal shape.
    #[error("generator shapes do not match: D0 is {d0_rows}x{d0_cols}, D1 is {d1_rows}x{d1_cols}")]
    InvalidShape {
        /// Rows of D0.
        d0_rows: usize,
        /// Columns of D0.
        d0_cols: usize,
        /// Rows of D1.
        d1_rows: usize,
        /// Columns of D1.
        d1_cols: usize,
    },

    /// Returned when joint-moment lag and order vectors differ in length.
    #[error("joint moment vectors do not match: {lags} lags, {orders} orders")]
    JointLengthMismatch {
        /// Number of lag offsets supplied.
        lags: usize,
        /// Number of moment orders supplied.
        orders: usize,
    },

    /// Returned when cumulative joint-moment lags are not strictly increasing.
    #[error("joint moment lags are not strictly increasing")]
    LagsNotIncreasing,

    /// Returned when a joint-moment order is zero.
    #[error("joint moment order at position {position} must be positive")]
    NonPositiveOrder {
        /// Index of the offending order.
        position: usize,
    },

    /// Returned when a composition receives fewer parameters than components.
    #[error("expected at least {expected} values for {name}, got {got}")]
    ParameterCount {
        /// Parameter vector name.
        name: &'static str,
        /// Number of components requested.
        expected: usize,
        /// Number of values supplied.
        got: usize,
    },

    /// Returned when a two-state fitter cannot realise the requested targets.
    #[error("targets are not realisable: {reason}")]
    Unrealizable {
        /// Description of the failure.
        reason: String,
    },

    /// Returned when composition fails after every fallback was tried.
    #[error("infeasible composition: {reason}")]
    InfeasibleComposition {
        /// Description of the failure.
        reason: String,
    },
}
