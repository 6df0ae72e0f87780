//! Error types for the kpc-trace crate.

/// Error type for all fallible operations in the kpc-trace crate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TraceError {
    /// Returned when the sample holds no values.
    #[error("trace is empty")]
    EmptyData,

    /// Returned when the sample is too short for autocorrelation estimates.
    #[error("trace too short: got {n} samples, need at least {min}")]
    InsufficientData {
        /// Number of samples provided.
        n: usize,
        /// Minimum number of samples required.
        min: usize,
    },

    /// Returned when the sample contains NaN or infinite values.
    #[error("trace contains non-finite values")]
    NonFiniteData,

    /// Returned when an inter-arrival time is zero or negative.
    #[error("inter-arrival time at index {index} is not positive: {value}")]
    NonPositiveData {
        /// Position of the first offending sample.
        index: usize,
        /// The offending value.
        value: f64,
    },

    /// Returned when every sample has the same value.
    #[error("trace is constant: autocorrelation is undefined")]
    ConstantData,

    /// Returned when more moments are requested than were computed.
    #[error("moment of order {requested} requested, only {available} available")]
    MomentsUnavailable {
        /// Requested moment order.
        requested: usize,
        /// Highest computed moment order.
        available: usize,
    },

    /// Returned when an autocorrelation lag exceeds the trace length.
    #[error("lag {lag} out of range for a trace of {len} samples")]
    LagOutOfRange {
        /// Requested lag.
        lag: usize,
        /// Number of samples in the trace.
        len: usize,
    },

    /// Returned when a [`TraceConfig`](crate::TraceConfig) setting is below its minimum.
    #[error("invalid trace setting {name} = {value}: must be at least {min}")]
    InvalidConfig {
        /// Setting name.
        name: &'static str,
        /// Value provided.
        value: usize,
        /// Smallest accepted value.
        min: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_empty() {
        assert_eq!(TraceError::EmptyData.to_string(), "trace is empty");
    }

    #[test]
    fn error_insufficient() {
        let err = TraceError::InsufficientData { n: 5, min: 20 };
        assert_eq!(
            err.to_string(),
            "trace too short: got 5 samples, need at least 20"
        );
    }

    #[test]
    fn error_non_finite() {
        assert_eq!(
            TraceError::NonFiniteData.to_string(),
            "trace contains non-finite values"
        );
    }

    #[test]
    fn error_non_positive() {
        let err = TraceError::NonPositiveData {
            index: 3,
            value: -0.5,
        };
        assert_eq!(
            err.to_string(),
            "inter-arrival time at index 3 is not positive: -0.5"
        );
    }

    #[test]
    fn error_constant() {
        assert_eq!(
            TraceError::ConstantData.to_string(),
            "trace is constant: autocorrelation is undefined"
        );
    }

    #[test]
    fn error_moments_unavailable() {
        let err = TraceError::MomentsUnavailable {
            requested: 12,
            available: 10,
        };
        assert_eq!(
            err.to_string(),
            "moment of order 12 requested, only 10 available"
        );
    }

    #[test]
    fn error_lag_out_of_range() {
        let err = TraceError::LagOutOfRange { lag: 100, len: 50 };
        assert_eq!(
            err.to_string(),
            "lag 100 out of range for a trace of 50 samples"
        );
    }

    #[test]
    fn error_invalid_config() {
        let err = TraceError::InvalidConfig {
            name: "n_lags",
            value: 0,
            min: 1,
        };
        assert_eq!(
            err.to_string(),
            "invalid trace setting n_lags = 0: must be at least 1"
        );
    }

    #[test]
    fn error_is_std_error() {
        fn assert_impl<T: std::error::Error>() {}
        assert_impl::<TraceError>();
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_impl<T: Send + Sync>() {}
        assert_impl::<TraceError>();
    }
}
