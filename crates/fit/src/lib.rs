//! # kpc-fit
//!
//! Fits Kronecker-product-composed MAPs to the statistics of a trace.
//!
//! ## Pipeline
//!
//! ```mermaid
//! graph LR
//!     A[Trace] --> B["select_order (BIC)"]
//!     B --> C["AC stage: scv, gamma per component"]
//!     C -->|"best ac_keep runs"| D["BC stage: e1, e3 per component"]
//!     C -->|"only_ac"| E[assemble]
//!     D --> E
//!     E --> F["evaluate + rank"]
//! ```
//!
//! Restarts within a stage are independent and run on the rayon pool. With a
//! seed set in [`FitOptions`], every run derives its own RNG from it and the
//! outcome is reproducible.

mod config;
mod error;
mod evaluate;
mod fitter;
mod minimizer;
mod objective;
mod result;
mod selection;

pub use config::{FitOptions, MAX_COMPONENTS, OrderCriterion};
pub use error::FitError;
pub use evaluate::{FitScore, evaluate};
pub use fitter::TraceFitter;
pub use minimizer::{
    Bounds, BoxedNelderMead, ConstrainedMinimizer, GlobalMinimizer, INFEASIBLE_PENALTY, Minimum,
    PenaltyNelderMead,
};
pub use objective::{AcObjective, BcObjective};
pub use result::{AcFitResult, BcFitResult, FitOutcome, FittedCandidate};
pub use selection::{FALLBACK_ORDER, MAX_REGRESSION_LAGS, OrderScore, bic_scores, select_order};
