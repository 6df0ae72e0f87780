//! # kpc-map
//!
//! Markovian arrival processes (MAPs) in `{D0, D1}` form, their semi-Markov
//! variant, and the Kronecker product composition (KPC) that builds large
//! MAPs out of two-state blocks.
//!
//! ## Workflow
//!
//! ```mermaid
//! graph LR
//!     A["MapModel::new(d0, d1)?"] --> B[".is_feasible()"]
//!     A --> C[".moments / .acf / .joint"]
//!     D["Composer::new()"] -->|".compose_map(e1, e3, scv, gamma, j)?"| A
//!     E["ClosedFormFitter"] -->|"two-state blocks"| D
//! ```
//!
//! ## Glossary
//!
//! | Symbol | Accessor | Meaning |
//! |--------|----------|---------|
//! | D0 | [`MapModel::d0()`] | Rates of hidden transitions (no arrival) |
//! | D1 | [`MapModel::d1()`] | Rates of transitions that trigger an arrival |
//! | P | [`MapModel::p()`] | Embedded chain at arrival epochs, `(-D0)^-1 D1` |
//! | Q | [`MapModel::q()`] | Generator of the underlying chain, `D0 + D1` |
//! | pi | [`MapModel::pi()`] | Stationary distribution of `P` |
//! | SCV | [`MapModel::scv()`] | Squared coefficient of variation |
//! | gamma | [`MapModel::gamma()`] | Autocorrelation decay rate |

mod compose;
mod error;
mod feasibility;
mod fittings;
mod model;
mod statistics;

pub mod linalg;

pub use compose::{ComponentTarget, Composer, Relaxation, Role, kronecker_compose};
pub use error::MapError;
pub use feasibility::{FeasibilityReport, Violation};
pub use fittings::{ClosedFormFitter, MomentFitter};
pub use model::{CONSTRAINT_TOL, FEASIBLE_TOL, MAX_MAP_SIZE, MapKind, MapModel, ZERO};
