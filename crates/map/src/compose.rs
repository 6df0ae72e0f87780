//! Kronecker product composition (KPC) of two-state processes.
//!
//! A composition of `J` components has `2^J` states. Component 0 is the
//! "head" and may be any MAP(2) (an MMPP(2) when its targets allow);
//! components `1..J` are diagonal blocks whose embedded chains commute, so
//! their moments and correlations combine multiplicatively.
//!
//! When a component cannot be realised exactly, the composer walks an
//! explicit fallback ladder of [`Relaxation`]s and keeps the first result
//! that passes the feasibility (or, for semi-Markov heads, validity) check.

use tracing::debug;

use crate::error::MapError;
use crate::fittings::{ClosedFormFitter, MomentFitter};
use crate::linalg::kron;
use crate::model::{MapKind, MapModel};

/// Relaxation applied by one step of a fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relaxation {
    /// Fit every target exactly.
    Exact,
    /// Erlang-2 renewal with the target mean; ignores `e2`, `e3` and gamma.
    ErlangTwo,
    /// Poisson process with the target mean; ignores everything else.
    Exponential,
    /// Let the fitter choose the third moment.
    IgnoreThirdMoment,
    /// Let the fitter choose the third moment and drop correlation.
    IgnoreThirdMomentAndGamma,
}

/// Position of a component inside the composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Component 0 of a MAP composition.
    Head,
    /// Component 0 of a semi-Markov composition.
    SemiMarkovHead,
    /// Components `1..J`.
    Diagonal,
}

impl Role {
    /// Fallback ladder for a component of this role with the given SCV.
    ///
    /// Heads with SCV below 0.5 fall back to Erlang-2; diagonal blocks with
    /// SCV below 1 fall back to a Poisson process. Everything else drops the
    /// third moment, then the correlation.
    pub fn ladder(self, scv: f64) -> Vec<Relaxation> {
        let low_variability = match self {
            Self::Head | Self::SemiMarkovHead => (scv < 0.5).then_some(Relaxation::ErlangTwo),
            Self::Diagonal => (scv < 1.0).then_some(Relaxation::Exponential),
        };
        match low_variability {
            Some(step) => vec![Relaxation::Exact, step],
            None => vec![
                Relaxation::Exact,
                Relaxation::IgnoreThirdMoment,
                Relaxation::IgnoreThirdMomentAndGamma,
            ],
        }
    }

    fn accepts(self, model: &MapModel) -> bool {
        match self {
            Self::SemiMarkovHead => model.is_valid(),
            Self::Head | Self::Diagonal => model.is_feasible(),
        }
    }
}

/// Moment and correlation targets of one component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentTarget {
    /// First moment.
    pub e1: f64,
    /// Second moment, `(1 + scv) e1^2`.
    pub e2: f64,
    /// Third moment.
    pub e3: f64,
    /// Squared coefficient of variation.
    pub scv: f64,
    /// Lag-1 autocorrelation decay rate.
    pub gamma: f64,
}

impl ComponentTarget {
    /// Builds a target, deriving `e2 = (1 + scv) e1^2`.
    pub fn new(e1: f64, e3: f64, scv: f64, gamma: f64) -> Self {
        Self {
            e1,
            e2: (1.0 + scv) * e1 * e1,
            e3,
            scv,
            gamma,
        }
    }

    /// Rounds `e2` to 15 decimal places.
    ///
    /// Diagonal components are fitted from the rounded value so that their
    /// generators agree digit for digit with fits computed from `e2` values
    /// printed at that precision.
    pub fn snapped(self) -> Self {
        Self {
            e2: snap(self.e2),
            ..self
        }
    }
}

fn snap(x: f64) -> f64 {
    format!("{x:.15}").parse().unwrap_or(x)
}

/// Kronecker composition of two processes.
///
/// `D0 = kron(-D0_a, D0_b)` and `D1 = kron(D1_a, D1_b)`. The operation is
/// associative but not commutative: `compose(a, b)` and `compose(b, a)`
/// differ by a state permutation. If either operand is semi-Markov the
/// result is semi-Markov with `P = kron(P_a, P_b)`.
pub fn kronecker_compose(a: &MapModel, b: &MapModel) -> Result<MapModel, MapError> {
    let d0 = kron(&(-a.d0()), b.d0());
    if a.kind() == MapKind::Markov && b.kind() == MapKind::Markov {
        MapModel::new(d0, kron(a.d1(), b.d1()))
    } else {
        MapModel::semi_markov(d0, kron(a.p(), b.p()))
    }
}

/// Builds KPC compositions from per-component targets.
#[derive(Debug, Clone, Default)]
pub struct Composer<F = ClosedFormFitter> {
    fitter: F,
}

impl Composer {
    /// Creates a composer backed by [`ClosedFormFitter`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl<F: MomentFitter> Composer<F> {
    /// Creates a composer backed by a custom fitter.
    pub fn with_fitter(fitter: F) -> Self {
        Self { fitter }
    }

    /// Returns the underlying fitter.
    pub fn fitter(&self) -> &F {
        &self.fitter
    }

    /// Applies one relaxation to one component.
    pub fn realize(
        &self,
        role: Role,
        relaxation: Relaxation,
        t: &ComponentTarget,
    ) -> Result<MapModel, MapError> {
        let f = &self.fitter;
        match (relaxation, role) {
            (Relaxation::Exact, Role::Head) => f.mmpp(t.e1, t.e2, t.e3, t.scv, t.gamma),
            (Relaxation::Exact, Role::SemiMarkovHead) => f.semi_markov(t.e1, t.e2, t.e3, t.gamma),
            (Relaxation::Exact, Role::Diagonal) => f.diagonal_block(t.e1, t.e2, t.e3, t.gamma),
            (Relaxation::ErlangTwo, _) => f.erlang(t.e1, 2),
            (Relaxation::Exponential, _) => f.exponential(t.e1),
            (Relaxation::IgnoreThirdMoment, _) => f.map2(t.e1, t.e2, None, t.scv, t.gamma),
            (Relaxation::IgnoreThirdMomentAndGamma, _) => f.map2(t.e1, t.e2, None, t.scv, 0.0),
        }
    }

    /// Walks the fallback ladder of `role` and returns the first accepted
    /// model together with the relaxation that produced it.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InfeasibleComposition`] when every step fails.
    pub fn fit_component(
        &self,
        role: Role,
        target: &ComponentTarget,
    ) -> Result<(MapModel, Relaxation), MapError> {
        for relaxation in role.ladder(target.scv) {
            match self.realize(role, relaxation, target) {
                Ok(model) if role.accepts(&model) => return Ok((model, relaxation)),
                Ok(model) => {
                    let report = match role {
                        Role::SemiMarkovHead => model.validity(crate::FEASIBLE_TOL),
                        Role::Head | Role::Diagonal => model.feasibility(crate::FEASIBLE_TOL),
                    };
                    debug!(
                        ?role,
                        ?relaxation,
                        violations = report.violations().len(),
                        "component rejected"
                    );
                }
                Err(e) => debug!(?role, ?relaxation, error = %e, "component not realisable"),
            }
        }
        Err(MapError::InfeasibleComposition {
            reason: format!(
                "{role:?} component (e1={}, e3={}, scv={}, gamma={}) exhausted its fallbacks",
                target.e1, target.e3, target.scv, target.gamma
            ),
        })
    }

    /// Composes a MAP with `2^j` states from per-component targets.
    ///
    /// Only the first `j` entries of each slice are used. The result is
    /// checked for feasibility and then normalized.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::ParameterCount`] for short inputs and
    /// [`MapError::InfeasibleComposition`] when a component exhausts its
    /// fallbacks or the composed process is infeasible.
    pub fn compose_map(
        &self,
        e1: &[f64],
        e3: &[f64],
        scv: &[f64],
        gamma: &[f64],
        j: usize,
    ) -> Result<MapModel, MapError> {
        let targets = targets(e1, e3, scv, gamma, j)?;
        let mut result = self.compose(Role::Head, &targets)?;
        if !result.is_feasible() {
            let report = result.feasibility(crate::FEASIBLE_TOL);
            let reason = report
                .violations()
                .first()
                .map_or_else(|| "unknown violation".to_string(), ToString::to_string);
            return Err(MapError::InfeasibleComposition {
                reason: format!("composed MAP is infeasible: {reason}"),
            });
        }
        result.normalize();
        Ok(result)
    }

    /// Composes a semi-Markov process with `2^j` states.
    ///
    /// Like [`Composer::compose_map`], but component 0 is a semi-Markov head
    /// and the result only has to be a valid SMP. It is not normalized.
    ///
    /// # Errors
    ///
    /// Same as [`Composer::compose_map`], with validity in place of
    /// feasibility.
    pub fn compose_semi_markov(
        &self,
        e1: &[f64],
        e3: &[f64],
        scv: &[f64],
        gamma: &[f64],
        j: usize,
    ) -> Result<MapModel, MapError> {
        let targets = targets(e1, e3, scv, gamma, j)?;
        let result = self.compose(Role::SemiMarkovHead, &targets)?;
        if !result.is_valid() {
            return Err(MapError::InfeasibleComposition {
                reason: "composed semi-Markov process is not valid".to_string(),
            });
        }
        Ok(result)
    }

    fn compose(&self, head_role: Role, targets: &[ComponentTarget]) -> Result<MapModel, MapError> {
        let (head, relaxation) = self.fit_component(head_role, &targets[0])?;
        debug!(?relaxation, "head component fitted");

        let mut chain: Option<MapModel> = None;
        for (index, target) in targets.iter().enumerate().skip(1) {
            let (block, relaxation) = self.fit_component(Role::Diagonal, target)?;
            debug!(index, ?relaxation, "diagonal component fitted");
            chain = Some(match chain {
                None => block,
                Some(acc) => kronecker_compose(&acc, &block)?,
            });
        }
        match chain {
            Some(chain) => kronecker_compose(&head, &chain),
            None => Ok(head),
        }
    }
}

fn targets(
    e1: &[f64],
    e3: &[f64],
    scv: &[f64],
    gamma: &[f64],
    j: usize,
) -> Result<Vec<ComponentTarget>, MapError> {
    if j == 0 {
        return Err(MapError::ParameterCount {
            name: "components",
            expected: 1,
            got: 0,
        });
    }
    for (name, values) in [("e1", e1), ("e3", e3), ("scv", scv), ("gamma", gamma)] {
        if values.len() < j {
            return Err(MapError::ParameterCount {
                name,
                expected: j,
                got: values.len(),
            });
        }
    }
    Ok((0..j)
        .map(|i| {
            let target = ComponentTarget::new(e1[i], e3[i], scv[i], gamma[i]);
            if i == 0 { target } else { target.snapped() }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::DMatrix;

    /// Fitter that records every call and answers each with the same model,
    /// or with an error when it has none.
    #[derive(Debug, Default)]
    struct ScriptedFitter {
        calls: RefCell<Vec<&'static str>>,
        answer: Option<MapModel>,
    }

    impl ScriptedFitter {
        fn answering(model: MapModel) -> Self {
            Self {
                calls: RefCell::default(),
                answer: Some(model),
            }
        }

        fn respond(&self, method: &'static str) -> Result<MapModel, MapError> {
            self.calls.borrow_mut().push(method);
            self.answer.clone().ok_or_else(|| MapError::Unrealizable {
                reason: format!("{method} unavailable"),
            })
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.borrow().clone()
        }
    }

    impl MomentFitter for ScriptedFitter {
        fn mmpp(&self, _: f64, _: f64, _: f64, _: f64, _: f64) -> Result<MapModel, MapError> {
            self.respond("mmpp")
        }

        fn map2(
            &self,
            _: f64,
            _: f64,
            _: Option<f64>,
            _: f64,
            _: f64,
        ) -> Result<MapModel, MapError> {
            self.respond("map2")
        }

        fn diagonal_block(&self, _: f64, _: f64, _: f64, _: f64) -> Result<MapModel, MapError> {
            self.respond("diagonal_block")
        }

        fn erlang(&self, _: f64, _: usize) -> Result<MapModel, MapError> {
            self.respond("erlang")
        }

        fn exponential(&self, _: f64) -> Result<MapModel, MapError> {
            self.respond("exponential")
        }

        fn semi_markov(&self, _: f64, _: f64, _: f64, _: f64) -> Result<MapModel, MapError> {
            self.respond("semi_markov")
        }
    }

    /// Feasible MAP(2) with a hidden transition out of state 0.
    fn coupled_map2() -> MapModel {
        let d0 = DMatrix::from_row_slice(2, 2, &[-2.0, 1.0, 0.0, -1.0]);
        let d1 = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.5, 0.5]);
        MapModel::new(d0, d1).unwrap()
    }

    fn negative_arrivals() -> MapModel {
        let d0 = DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, -1.0]);
        let d1 = DMatrix::from_row_slice(2, 2, &[1.2, -0.2, 0.0, 1.0]);
        MapModel::new(d0, d1).unwrap()
    }

    #[test]
    fn head_ladder_low_variability() {
        assert_eq!(
            Role::Head.ladder(0.3),
            vec![Relaxation::Exact, Relaxation::ErlangTwo]
        );
    }

    #[test]
    fn diagonal_ladder_low_variability() {
        assert_eq!(
            Role::Diagonal.ladder(0.9),
            vec![Relaxation::Exact, Relaxation::Exponential]
        );
    }

    #[test]
    fn ladders_drop_third_moment_then_gamma() {
        let expected = vec![
            Relaxation::Exact,
            Relaxation::IgnoreThirdMoment,
            Relaxation::IgnoreThirdMomentAndGamma,
        ];
        assert_eq!(Role::Head.ladder(0.7), expected);
        assert_eq!(Role::Diagonal.ladder(2.0), expected);
    }

    #[test]
    fn snap_keeps_fifteen_decimals() {
        assert_eq!(snap(0.1 + 0.2), 0.3);
        assert_eq!(snap(2.754984031255612), 2.754984031255612);
    }

    #[test]
    fn only_diagonal_targets_are_snapped() {
        let e1 = 0.1 + 0.2;
        let t = targets(&[e1, e1], &[1.0, 1.0], &[1.5, 1.5], &[0.1, 0.1], 2).unwrap();
        assert_eq!(t[0].e2, 2.5 * e1 * e1);
        assert_eq!(t[1].e2, snap(2.5 * e1 * e1));
    }

    #[test]
    fn head_falls_back_to_erlang() {
        let composer = Composer::new();
        let target = ComponentTarget::new(2.0, 1.0, 0.3, 0.5);
        let (model, relaxation) = composer.fit_component(Role::Head, &target).unwrap();
        assert_eq!(relaxation, Relaxation::ErlangTwo);
        assert_abs_diff_eq!(model.mean(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn head_drops_third_moment() {
        let composer = Composer::new();
        // e3 below the hyper-exponential bound: exact fit impossible.
        let target = ComponentTarget::new(1.0, 1.0, 2.0, 0.3);
        let (model, relaxation) = composer.fit_component(Role::Head, &target).unwrap();
        assert_eq!(relaxation, Relaxation::IgnoreThirdMoment);
        assert!(model.is_feasible());
        assert_abs_diff_eq!(model.scv(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn diagonal_falls_back_to_exponential() {
        let composer = Composer::new();
        let target = ComponentTarget::new(0.5, 1.0, 0.9, 0.2);
        let (model, relaxation) = composer.fit_component(Role::Diagonal, &target).unwrap();
        assert_eq!(relaxation, Relaxation::Exponential);
        assert_eq!(model.num_states(), 1);
    }

    #[test]
    fn single_component_is_head() {
        let composer = Composer::new();
        let map = composer
            .compose_map(&[1.0], &[33.0], &[3.0], &[0.4], 1)
            .unwrap();
        assert_eq!(map.num_states(), 2);
        assert_abs_diff_eq!(map.gamma(), 0.4, epsilon = 1e-9);
    }

    #[test]
    fn compose_rejects_short_inputs() {
        let composer = Composer::new();
        let err = composer
            .compose_map(&[1.0, 1.0], &[33.0], &[3.0, 3.0], &[0.4, 0.4], 2)
            .unwrap_err();
        assert!(matches!(
            err,
            MapError::ParameterCount {
                name: "e3",
                expected: 2,
                got: 1
            }
        ));
        let err = composer.compose_map(&[], &[], &[], &[], 0).unwrap_err();
        assert!(matches!(err, MapError::ParameterCount { .. }));
    }

    #[test]
    fn unrealisable_component_exhausts_ladder() {
        let cases = [
            (Role::Head, 2.0, vec!["mmpp", "map2", "map2"]),
            (Role::Head, 0.3, vec!["mmpp", "erlang"]),
            (Role::SemiMarkovHead, 2.0, vec!["semi_markov", "map2", "map2"]),
            (Role::Diagonal, 0.9, vec!["diagonal_block", "exponential"]),
        ];
        for (role, scv, expected) in cases {
            let composer = Composer::with_fitter(ScriptedFitter::default());
            let target = ComponentTarget::new(1.0, 20.0, scv, 0.3);
            let err = composer.fit_component(role, &target).unwrap_err();
            assert!(
                matches!(err, MapError::InfeasibleComposition { .. }),
                "{role:?}: {err}"
            );
            assert_eq!(composer.fitter().calls().len(), role.ladder(scv).len());
            assert_eq!(composer.fitter().calls(), expected, "{role:?} scv={scv}");
        }
    }

    #[test]
    fn infeasible_components_are_rejected() {
        let composer = Composer::with_fitter(ScriptedFitter::answering(negative_arrivals()));
        let target = ComponentTarget::new(1.0, 20.0, 2.0, 0.3);
        let err = composer.fit_component(Role::Head, &target).unwrap_err();
        assert!(matches!(err, MapError::InfeasibleComposition { .. }));
        assert_eq!(composer.fitter().calls().len(), 3);

        let err = composer
            .compose_map(&[1.0], &[20.0], &[2.0], &[0.3], 1)
            .unwrap_err();
        assert!(matches!(err, MapError::InfeasibleComposition { .. }));
    }

    #[test]
    fn infeasible_product_fails_composition() {
        let composer = Composer::with_fitter(ScriptedFitter::answering(coupled_map2()));
        let target = ComponentTarget::new(1.0, 20.0, 2.0, 0.3);
        let (head, relaxation) = composer.fit_component(Role::Head, &target).unwrap();
        assert_eq!(relaxation, Relaxation::Exact);
        assert!(head.is_feasible());
        assert!(!kronecker_compose(&head, &head).unwrap().is_feasible());

        let err = composer
            .compose_map(&[1.0, 1.0], &[20.0, 20.0], &[2.0, 2.0], &[0.3, 0.3], 2)
            .unwrap_err();
        match err {
            MapError::InfeasibleComposition { reason } => {
                assert!(reason.starts_with("composed MAP is infeasible"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            composer.fitter().calls(),
            vec!["mmpp", "mmpp", "diagonal_block"]
        );
    }
}
