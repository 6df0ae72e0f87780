//! Results of the fitting stages.

use kpc_map::MapModel;

use crate::evaluate::FitScore;

/// Best point of one autocorrelation-stage run.
#[derive(Debug, Clone, PartialEq)]
pub struct AcFitResult {
    scv: Vec<f64>,
    gamma: Vec<f64>,
    value: f64,
}

impl AcFitResult {
    pub(crate) fn new(scv: Vec<f64>, gamma: Vec<f64>, value: f64) -> Self {
        Self { scv, gamma, value }
    }

    /// Per-component squared coefficients of variation.
    pub fn scv(&self) -> &[f64] {
        &self.scv
    }

    /// Per-component autocorrelation decay rates.
    pub fn gamma(&self) -> &[f64] {
        &self.gamma
    }

    /// Objective value at this point.
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Best point of the bicorrelation stage for one AC result.
#[derive(Debug, Clone, PartialEq)]
pub struct BcFitResult {
    e1: Vec<f64>,
    e2: Vec<f64>,
    e3: Vec<f64>,
    value: f64,
}

impl BcFitResult {
    pub(crate) fn new(e1: Vec<f64>, e2: Vec<f64>, e3: Vec<f64>, value: f64) -> Self {
        Self { e1, e2, e3, value }
    }

    /// Per-component first moments.
    pub fn e1(&self) -> &[f64] {
        &self.e1
    }

    /// Per-component second moments implied by the AC-stage SCVs.
    pub fn e2(&self) -> &[f64] {
        &self.e2
    }

    /// Per-component third moments.
    pub fn e3(&self) -> &[f64] {
        &self.e3
    }

    /// Objective value at this point.
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// An assembled MAP with the stage results that produced it.
#[derive(Debug, Clone)]
pub struct FittedCandidate {
    map: MapModel,
    ac: AcFitResult,
    bc: Option<BcFitResult>,
    score: FitScore,
    semi_markov: bool,
}

impl FittedCandidate {
    pub(crate) fn new(
        map: MapModel,
        ac: AcFitResult,
        bc: Option<BcFitResult>,
        score: FitScore,
    ) -> Self {
        let semi_markov = !map.is_feasible();
        Self {
            map,
            ac,
            bc,
            score,
            semi_markov,
        }
    }

    /// The fitted process, scaled to the trace mean.
    pub fn map(&self) -> &MapModel {
        &self.map
    }

    /// Autocorrelation-stage result.
    pub fn ac(&self) -> &AcFitResult {
        &self.ac
    }

    /// Bicorrelation-stage result, absent for AC-only fits.
    pub fn bc(&self) -> Option<&BcFitResult> {
        self.bc.as_ref()
    }

    /// Closeness of fit to the trace.
    pub fn score(&self) -> FitScore {
        self.score
    }

    /// `true` when the process is only valid as a semi-Markov process.
    pub fn is_semi_markov(&self) -> bool {
        self.semi_markov
    }
}

/// Ranked outcome of [`TraceFitter::fit`](crate::TraceFitter::fit).
#[derive(Debug, Clone)]
pub struct FitOutcome {
    num_maps: usize,
    candidates: Vec<FittedCandidate>,
}

impl FitOutcome {
    pub(crate) fn new(num_maps: usize, candidates: Vec<FittedCandidate>) -> Self {
        Self {
            num_maps,
            candidates,
        }
    }

    /// Number of composed components `J`; each MAP has `2^J` states.
    pub fn num_maps(&self) -> usize {
        self.num_maps
    }

    /// Candidates ordered by total score, best first.
    pub fn candidates(&self) -> &[FittedCandidate] {
        &self.candidates
    }

    /// The best-scoring candidate.
    pub fn best(&self) -> Option<&FittedCandidate> {
        self.candidates.first()
    }
}
