//! TOML report of a fit.

use kpc_fit::{FitOutcome, FitScore, FittedCandidate};
use kpc_map::MapKind;
use nalgebra::DMatrix;
use serde::Serialize;

/// Top-level fit report. Scalars precede tables so the TOML stays flat.
#[derive(Debug, Serialize)]
pub struct FitReport {
    pub num_maps: usize,
    pub states: usize,
    pub kind: String,
    pub semi_markov: bool,
    pub d0: Vec<Vec<f64>>,
    pub d1: Vec<Vec<f64>>,
    pub score: ScoreReport,
    pub finalists: Vec<FinalistReport>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoreReport {
    pub ac: f64,
    pub bc: f64,
    pub total: f64,
}

impl From<FitScore> for ScoreReport {
    fn from(score: FitScore) -> Self {
        Self {
            ac: score.ac,
            bc: score.bc,
            total: score.total(),
        }
    }
}

/// One ranked finalist.
#[derive(Debug, Serialize)]
pub struct FinalistReport {
    pub rank: usize,
    pub semi_markov: bool,
    pub ac: f64,
    pub bc: f64,
    pub total: f64,
    pub scv: Vec<f64>,
    pub gamma: Vec<f64>,
}

impl FinalistReport {
    fn new(rank: usize, candidate: &FittedCandidate) -> Self {
        let score = ScoreReport::from(candidate.score());
        Self {
            rank,
            semi_markov: candidate.is_semi_markov(),
            ac: score.ac,
            bc: score.bc,
            total: score.total,
            scv: candidate.ac().scv().to_vec(),
            gamma: candidate.ac().gamma().to_vec(),
        }
    }
}

impl FitReport {
    /// Report on the best candidate of `outcome`, or `None` when it is empty.
    pub fn from_outcome(outcome: &FitOutcome) -> Option<Self> {
        let best = outcome.best()?;
        let map = best.map();
        Some(Self {
            num_maps: outcome.num_maps(),
            states: map.num_states(),
            kind: kind_name(map.kind()).to_string(),
            semi_markov: best.is_semi_markov(),
            d0: rows(map.d0()),
            d1: rows(map.d1()),
            score: best.score().into(),
            finalists: outcome
                .candidates()
                .iter()
                .enumerate()
                .map(|(i, c)| FinalistReport::new(i + 1, c))
                .collect(),
        })
    }
}

fn kind_name(kind: MapKind) -> &'static str {
    match kind {
        MapKind::Markov => "map",
        MapKind::SemiMarkov => "semi-markov",
    }
}

fn rows(m: &DMatrix<f64>) -> Vec<Vec<f64>> {
    m.row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}
