//! Simultaneous-perturbation stochastic approximation.
//!
//! Each iteration evaluates two points, `theta + c_k * p * delta` and
//! `theta - c_k * p * delta` with a random sign vector `delta`, estimates the
//! gradient from their score difference and steps `theta` against it. Gains
//! decay as `a_k = a / (A + k + 1)^alpha` and `c_k = c / (k + 1)^gamma`.

use log::debug;

use crate::schema::{ParameterSpace, SpsaConfig};

use super::archive::EliteArchive;
use super::genome::{Genome, GenomeRng, ScoredGenome};
use super::search::Optimizer;

/// Points proposed in the current iteration, in normalised coordinates.
struct Probe {
    plus: Vec<f64>,
    minus: Vec<f64>,
}

pub struct Spsa {
    config: SpsaConfig,
    space: ParameterSpace,
    /// Current iterate, every coordinate in `[0, 1]`.
    theta: Vec<f64>,
    iteration: usize,
    rng: GenomeRng,
    probe: Option<Probe>,
}

impl Spsa {
    pub fn new(config: SpsaConfig, space: ParameterSpace, seed: u64) -> Self {
        let theta = match &config.initial {
            Some(params) => normalize(&space, &space.encode(params)),
            None => vec![0.5; space.len()],
        };
        Self {
            config,
            space,
            theta,
            iteration: 0,
            rng: GenomeRng::new(seed),
            probe: None,
        }
    }

    /// Current iterate in gene units.
    pub fn theta(&self) -> Genome {
        denormalize(&self.space, &self.theta)
    }

    /// Iterations completed.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    fn step_gain(&self) -> f64 {
        let k = self.iteration as f64;
        self.config.a / (self.config.big_a + k + 1.0).powf(self.config.alpha)
    }

    fn perturbation_gain(&self) -> f64 {
        let k = self.iteration as f64;
        self.config.c / (k + 1.0).powf(self.config.gamma)
    }
}

impl Optimizer for Spsa {
    fn name(&self) -> &'static str {
        "spsa"
    }

    fn propose(&mut self) -> Vec<Genome> {
        let size = self.perturbation_gain() * self.config.perturbation;
        let delta = self.rng.rademacher(self.theta.len());

        let shifted = |sign: f64| -> Vec<f64> {
            self.theta
                .iter()
                .zip(&delta)
                .map(|(t, d)| (t + sign * size * d).clamp(0.0, 1.0))
                .collect()
        };
        let probe = Probe {
            plus: shifted(1.0),
            minus: shifted(-1.0),
        };

        let proposal = vec![
            denormalize(&self.space, &probe.plus),
            denormalize(&self.space, &probe.minus),
        ];
        self.probe = Some(probe);
        proposal
    }

    fn observe(&mut self, scored: &[ScoredGenome], _archive: &EliteArchive) {
        let (Some(probe), [plus, minus, ..]) = (self.probe.take(), scored) else {
            return;
        };

        // Relative difference keeps the step independent of the score scale.
        let scale = ((plus.score.abs() + minus.score.abs()) / 2.0).max(f64::MIN_POSITIVE);
        let difference = (plus.score - minus.score) / scale;
        let gain = self.step_gain();

        for (i, theta) in self.theta.iter_mut().enumerate() {
            // Displacement actually evaluated, after clamping into the space.
            let displacement = probe.plus[i] - probe.minus[i];
            if displacement.abs() < 1e-12 {
                continue;
            }
            let gradient = difference / displacement;
            *theta = (*theta - gain * gradient).clamp(0.0, 1.0);
        }

        self.iteration += 1;
        debug!(
            "SPSA iteration {}: y+ = {}, y- = {}, a_k = {gain:.4}",
            self.iteration, plus.score, minus.score
        );
    }
}

/// Map gene values onto `[0, 1]` per gene. Zero-width genes map to 0.
fn normalize(space: &ParameterSpace, genes: &[f64]) -> Vec<f64> {
    genes
        .iter()
        .zip(&space.genes)
        .map(|(v, b)| {
            let span = b.span();
            if span > 0.0 { ((v - b.lower) / span).clamp(0.0, 1.0) } else { 0.0 }
        })
        .collect()
}

fn denormalize(space: &ParameterSpace, unit: &[f64]) -> Genome {
    let genes = unit
        .iter()
        .zip(&space.genes)
        .map(|(u, b)| b.lower + u * b.span())
        .collect();
    Genome::clamped(genes, space)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ArchiveMode, EmulationParams, GeneBound, Parameter};

    fn scored(genomes: Vec<Genome>, f: impl Fn(&[f64]) -> f64) -> Vec<ScoredGenome> {
        genomes
            .into_iter()
            .map(|g| ScoredGenome::new(f(g.genes()), g))
            .collect()
    }

    fn delay_space() -> ParameterSpace {
        ParameterSpace::new(vec![GeneBound::new(Parameter::Delay, 0.0, 100.0)])
    }

    #[test]
    fn test_gains_decay() {
        let mut spsa = Spsa::new(SpsaConfig::default(), delay_space(), 1);
        let (a0, c0) = (spsa.step_gain(), spsa.perturbation_gain());
        spsa.iteration = 10;
        assert!(spsa.step_gain() < a0);
        assert!(spsa.perturbation_gain() < c0);
    }

    #[test]
    fn test_proposes_symmetric_pair() {
        let mut spsa = Spsa::new(SpsaConfig::default(), delay_space(), 1);
        let pair = spsa.propose();
        assert_eq!(pair.len(), 2);
        let centre = spsa.theta().genes()[0];
        let (plus, minus) = (pair[0].genes()[0], pair[1].genes()[0]);
        assert!(((plus + minus) / 2.0 - centre).abs() < 1e-9);
        assert!((plus - minus).abs() > 0.0);
    }

    #[test]
    fn test_steps_downhill() {
        // Score rises with the gene, so theta must move down.
        let mut spsa = Spsa::new(SpsaConfig::default(), delay_space(), 5);
        let archive = EliteArchive::new(1, ArchiveMode::Accumulating);
        let start = spsa.theta().genes()[0];

        let proposal = spsa.propose();
        spsa.observe(&scored(proposal, |g| 10.0 + g[0]), &archive);

        assert_eq!(spsa.iteration(), 1);
        assert!(spsa.theta().genes()[0] < start);
    }

    #[test]
    fn test_converges_toward_minimum() {
        let space = ParameterSpace::default();
        let target = vec![40.0, 8.0, 200.0, 0.02, 0.02];
        let distance = |g: &[f64]| -> f64 {
            g.iter()
                .zip(&target)
                .zip(&space.genes)
                .map(|((v, t), b)| ((v - t) / b.span()).powi(2))
                .sum::<f64>()
                + 0.01
        };

        let mut spsa = Spsa::new(SpsaConfig::default(), space.clone(), 11);
        let archive = EliteArchive::new(1, ArchiveMode::Accumulating);
        let initial = distance(spsa.theta().genes());
        for _ in 0..200 {
            let proposal = spsa.propose();
            assert!(proposal.iter().all(|g| g.is_within(&space)));
            spsa.observe(&scored(proposal, distance), &archive);
            assert!(spsa.theta().is_within(&space));
        }
        assert!(distance(spsa.theta().genes()) < initial);
    }

    #[test]
    fn test_initial_point() {
        let space = ParameterSpace::default();
        let config = SpsaConfig {
            initial: Some(EmulationParams {
                bandwidth: 9.6,
                delay: 28,
                uplink_queue: 175,
                uplink_loss: 0.004,
                downlink_loss: 0.003,
                topology: None,
            }),
            ..Default::default()
        };
        let spsa = Spsa::new(config, space.clone(), 0);
        let theta = spsa.theta();
        assert!((theta.genes()[0] - 28.0).abs() < 1e-9);
        assert!((theta.genes()[1] - 9.6).abs() < 1e-9);
    }

    #[test]
    fn test_observe_without_probe_is_noop() {
        let mut spsa = Spsa::new(SpsaConfig::default(), delay_space(), 0);
        let archive = EliteArchive::new(1, ArchiveMode::Accumulating);
        spsa.observe(&[], &archive);
        assert_eq!(spsa.iteration(), 0);
    }
}
