//! Genome representation and the genetic operators that act on it.
//!
//! Provides initialization, crossover and mutation. Every operator returns
//! freshly allocated genomes clamped into the parameter space; parents are
//! never modified.

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{FitnessScores, MutationKind, ParameterSpace};

/// A candidate parameter vector, one value per gene of the [`ParameterSpace`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    genes: Vec<f64>,
}

impl Genome {
    /// Wrap raw gene values.
    pub fn new(genes: Vec<f64>) -> Self {
        Self { genes }
    }

    /// Wrap gene values after clamping them into `space`.
    pub fn clamped(mut genes: Vec<f64>, space: &ParameterSpace) -> Self {
        clamp_into(&mut genes, space);
        Self { genes }
    }

    /// Gene values.
    pub fn genes(&self) -> &[f64] {
        &self.genes
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Whether every gene lies inside its bound.
    pub fn is_within(&self, space: &ParameterSpace) -> bool {
        self.genes.len() == space.len()
            && self
                .genes
                .iter()
                .zip(&space.genes)
                .all(|(v, b)| b.contains(*v))
    }

    pub fn into_genes(self) -> Vec<f64> {
        self.genes
    }
}

/// A genome paired with the score it earned in one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredGenome {
    /// Scalar fitness, lower is better.
    pub score: f64,
    pub genome: Genome,
    /// Raw harness scores the fitness was derived from.
    pub scores: Option<FitnessScores>,
    /// Generation the score was computed in.
    pub generation: usize,
}

impl ScoredGenome {
    pub fn new(score: f64, genome: Genome) -> Self {
        Self {
            score,
            genome,
            scores: None,
            generation: 0,
        }
    }
}

/// Sort scored genomes ascending by score (best first). Stable for ties.
pub fn sort_by_score(scored: &mut [ScoredGenome]) {
    scored.sort_by(|a, b| a.score.total_cmp(&b.score));
}

/// Normal and major mutation settings for one generation.
#[derive(Debug, Clone)]
pub struct MutationParams {
    /// Per-gene mutation probability.
    pub rate: f64,
    /// Probability that a mutating gene is resampled over its full range.
    pub major_rate: f64,
    pub kind: MutationKind,
    /// Maximum normal-mutation step per gene.
    pub steps: Vec<f64>,
}

/// Random number generator wrapper for genome operations.
pub struct GenomeRng {
    rng: StdRng,
}

impl GenomeRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw every gene independently and uniformly within its bound.
    pub fn random_genome(&mut self, space: &ParameterSpace) -> Genome {
        let genes = space
            .genes
            .iter()
            .map(|b| self.rng.gen_range(b.lower..=b.upper))
            .collect();
        Genome::clamped(genes, space)
    }

    /// `count` independent uniform random genomes.
    pub fn uniform_population(&mut self, space: &ParameterSpace, count: usize) -> Vec<Genome> {
        (0..count).map(|_| self.random_genome(space)).collect()
    }

    /// Produce two children from two parents.
    ///
    /// With probability `crossover_rate` the pair exchanges genes, each index
    /// swapped independently with probability `gene_swap_rate`; otherwise the
    /// children are clones of the parents.
    pub fn crossover(
        &mut self,
        parent1: &Genome,
        parent2: &Genome,
        crossover_rate: f64,
        gene_swap_rate: f64,
    ) -> (Genome, Genome) {
        let mut child1 = parent1.genes.clone();
        let mut child2 = parent2.genes.clone();

        if self.rng.gen_bool(crossover_rate) {
            for (a, b) in child1.iter_mut().zip(child2.iter_mut()) {
                if self.rng.gen_bool(gene_swap_rate) {
                    std::mem::swap(a, b);
                }
            }
        }

        (Genome::new(child1), Genome::new(child2))
    }

    /// Return a mutated copy of `genome`, clamped into `space`.
    ///
    /// Each gene mutates with probability `params.rate`. A mutating gene is
    /// either resampled over its whole bound (probability `params.major_rate`)
    /// or nudged by one normal-mutation draw. The result may equal the input.
    pub fn mutate(
        &mut self,
        genome: &Genome,
        space: &ParameterSpace,
        params: &MutationParams,
    ) -> Genome {
        let mut genes = genome.genes.clone();

        for (i, (value, bound)) in genes.iter_mut().zip(&space.genes).enumerate() {
            if !self.rng.gen_bool(params.rate) {
                continue;
            }

            if self.rng.gen_bool(params.major_rate) {
                *value = self.rng.gen_range(bound.lower..=bound.upper);
                continue;
            }

            let step = params.steps.get(i).copied().unwrap_or(0.0);
            *value += match params.kind {
                MutationKind::Uniform => step * self.rng.gen_range(-1.0..=1.0),
                MutationKind::HalfStep => {
                    if self.rng.gen_bool(0.5) {
                        step * 0.5
                    } else {
                        -step * 0.5
                    }
                }
            };
        }

        Genome::clamped(genes, space)
    }

    /// Pick `amount` distinct indices from `0..len` in random order.
    pub fn sample_indices(&mut self, len: usize, amount: usize) -> Vec<usize> {
        rand::seq::index::sample(&mut self.rng, len, amount).into_vec()
    }

    /// A random sign (+1.0 or -1.0) per gene.
    pub fn rademacher(&mut self, len: usize) -> Vec<f64> {
        (0..len)
            .map(|_| if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 })
            .collect()
    }
}

/// Deterministic grid seeding: individual `i` (1-indexed) gets
/// `lower + i * (upper - lower) / (count + 1)` for every gene.
pub fn evenly_spaced_population(space: &ParameterSpace, count: usize) -> Vec<Genome> {
    let divisor = (count + 1) as f64;
    (1..=count)
        .map(|i| {
            let genes = space
                .genes
                .iter()
                .map(|b| b.lower + i as f64 * b.span() / divisor)
                .collect();
            Genome::clamped(genes, space)
        })
        .collect()
}

/// Clamp gene values into their bounds in place.
pub fn clamp_into(genes: &mut [f64], space: &ParameterSpace) {
    for (value, bound) in genes.iter_mut().zip(&space.genes) {
        *value = bound.clamp(*value);
    }
}

/// Mean absolute gene difference, each gene normalised by its span.
pub fn genome_distance(g1: &Genome, g2: &Genome, space: &ParameterSpace) -> f64 {
    let mut distance = 0.0;
    let mut count = 0;

    for ((a, b), bound) in g1.genes.iter().zip(&g2.genes).zip(&space.genes) {
        let span = bound.span();
        if span > 0.0 {
            distance += (a - b).abs() / span;
            count += 1;
        }
    }

    if count > 0 {
        distance / count as f64
    } else {
        0.0
    }
}

/// Mean pairwise distance across a population.
pub fn population_diversity(genomes: &[&Genome], space: &ParameterSpace) -> f64 {
    if genomes.len() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut count = 0;
    for i in 0..genomes.len() {
        for j in (i + 1)..genomes.len() {
            total += genome_distance(genomes[i], genomes[j], space);
            count += 1;
        }
    }
    total / count as f64
}
