//! Genetic algorithm: tournament selection over population and archive,
//! per-gene crossover and mutation with a major-mutation escape.

use log::debug;

use crate::schema::{GeneticAlgorithmConfig, Initializer, ParameterSpace};

use super::archive::EliteArchive;
use super::genome::{Genome, GenomeRng, MutationParams, ScoredGenome, evenly_spaced_population};
use super::search::Optimizer;
use super::selection::select_parent_pair;

/// Generational genetic search with a fixed, even population size.
pub struct GeneticSearch {
    config: GeneticAlgorithmConfig,
    space: ParameterSpace,
    rng: GenomeRng,
    mutation: MutationParams,
    population: Vec<Genome>,
}

impl GeneticSearch {
    /// Create the search and its generation-0 population.
    ///
    /// `size` must be even and at least 4; the engine validates this at startup.
    pub fn new(
        config: GeneticAlgorithmConfig,
        space: ParameterSpace,
        size: usize,
        seed: u64,
    ) -> Self {
        let mut rng = GenomeRng::new(seed);
        let population = match config.initializer {
            Initializer::UniformRandom => rng.uniform_population(&space, size),
            Initializer::EvenlySpaced => evenly_spaced_population(&space, size),
        };
        let mutation = MutationParams {
            rate: config.mutation_rate,
            major_rate: config.major_mutation_rate,
            kind: config.mutation_kind,
            steps: space.mutation_steps(size, config.mutation_step_scale),
        };

        Self {
            config,
            space,
            rng,
            mutation,
            population,
        }
    }

    /// Current population.
    pub fn population(&self) -> &[Genome] {
        &self.population
    }

    /// Breed the next generation from a scored population and the archive.
    ///
    /// Draws `N / 2` parent pairs from population ∪ archive and turns each pair
    /// into two children. The result is a fresh list of `N` genomes.
    pub fn reproduce(&mut self, scored: &[ScoredGenome], archive: &EliteArchive) -> Vec<Genome> {
        // Archive entries copied from this very population would otherwise count twice.
        let pool: Vec<&ScoredGenome> = scored
            .iter()
            .chain(archive.entries().iter().filter(|e| !scored.contains(*e)))
            .collect();
        debug!(
            "Selection pool: {} population + {} archive",
            scored.len(),
            pool.len() - scored.len()
        );

        let size = scored.len();
        let mut next = Vec::with_capacity(size);
        while next.len() < size {
            let (p1, p2) = select_parent_pair(&pool, &mut self.rng);
            let (c1, c2) = self.rng.crossover(
                &p1.genome,
                &p2.genome,
                self.config.crossover_rate,
                self.config.gene_swap_rate,
            );
            next.push(self.rng.mutate(&c1, &self.space, &self.mutation));
            next.push(self.rng.mutate(&c2, &self.space, &self.mutation));
        }
        next.truncate(size);
        next
    }
}

impl Optimizer for GeneticSearch {
    fn name(&self) -> &'static str {
        "genetic_algorithm"
    }

    fn propose(&mut self) -> Vec<Genome> {
        self.population.clone()
    }

    fn observe(&mut self, scored: &[ScoredGenome], archive: &EliteArchive) {
        self.population = self.reproduce(scored, archive);
    }
}
