//! Configuration types for the emulation parameter search.
//!
//! A [`SearchConfig`] is immutable for the whole run. Anything that changes
//! while the search runs lives in the engine's run state instead.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{EmulationParams, Parameter, ParameterSpace};

/// Top-level configuration for a search run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchConfig {
    /// Gene bounds (the search space).
    #[serde(default)]
    pub space: ParameterSpace,
    /// Search strategy to use.
    #[serde(default)]
    pub strategy: SearchStrategy,
    /// Population and generation settings.
    #[serde(default)]
    pub population: PopulationConfig,
    /// Trials per evaluation, by generation.
    #[serde(default)]
    pub replication: ReplicationSchedule,
    /// Elite archive settings.
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Scoring and failure handling.
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Worker machines available to run experiments.
    #[serde(default)]
    pub workers: WorkerConfig,
    /// Experiment harness producing fitness scores.
    #[serde(default)]
    pub harness: HarnessConfig,
    /// Search log and best-results locations.
    #[serde(default)]
    pub output: OutputConfig,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

/// Search strategy selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SearchStrategy {
    /// Genetic algorithm with tournament selection and elite archive.
    GeneticAlgorithm(GeneticAlgorithmConfig),
    /// Simultaneous-perturbation stochastic approximation.
    Spsa(SpsaConfig),
}

impl Default for SearchStrategy {
    fn default() -> Self {
        Self::GeneticAlgorithm(GeneticAlgorithmConfig::default())
    }
}

/// Genetic algorithm operator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticAlgorithmConfig {
    /// How generation 0 is produced.
    #[serde(default)]
    pub initializer: Initializer,
    /// Probability that a parent pair exchanges any genes at all.
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Per-gene swap probability once crossover happens.
    #[serde(default = "default_gene_swap_rate")]
    pub gene_swap_rate: f64,
    /// Per-gene mutation probability.
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Probability that a mutating gene is resampled over its whole range.
    #[serde(default = "default_major_mutation_rate")]
    pub major_mutation_rate: f64,
    /// How a normal mutation perturbs a gene.
    #[serde(default)]
    pub mutation_kind: MutationKind,
    /// Default normal-mutation step as a multiple of `span / (N + 1)`.
    #[serde(default = "default_mutation_step_scale")]
    pub mutation_step_scale: f64,
}

impl Default for GeneticAlgorithmConfig {
    fn default() -> Self {
        Self {
            initializer: Initializer::default(),
            crossover_rate: default_crossover_rate(),
            gene_swap_rate: default_gene_swap_rate(),
            mutation_rate: default_mutation_rate(),
            major_mutation_rate: default_major_mutation_rate(),
            mutation_kind: MutationKind::default(),
            mutation_step_scale: default_mutation_step_scale(),
        }
    }
}

fn default_crossover_rate() -> f64 {
    0.3
}
fn default_gene_swap_rate() -> f64 {
    0.4
}
fn default_mutation_rate() -> f64 {
    0.2
}
fn default_major_mutation_rate() -> f64 {
    0.1
}
fn default_mutation_step_scale() -> f64 {
    1.5
}

/// Generation-0 population policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    /// Independent uniform draw per gene.
    #[default]
    UniformRandom,
    /// Individual `i` (1-indexed) gets `lower + i * span / (N + 1)` for every gene.
    EvenlySpaced,
}

/// Normal mutation policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// `value += max_step * uniform(-1, 1)`.
    #[default]
    Uniform,
    /// `value += ±max_step / 2`, each direction with equal probability.
    HalfStep,
}

/// SPSA settings.
///
/// The iterate lives in normalised coordinates (each gene mapped onto
/// `[0, 1]`) and the gradient is estimated from the relative score difference,
/// so the gains do not depend on gene units or score magnitude.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpsaConfig {
    /// Starting point; the centre of the space when unset.
    #[serde(default)]
    pub initial: Option<EmulationParams>,
    /// Step gain numerator `a`, in normalised units.
    #[serde(default = "default_spsa_a")]
    pub a: f64,
    /// Step gain stability constant `A`.
    #[serde(default = "default_spsa_big_a")]
    pub big_a: f64,
    /// Step gain decay exponent.
    #[serde(default = "default_spsa_alpha")]
    pub alpha: f64,
    /// Perturbation gain numerator `c`.
    #[serde(default = "default_spsa_c")]
    pub c: f64,
    /// Perturbation gain decay exponent.
    #[serde(default = "default_spsa_gamma")]
    pub gamma: f64,
    /// Per-gene perturbation size as a fraction of the gene span.
    #[serde(default = "default_spsa_perturbation")]
    pub perturbation: f64,
}

impl Default for SpsaConfig {
    fn default() -> Self {
        Self {
            initial: None,
            a: default_spsa_a(),
            big_a: default_spsa_big_a(),
            alpha: default_spsa_alpha(),
            c: default_spsa_c(),
            gamma: default_spsa_gamma(),
            perturbation: default_spsa_perturbation(),
        }
    }
}

fn default_spsa_a() -> f64 {
    0.05
}
fn default_spsa_big_a() -> f64 {
    0.404
}
fn default_spsa_alpha() -> f64 {
    0.602
}
fn default_spsa_c() -> f64 {
    2.0
}
fn default_spsa_gamma() -> f64 {
    0.101
}
fn default_spsa_perturbation() -> f64 {
    0.05
}

/// How many genomes make up a generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PopulationSize {
    /// Constant size; must be even and at least 4.
    Fixed { size: usize },
    /// One genome per worker, at least 4, rounded up to even.
    PerWorker,
}

impl Default for PopulationSize {
    fn default() -> Self {
        Self::Fixed {
            size: default_population_size(),
        }
    }
}

impl PopulationSize {
    /// Smallest population tournament selection can work with.
    pub const MIN: usize = 4;

    /// Resolve to a concrete population size for `worker_count` workers.
    pub fn resolve(self, worker_count: usize) -> usize {
        match self {
            PopulationSize::Fixed { size } => size,
            PopulationSize::PerWorker => {
                let n = worker_count.max(Self::MIN);
                n + n % 2
            }
        }
    }
}

fn default_population_size() -> usize {
    18
}

/// Population and generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Population size policy.
    #[serde(default)]
    pub size: PopulationSize,
    /// Generation budget; run until stopped when unset.
    #[serde(default = "default_max_generations")]
    pub max_generations: Option<usize>,
    /// Stop once the best score is at or below this value.
    #[serde(default)]
    pub target_score: Option<f64>,
    /// Stop after this many generations without improvement.
    #[serde(default)]
    pub stagnation_limit: Option<usize>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: PopulationSize::default(),
            max_generations: default_max_generations(),
            target_score: None,
            stagnation_limit: None,
        }
    }
}

fn default_max_generations() -> Option<usize> {
    Some(26)
}

/// One step of the replication schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicationStage {
    /// First generation this stage applies to.
    pub from_generation: usize,
    /// Trials per evaluation.
    pub replications: usize,
}

/// Trials per evaluation as a step function of the generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicationSchedule {
    pub stages: Vec<ReplicationStage>,
}

impl Default for ReplicationSchedule {
    fn default() -> Self {
        Self::constant(1)
    }
}

impl ReplicationSchedule {
    /// Same replication count for every generation.
    pub fn constant(replications: usize) -> Self {
        Self {
            stages: vec![ReplicationStage {
                from_generation: 0,
                replications,
            }],
        }
    }

    /// Replication count in effect at `generation`.
    pub fn replications_at(&self, generation: usize) -> usize {
        self.stages
            .iter()
            .take_while(|s| s.from_generation <= generation)
            .last()
            .map_or(1, |s| s.replications)
    }

    /// Whether the replication count changes when entering `generation`.
    pub fn is_boundary(&self, generation: usize) -> bool {
        generation > 0 && self.replications_at(generation) != self.replications_at(generation - 1)
    }
}

/// Elite archive behaviour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveMode {
    /// Archive persists across all generations.
    #[default]
    Accumulating,
    /// Archive is rebuilt from scratch when the replication count changes.
    StagedReset,
}

/// Elite archive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Number of best genomes kept.
    #[serde(default = "default_elite_count")]
    pub elite_count: usize,
    #[serde(default)]
    pub mode: ArchiveMode,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            elite_count: default_elite_count(),
            mode: ArchiveMode::default(),
        }
    }
}

fn default_elite_count() -> usize {
    5
}

/// Which score component the engine minimizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Combined throughput and delay difference.
    #[default]
    Overall,
    /// Throughput difference plus delay difference.
    Sum,
    Throughput,
    Delay,
}

/// Whether the objective is naturally minimized or maximized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveSense {
    #[default]
    Minimize,
    /// Negated before it reaches the engine.
    Maximize,
}

impl ObjectiveSense {
    /// Map a raw value onto the engine's lower-is-better scale.
    pub fn orient(self, value: f64) -> f64 {
        match self {
            ObjectiveSense::Minimize => value,
            ObjectiveSense::Maximize => -value,
        }
    }
}

/// Scoring and failure handling for evaluations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub objective: Objective,
    #[serde(default)]
    pub sense: ObjectiveSense,
    /// Score substituted for failed evaluations and NaN components.
    #[serde(default = "default_penalty")]
    pub penalty: f64,
    /// Extra attempts after a failed evaluation.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Per-attempt time limit in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            objective: Objective::default(),
            sense: ObjectiveSense::default(),
            penalty: default_penalty(),
            max_retries: default_max_retries(),
            timeout_secs: None,
        }
    }
}

fn default_penalty() -> f64 {
    10_000.0
}
fn default_max_retries() -> usize {
    1
}

/// Worker machines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker endpoints (host names or addresses).
    pub endpoints: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["localhost".to_string()],
        }
    }
}

/// Experiment harness selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HarnessConfig {
    /// Run a local program that drives the remote experiment and prints scores.
    Command {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Analytic stand-in: distance to a target configuration plus noise.
    Synthetic {
        target: EmulationParams,
        #[serde(default)]
        noise: f64,
    },
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::Synthetic {
            target: EmulationParams {
                bandwidth: 9.6,
                delay: 28,
                uplink_queue: 175,
                uplink_loss: 0.004,
                downlink_loss: 0.003,
                topology: None,
            },
            noise: 0.05,
        }
    }
}

/// Where run artifacts are written.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// Append-only search log, one record per evaluation.
    #[serde(default)]
    pub search_log: Option<PathBuf>,
    /// Directory holding one best-results subdirectory per score category.
    #[serde(default)]
    pub best_results_dir: Option<PathBuf>,
}

// ============================================================================
// Validation
// ============================================================================

/// Search configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Search space has no genes")]
    EmptySpace,
    #[error("Invalid bounds for {parameter}: lower ({lower}) > upper ({upper})")]
    InvalidBounds {
        parameter: Parameter,
        lower: f64,
        upper: f64,
    },
    #[error("Bounds for {0} must be finite")]
    NonFiniteBounds(Parameter),
    #[error("Gene {0} appears more than once")]
    DuplicateGene(Parameter),
    #[error("Required gene {0} is missing")]
    MissingGene(Parameter),
    #[error("Population size {0} must be even and at least 4")]
    InvalidPopulationSize(usize),
    #[error("Probability {name} = {value} is outside [0, 1]")]
    InvalidProbability { name: &'static str, value: f64 },
    #[error("Invalid mutation step: {0}")]
    InvalidStep(String),
    #[error("Elite count must be at least 1")]
    NoElites,
    #[error("At least one worker endpoint is required")]
    NoWorkers,
    #[error("Invalid replication schedule: {0}")]
    InvalidSchedule(String),
    #[error("Invalid SPSA gains: {0}")]
    InvalidGains(String),
    #[error("Penalty score must be finite")]
    InvalidPenalty,
}

impl SearchConfig {
    /// Validate every startup precondition. Nothing is evaluated before this passes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_space()?;

        let size = self.population.size.resolve(self.workers.endpoints.len());
        if size % 2 != 0 || size < PopulationSize::MIN {
            return Err(ConfigError::InvalidPopulationSize(size));
        }

        match &self.strategy {
            SearchStrategy::GeneticAlgorithm(ga) => {
                check_probability("crossover_rate", ga.crossover_rate)?;
                check_probability("gene_swap_rate", ga.gene_swap_rate)?;
                check_probability("mutation_rate", ga.mutation_rate)?;
                check_probability("major_mutation_rate", ga.major_mutation_rate)?;
                if !(ga.mutation_step_scale.is_finite() && ga.mutation_step_scale >= 0.0) {
                    return Err(ConfigError::InvalidStep(format!(
                        "mutation_step_scale {} must be finite and non-negative",
                        ga.mutation_step_scale
                    )));
                }
            }
            SearchStrategy::Spsa(spsa) => {
                let gains = [spsa.a, spsa.big_a, spsa.alpha, spsa.c, spsa.gamma];
                if gains.iter().any(|g| !g.is_finite()) || spsa.c <= 0.0 {
                    return Err(ConfigError::InvalidGains(
                        "gains must be finite and c positive".to_string(),
                    ));
                }
                if !(spsa.perturbation.is_finite() && spsa.perturbation > 0.0) {
                    return Err(ConfigError::InvalidGains(format!(
                        "perturbation {} must be positive",
                        spsa.perturbation
                    )));
                }
            }
        }

        if self.archive.elite_count == 0 {
            return Err(ConfigError::NoElites);
        }
        if self.workers.endpoints.is_empty() {
            return Err(ConfigError::NoWorkers);
        }
        if !self.evaluation.penalty.is_finite() {
            return Err(ConfigError::InvalidPenalty);
        }

        self.validate_schedule()
    }

    fn validate_space(&self) -> Result<(), ConfigError> {
        if self.space.is_empty() {
            return Err(ConfigError::EmptySpace);
        }

        let mut seen = HashSet::new();
        for gene in &self.space.genes {
            if !(gene.lower.is_finite() && gene.upper.is_finite()) {
                return Err(ConfigError::NonFiniteBounds(gene.parameter));
            }
            if gene.lower > gene.upper {
                return Err(ConfigError::InvalidBounds {
                    parameter: gene.parameter,
                    lower: gene.lower,
                    upper: gene.upper,
                });
            }
            if let Some(step) = gene.max_step
                && !(step.is_finite() && step >= 0.0)
            {
                return Err(ConfigError::InvalidStep(format!(
                    "{} max_step {step} must be finite and non-negative",
                    gene.parameter
                )));
            }
            if !seen.insert(gene.parameter) {
                return Err(ConfigError::DuplicateGene(gene.parameter));
            }
        }

        for required in Parameter::REQUIRED {
            if !seen.contains(&required) {
                return Err(ConfigError::MissingGene(required));
            }
        }
        Ok(())
    }

    fn validate_schedule(&self) -> Result<(), ConfigError> {
        let stages = &self.replication.stages;
        let Some(first) = stages.first() else {
            return Err(ConfigError::InvalidSchedule("no stages".to_string()));
        };
        if first.from_generation != 0 {
            return Err(ConfigError::InvalidSchedule(
                "first stage must start at generation 0".to_string(),
            ));
        }
        if stages.iter().any(|s| s.replications == 0) {
            return Err(ConfigError::InvalidSchedule(
                "replication counts must be at least 1".to_string(),
            ));
        }
        if stages
            .windows(2)
            .any(|w| w[0].from_generation >= w[1].from_generation)
        {
            return Err(ConfigError::InvalidSchedule(
                "stages must start at strictly increasing generations".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_probability(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidProbability { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::GeneBound;

    #[test]
    fn test_default_config_valid() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_odd_population_rejected() {
        let config = SearchConfig {
            population: PopulationConfig {
                size: PopulationSize::Fixed { size: 7 },
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPopulationSize(7))
        ));
    }

    #[test]
    fn test_small_population_rejected() {
        let config = SearchConfig {
            population: PopulationConfig {
                size: PopulationSize::Fixed { size: 2 },
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut config = SearchConfig::default();
        config.space.genes[0] = GeneBound::new(Parameter::Delay, 35.0, 25.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn test_missing_gene_rejected() {
        let mut config = SearchConfig::default();
        config.space.genes.retain(|g| g.parameter != Parameter::Bandwidth);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingGene(Parameter::Bandwidth))
        ));
    }

    #[test]
    fn test_bad_schedule_rejected() {
        let mut config = SearchConfig::default();
        config.replication = ReplicationSchedule {
            stages: vec![
                ReplicationStage {
                    from_generation: 0,
                    replications: 1,
                },
                ReplicationStage {
                    from_generation: 0,
                    replications: 2,
                },
            ],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_population_per_worker() {
        assert_eq!(PopulationSize::PerWorker.resolve(1), 4);
        assert_eq!(PopulationSize::PerWorker.resolve(18), 18);
        assert_eq!(PopulationSize::PerWorker.resolve(45), 46);
        assert_eq!(PopulationSize::Fixed { size: 10 }.resolve(45), 10);
    }

    #[test]
    fn test_replication_schedule() {
        let schedule = ReplicationSchedule {
            stages: vec![
                ReplicationStage {
                    from_generation: 0,
                    replications: 1,
                },
                ReplicationStage {
                    from_generation: 5,
                    replications: 2,
                },
                ReplicationStage {
                    from_generation: 10,
                    replications: 10,
                },
            ],
        };
        assert_eq!(schedule.replications_at(0), 1);
        assert_eq!(schedule.replications_at(4), 1);
        assert_eq!(schedule.replications_at(5), 2);
        assert_eq!(schedule.replications_at(42), 10);
        assert!(!schedule.is_boundary(0));
        assert!(!schedule.is_boundary(4));
        assert!(schedule.is_boundary(5));
        assert!(schedule.is_boundary(10));
    }

    #[test]
    fn test_serialization() {
        let config = SearchConfig {
            strategy: SearchStrategy::Spsa(SpsaConfig::default()),
            population: PopulationConfig {
                size: PopulationSize::PerWorker,
                max_generations: None,
                ..Default::default()
            },
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SearchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.population.size, PopulationSize::PerWorker);
        assert_eq!(parsed.population.max_generations, None);
        assert!(matches!(parsed.strategy, SearchStrategy::Spsa(_)));
    }

    #[test]
    fn test_minimal_json() {
        let parsed: SearchConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.space.len(), 5);
        assert_eq!(parsed.population.size, PopulationSize::Fixed { size: 18 });
    }
}
