//! Fitness evaluation: harnesses, the worker pool and the search log.
//!
//! [`FitnessEvaluator`] turns genomes into scalar fitness. It decodes genes
//! into emulation parameters, dispatches one harness run per genome across the
//! worker pool, retries failures and substitutes the penalty score for anything
//! that still fails or comes back NaN.

mod harness;
mod pool;
mod search_log;

pub use harness::*;
pub use pool::*;
pub use search_log::*;

use log::{debug, warn};

use crate::compute::evolution::Genome;
use crate::schema::{EmulationParams, EvaluationConfig, FitnessScores, Objective, ParameterSpace};

/// Outcome of evaluating one genome.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub params: EmulationParams,
    /// Harness scores with non-finite components replaced by the penalty.
    pub scores: FitnessScores,
    /// Scalar fitness, lower is better.
    pub fitness: f64,
    /// Harness calls made, including retries.
    pub attempts: usize,
    /// Whether `fitness` is the penalty rather than a measurement.
    pub failed: bool,
    pub worker: String,
}

/// Scores genomes through a [`Harness`] on a [`WorkerPool`].
pub struct FitnessEvaluator {
    harness: Box<dyn Harness>,
    space: ParameterSpace,
    config: EvaluationConfig,
    pool: WorkerPool,
}

impl FitnessEvaluator {
    pub fn new(
        harness: Box<dyn Harness>,
        space: ParameterSpace,
        config: EvaluationConfig,
        pool: WorkerPool,
    ) -> Self {
        Self {
            harness,
            space,
            config,
            pool,
        }
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn worker_count(&self) -> usize {
        self.pool.len()
    }

    /// Scalar fitness for a set of scores under the configured objective.
    /// Non-finite results become the penalty.
    pub fn fitness(&self, scores: &FitnessScores) -> f64 {
        let raw = self.objective_value(scores);
        if !raw.is_finite() {
            return self.config.penalty;
        }
        self.config.sense.orient(raw)
    }

    /// Evaluate one genome on the first worker.
    pub fn evaluate(&self, genome: &Genome, replications: usize) -> Evaluation {
        let worker = self.pool.endpoints().first().map(String::as_str).unwrap_or("localhost");
        self.evaluate_on(worker, genome, replications)
    }

    /// Evaluate a batch across the pool. Output order matches `genomes`.
    /// Returns once every evaluation has finished.
    pub fn evaluate_batch(&self, genomes: &[Genome], replications: usize) -> Vec<Evaluation> {
        self.pool.run(genomes.iter().collect(), |worker, genome| {
            self.evaluate_on(worker, genome, replications)
        })
    }

    fn evaluate_on(&self, worker: &str, genome: &Genome, replications: usize) -> Evaluation {
        let params = self.space.decode(genome.genes());
        let max_attempts = self.config.max_retries + 1;

        for attempt in 1..=max_attempts {
            match self.harness.run(&params, replications, worker) {
                Ok(scores) => {
                    if !scores.is_finite() {
                        warn!("Malformed scores from {worker} for {params:?}: {scores:?}");
                    }
                    let fitness = self.fitness(&scores);
                    let failed = !self.objective_value(&scores).is_finite();
                    debug!("{worker}: {params:?} -> {fitness}");
                    return Evaluation {
                        params,
                        scores: scores.sanitized(self.config.penalty),
                        fitness,
                        attempts: attempt,
                        failed,
                        worker: worker.to_string(),
                    };
                }
                Err(e) => {
                    warn!("Evaluation attempt {attempt}/{max_attempts} on {worker} failed: {e}");
                }
            }
        }

        Evaluation {
            params,
            scores: FitnessScores::uniform(self.config.penalty),
            fitness: self.config.penalty,
            attempts: max_attempts,
            failed: true,
            worker: worker.to_string(),
        }
    }

    fn objective_value(&self, scores: &FitnessScores) -> f64 {
        match self.config.objective {
            Objective::Overall => scores.overall,
            Objective::Sum => scores.throughput + scores.delay,
            Objective::Throughput => scores.throughput,
            Objective::Delay => scores.delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ObjectiveSense;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then returns fixed scores.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
        scores: FitnessScores,
    }

    impl Harness for Flaky {
        fn run(
            &self,
            _params: &EmulationParams,
            _replications: usize,
            worker: &str,
        ) -> Result<FitnessScores, HarnessError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(HarnessError::Unavailable(worker.to_string()))
            } else {
                Ok(self.scores)
            }
        }
    }

    fn evaluator(harness: impl Harness + 'static, config: EvaluationConfig) -> FitnessEvaluator {
        FitnessEvaluator::new(
            Box::new(harness),
            ParameterSpace::default(),
            config,
            WorkerPool::new(vec!["localhost".to_string()]).unwrap(),
        )
    }

    fn flaky(failures: usize, scores: FitnessScores) -> Flaky {
        Flaky {
            failures,
            calls: AtomicUsize::new(0),
            scores,
        }
    }

    fn genome() -> Genome {
        Genome::new(vec![30.0, 10.0, 100.0, 0.01, 0.01])
    }

    fn scores(throughput: f64, delay: f64, overall: f64) -> FitnessScores {
        FitnessScores {
            throughput,
            delay,
            overall,
        }
    }

    #[test]
    fn test_retry_then_success() {
        let eval = evaluator(flaky(1, scores(1.0, 2.0, 1.5)), EvaluationConfig::default());
        let result = eval.evaluate(&genome(), 1);
        assert_eq!(result.attempts, 2);
        assert!(!result.failed);
        assert_eq!(result.fitness, 1.5);
    }

    #[test]
    fn test_penalty_after_retries_exhausted() {
        let config = EvaluationConfig {
            max_retries: 2,
            ..Default::default()
        };
        let eval = evaluator(flaky(10, scores(1.0, 1.0, 1.0)), config);
        let result = eval.evaluate(&genome(), 1);
        assert_eq!(result.attempts, 3);
        assert!(result.failed);
        assert_eq!(result.fitness, 10_000.0);
    }

    #[test]
    fn test_nan_becomes_penalty() {
        let eval = evaluator(flaky(0, scores(1.0, 1.0, f64::NAN)), EvaluationConfig::default());
        let result = eval.evaluate(&genome(), 1);
        assert_eq!(result.attempts, 1);
        assert!(result.failed);
        assert_eq!(result.fitness, 10_000.0);
        assert_eq!(result.scores.overall, 10_000.0);
    }

    #[test]
    fn test_objectives() {
        let s = scores(2.0, 3.0, 4.0);
        let with = |objective, sense| {
            let config = EvaluationConfig {
                objective,
                sense,
                ..Default::default()
            };
            evaluator(flaky(0, s), config).fitness(&s)
        };
        assert_eq!(with(Objective::Overall, ObjectiveSense::Minimize), 4.0);
        assert_eq!(with(Objective::Sum, ObjectiveSense::Minimize), 5.0);
        assert_eq!(with(Objective::Throughput, ObjectiveSense::Minimize), 2.0);
        assert_eq!(with(Objective::Delay, ObjectiveSense::Maximize), -3.0);
    }

    #[test]
    fn test_batch_order_across_workers() {
        let space = ParameterSpace::default();
        let harness = SyntheticHarness::new(
            EmulationParams {
                bandwidth: 10.0,
                delay: 50,
                uplink_queue: 100,
                uplink_loss: 0.01,
                downlink_loss: 0.01,
                topology: None,
            },
            0.0,
            0,
        );
        let pool = WorkerPool::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        let eval = FitnessEvaluator::new(
            Box::new(harness),
            space.clone(),
            EvaluationConfig::default(),
            pool,
        );

        let genomes: Vec<Genome> = (1..=9)
            .map(|i| Genome::new(vec![10.0 * i as f64, 10.0, 100.0, 0.01, 0.01]))
            .collect();
        let batch = eval.evaluate_batch(&genomes, 1);
        assert_eq!(batch.len(), genomes.len());
        for (genome, result) in genomes.iter().zip(&batch) {
            assert_eq!(result.params, space.decode(genome.genes()));
            assert_eq!(result.fitness, eval.evaluate(genome, 1).fitness);
        }
    }
}
