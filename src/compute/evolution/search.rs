//! Search driver: runs any [`Optimizer`] against the fitness evaluator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, info, warn};

use crate::compute::evaluation::{
    Evaluation, FitnessEvaluator, Harness, SearchLog, SearchRecord, WorkerPool, build_harness,
};
use crate::schema::{
    CandidateSnapshot, ConfigError, SearchConfig, SearchHistory, SearchProgress, SearchResult,
    SearchStats, SearchStrategy, StopReason,
};

use super::archive::{BestResults, EliteArchive};
use super::genetic::GeneticSearch;
use super::genome::{Genome, ScoredGenome, population_diversity};
use super::spsa::Spsa;

/// A search strategy driven by [`SearchEngine`].
///
/// Each generation the engine asks for genomes, evaluates them as one batch,
/// folds the results into the archive and hands them back.
pub trait Optimizer: Send {
    /// Short strategy name for logs and stats.
    fn name(&self) -> &'static str;

    /// Genomes to evaluate this generation.
    fn propose(&mut self) -> Vec<Genome>;

    /// Scores for the last proposal, in proposal order, and the archive after
    /// it absorbed them.
    fn observe(&mut self, scored: &[ScoredGenome], archive: &EliteArchive);
}

/// Errors raised while constructing a search.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Mutable state of one run, kept apart from the immutable configuration.
pub struct RunState {
    pub archive: EliteArchive,
    pub history: SearchHistory,
    pub search_log: Option<SearchLog>,
    pub best_results: Option<BestResults>,
    /// Next generation to evaluate.
    pub generation: usize,
    /// Best archive score under the current replication stage.
    pub best_score: f64,
    pub stagnation_count: usize,
    pub total_evaluations: u64,
    pub failed_evaluations: u64,
}

impl RunState {
    fn new(config: &SearchConfig) -> Self {
        let search_log = config.output.search_log.as_ref().and_then(|path| {
            SearchLog::open(path)
                .map_err(|e| warn!("Search log {} unavailable: {e}", path.display()))
                .ok()
        });
        let best_results = config.output.best_results_dir.as_ref().and_then(|dir| {
            BestResults::open(dir, config.evaluation.sense)
                .map_err(|e| warn!("Best results directory {} unavailable: {e}", dir.display()))
                .ok()
        });

        Self {
            archive: EliteArchive::new(config.archive.elite_count, config.archive.mode),
            history: SearchHistory::default(),
            search_log,
            best_results,
            generation: 0,
            best_score: f64::INFINITY,
            stagnation_count: 0,
            total_evaluations: 0,
            failed_evaluations: 0,
        }
    }
}

/// Runs a configured search to completion.
pub struct SearchEngine {
    config: SearchConfig,
    evaluator: FitnessEvaluator,
    optimizer: Box<dyn Optimizer>,
    state: RunState,
    cancelled: Arc<AtomicBool>,
}

impl SearchEngine {
    /// Validate `config` and build the engine with the harness it describes.
    pub fn new(config: SearchConfig) -> Result<Self, SearchError> {
        let seed = config.random_seed.unwrap_or_else(rand::random);
        let harness = build_harness(&config.harness, &config.evaluation, seed);
        Self::build(config, harness, seed)
    }

    /// Validate `config` and build the engine around a caller-supplied harness.
    pub fn with_harness(
        config: SearchConfig,
        harness: Box<dyn Harness>,
    ) -> Result<Self, SearchError> {
        let seed = config.random_seed.unwrap_or_else(rand::random);
        Self::build(config, harness, seed)
    }

    fn build(
        config: SearchConfig,
        harness: Box<dyn Harness>,
        seed: u64,
    ) -> Result<Self, SearchError> {
        config.validate()?;

        let pool = WorkerPool::new(config.workers.endpoints.clone())?;
        let size = config.population.size.resolve(pool.len());
        let evaluator =
            FitnessEvaluator::new(harness, config.space.clone(), config.evaluation.clone(), pool);

        let optimizer: Box<dyn Optimizer> = match &config.strategy {
            SearchStrategy::GeneticAlgorithm(ga) => {
                Box::new(GeneticSearch::new(ga.clone(), config.space.clone(), size, seed))
            }
            SearchStrategy::Spsa(spsa) => {
                Box::new(Spsa::new(spsa.clone(), config.space.clone(), seed))
            }
        };

        info!(
            "Search: {} over {} genes, {} workers, population {size}, seed {seed}",
            optimizer.name(),
            config.space.len(),
            evaluator.worker_count()
        );

        let state = RunState::new(&config);
        Ok(Self {
            config,
            evaluator,
            optimizer,
            state,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get cancellation handle. Setting it stops the run between generations.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Seed the archive, e.g. with the best records of an earlier search log.
    pub fn with_archive(mut self, archive: EliteArchive) -> Self {
        self.state.best_score = archive.best().map_or(f64::INFINITY, |b| b.score);
        self.state.archive = archive;
        self
    }

    /// Check if the search should stop.
    fn should_stop(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }

        if let Some(max) = self.config.population.max_generations
            && self.state.generation >= max
        {
            return Some(StopReason::MaxGenerations);
        }

        if let Some(target) = self.config.population.target_score
            && self.state.best_score <= target
        {
            return Some(StopReason::TargetReached);
        }

        if let Some(limit) = self.config.population.stagnation_limit
            && self.state.stagnation_count >= limit
        {
            return Some(StopReason::Stagnation);
        }

        None
    }

    /// Evaluate, archive and reproduce one generation.
    fn step_generation(&mut self) -> SearchProgress {
        let generation = self.state.generation;
        let schedule = &self.config.replication;
        let replications = schedule.replications_at(generation);
        let boundary = schedule.is_boundary(generation);

        let genomes = self.optimizer.propose();
        let evaluations = self.evaluator.evaluate_batch(&genomes, replications);

        let scored: Vec<ScoredGenome> = genomes
            .into_iter()
            .zip(&evaluations)
            .map(|(genome, eval)| ScoredGenome {
                score: eval.fitness,
                genome,
                scores: Some(eval.scores),
                generation,
            })
            .collect();

        let failed = self.record_evaluations(&scored, &evaluations, replications);

        let archive_reset = self.state.archive.update(&scored, boundary);
        let archive_best = self.state.archive.best().map_or(f64::INFINITY, |b| b.score);
        // Scores from a new replication stage are not comparable with the old best.
        if archive_reset || archive_best < self.state.best_score {
            self.state.best_score = archive_best;
            self.state.stagnation_count = 0;
        } else {
            self.state.stagnation_count += 1;
        }

        let population_scores: Vec<f64> = scored.iter().map(|s| s.score).collect();
        let genomes: Vec<_> = scored.iter().map(|s| &s.genome).collect();
        let diversity = population_diversity(&genomes, self.evaluator.space());
        self.state
            .history
            .record(&population_scores, diversity, replications);

        let archive_scores = self.state.archive.scores();
        info!(
            "Gen {generation}: {replications} trials, best {:.4}, mean {:.4}, archive {:.4}{}{}",
            self.state.history.best_score.last().copied().unwrap_or(f64::NAN),
            self.state.history.mean_score.last().copied().unwrap_or(f64::NAN),
            archive_best,
            if archive_reset { ", archive reset" } else { "" },
            if failed > 0 {
                format!(", {failed} failed")
            } else {
                String::new()
            }
        );
        debug!("Population scores: {population_scores:?}");
        debug!("Archive scores: {archive_scores:?}");

        self.optimizer.observe(&scored, &self.state.archive);
        self.state.generation += 1;

        SearchProgress {
            generation,
            total_generations: self.config.population.max_generations,
            replications,
            population_scores,
            archive_scores,
            best_score: self.state.best_score,
            best_candidate: self.state.archive.best().map(|b| self.snapshot(b)),
            stagnation_count: self.state.stagnation_count,
            archive_reset,
            failed_evaluations: failed,
        }
    }

    /// Write evaluations to the search log and best-results store.
    /// Returns how many ended with the penalty.
    fn record_evaluations(
        &mut self,
        scored: &[ScoredGenome],
        evaluations: &[Evaluation],
        replications: usize,
    ) -> usize {
        let mut failed = 0;
        for (entry, eval) in scored.iter().zip(evaluations) {
            self.state.total_evaluations += 1;
            if eval.failed {
                failed += 1;
                self.state.failed_evaluations += 1;
            }

            if let Some(log) = self.state.search_log.as_mut() {
                log.append(&SearchRecord {
                    params: eval.params.clone(),
                    replications,
                    scores: eval.scores,
                    score: eval.fitness,
                });
            }

            if !eval.failed && self.state.best_results.is_some() {
                let snapshot = self.snapshot(entry);
                if let Some(store) = self.state.best_results.as_mut() {
                    for category in store.record(&snapshot) {
                        info!("New best {category:?} score from {}", eval.worker);
                    }
                }
            }
        }
        failed
    }

    fn snapshot(&self, entry: &ScoredGenome) -> CandidateSnapshot {
        CandidateSnapshot {
            score: entry.score,
            genes: entry.genome.genes().to_vec(),
            params: self.evaluator.space().decode(entry.genome.genes()),
            scores: entry.scores,
            replications: self.config.replication.replications_at(entry.generation),
            generation: entry.generation,
        }
    }

    /// Run the search, reporting progress after every generation.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> SearchResult
    where
        F: FnMut(&SearchProgress),
    {
        let start_time = Instant::now();

        let stop_reason = loop {
            if let Some(reason) = self.should_stop() {
                break reason;
            }
            let progress = self.step_generation();
            callback(&progress);
        };

        let elapsed = start_time.elapsed().as_secs_f64();
        info!(
            "Search stopped after {} generations ({stop_reason:?}), best {:.4}",
            self.state.generation, self.state.best_score
        );

        SearchResult {
            best: self.state.archive.best().map(|b| self.snapshot(b)),
            archive: self
                .state
                .archive
                .entries()
                .iter()
                .map(|e| self.snapshot(e))
                .collect(),
            stats: SearchStats {
                strategy: self.optimizer.name().to_string(),
                generations: self.state.generation,
                total_evaluations: self.state.total_evaluations,
                failed_evaluations: self.state.failed_evaluations,
                best_score: self.state.best_score,
                elapsed_seconds: elapsed,
                stop_reason,
            },
            history: self.state.history.clone(),
        }
    }

    /// Run the search (blocking).
    pub fn run(&mut self) -> SearchResult {
        self.run_with_callback(|_| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evaluation::{HarnessError, read_search_log};
    use crate::schema::{
        ArchiveConfig, ArchiveMode, EmulationParams, FitnessScores, GeneticAlgorithmConfig,
        HarnessConfig, Initializer, PopulationConfig, PopulationSize, ReplicationSchedule,
        ReplicationStage, SpsaConfig, WorkerConfig,
    };
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn target() -> EmulationParams {
        EmulationParams {
            bandwidth: 9.6,
            delay: 28,
            uplink_queue: 175,
            uplink_loss: 0.004,
            downlink_loss: 0.003,
            topology: None,
        }
    }

    fn config(size: usize, generations: usize) -> SearchConfig {
        SearchConfig {
            population: PopulationConfig {
                size: PopulationSize::Fixed { size },
                max_generations: Some(generations),
                ..Default::default()
            },
            harness: HarnessConfig::Synthetic {
                target: target(),
                noise: 0.0,
            },
            random_seed: Some(7),
            ..Default::default()
        }
    }

    /// Fails every call made on one worker.
    struct BrokenWorker {
        broken: String,
        calls: Mutex<Vec<String>>,
    }

    impl Harness for BrokenWorker {
        fn run(
            &self,
            _params: &EmulationParams,
            _replications: usize,
            worker: &str,
        ) -> Result<FitnessScores, HarnessError> {
            self.calls.lock().unwrap().push(worker.to_string());
            // Long enough for every pool thread to pick up a job.
            std::thread::sleep(std::time::Duration::from_millis(20));
            if worker == self.broken {
                Err(HarnessError::Unavailable(worker.to_string()))
            } else {
                Ok(FitnessScores::uniform(1.0))
            }
        }
    }

    #[test]
    fn test_invalid_config_fails_before_evaluation() {
        let config = config(5, 3);
        assert!(matches!(
            SearchEngine::new(config),
            Err(SearchError::Config(ConfigError::InvalidPopulationSize(5)))
        ));
    }

    #[test]
    fn test_genetic_run() {
        let mut engine = SearchEngine::new(config(8, 6)).unwrap();
        let mut progress = Vec::new();
        let result = engine.run_with_callback(|p| progress.push(p.clone()));

        assert_eq!(result.stats.generations, 6);
        assert_eq!(result.stats.stop_reason, StopReason::MaxGenerations);
        assert_eq!(result.stats.total_evaluations, 48);
        assert_eq!(result.stats.strategy, "genetic_algorithm");
        assert_eq!(result.history.len(), 6);
        assert_eq!(result.archive.len(), 5);

        assert_eq!(progress.len(), 6);
        assert!(progress.iter().all(|p| p.population_scores.len() == 8));

        // Accumulating archive: best score never gets worse.
        for pair in progress.windows(2) {
            assert!(pair[1].archive_scores[0] <= pair[0].archive_scores[0]);
        }

        let best = result.best.unwrap();
        assert_eq!(best.score, result.stats.best_score);
        assert!(best.genes.iter().zip(&engine.config().space.genes).all(|(v, b)| b.contains(*v)));
    }

    #[test]
    fn test_spsa_run() {
        let mut config = config(4, 10);
        config.strategy = SearchStrategy::Spsa(SpsaConfig::default());
        let mut engine = SearchEngine::new(config).unwrap();
        let result = engine.run();

        assert_eq!(result.stats.strategy, "spsa");
        assert_eq!(result.stats.generations, 10);
        assert_eq!(result.stats.total_evaluations, 20);
    }

    #[test]
    fn test_staged_reset_run() {
        let mut config = config(6, 6);
        config.archive = ArchiveConfig {
            elite_count: 3,
            mode: ArchiveMode::StagedReset,
        };
        config.replication = ReplicationSchedule {
            stages: vec![
                ReplicationStage {
                    from_generation: 0,
                    replications: 1,
                },
                ReplicationStage {
                    from_generation: 3,
                    replications: 2,
                },
            ],
        };

        let mut engine = SearchEngine::new(config).unwrap();
        let mut progress = Vec::new();
        engine.run_with_callback(|p| progress.push(p.clone()));

        let resets: Vec<usize> = progress
            .iter()
            .filter(|p| p.archive_reset)
            .map(|p| p.generation)
            .collect();
        assert_eq!(resets, vec![3]);

        // After the reset the archive is exactly the best three of generation 3.
        let mut expected = progress[3].population_scores.clone();
        expected.sort_by(f64::total_cmp);
        expected.truncate(3);
        assert_eq!(progress[3].archive_scores, expected);
        assert_eq!(progress[3].replications, 2);
        assert_eq!(progress[2].replications, 1);
    }

    #[test]
    fn test_failed_worker_gets_penalty() {
        let mut config = config(4, 2);
        config.workers = WorkerConfig {
            endpoints: vec!["good-a".into(), "bad".into(), "good-b".into(), "good-c".into()],
        };
        let harness = BrokenWorker {
            broken: "bad".to_string(),
            calls: Mutex::new(Vec::new()),
        };
        let mut engine = SearchEngine::with_harness(config, Box::new(harness)).unwrap();
        let result = engine.run();

        assert_eq!(result.stats.generations, 2);
        assert_eq!(result.stats.total_evaluations, 8);
        // Whatever ran on the broken worker scored the penalty; the rest scored 1.
        assert!(result.history.best_score.iter().all(|s| *s == 1.0));
        assert_eq!(result.best.unwrap().score, 1.0);
    }

    #[test]
    fn test_cancellation() {
        let mut engine = SearchEngine::new(config(4, 100)).unwrap();
        let cancel = engine.cancel_handle();

        // Cancel immediately
        cancel.store(true, Ordering::Relaxed);

        let result = engine.run();
        assert_eq!(result.stats.stop_reason, StopReason::Cancelled);
        assert_eq!(result.stats.generations, 0);
        assert!(result.best.is_none());
    }

    #[test]
    fn test_cancel_from_callback() {
        let mut engine = SearchEngine::new(config(4, 100)).unwrap();
        let cancel = engine.cancel_handle();
        let result = engine.run_with_callback(|p| {
            if p.generation == 2 {
                cancel.store(true, Ordering::Relaxed);
            }
        });
        assert_eq!(result.stats.stop_reason, StopReason::Cancelled);
        assert_eq!(result.stats.generations, 3);
    }

    #[test]
    fn test_target_and_stagnation() {
        let mut config = config(4, 50);
        config.population.target_score = Some(f64::MAX);
        let result = SearchEngine::new(config).unwrap().run();
        assert_eq!(result.stats.stop_reason, StopReason::TargetReached);
        assert_eq!(result.stats.generations, 1);

        let mut config = self::config(4, 50);
        config.population.stagnation_limit = Some(2);
        let harness = BrokenWorker {
            broken: String::new(),
            calls: Mutex::new(Vec::new()),
        };
        // Constant scores never improve after the first generation.
        let result = SearchEngine::with_harness(config, Box::new(harness)).unwrap().run();
        assert_eq!(result.stats.stop_reason, StopReason::Stagnation);
        assert_eq!(result.stats.generations, 3);
    }

    #[test]
    fn test_outputs_written() {
        let dir = tempdir().unwrap();
        let mut config = config(4, 3);
        config.output.search_log = Some(dir.path().join("search.log"));
        config.output.best_results_dir = Some(dir.path().join("best"));

        SearchEngine::new(config).unwrap().run();

        let records = read_search_log(dir.path().join("search.log")).unwrap();
        assert_eq!(records.len(), 12);
        assert!(
            dir.path()
                .join("best/best_overall_median_results/result.json")
                .exists()
        );
    }

    #[test]
    fn test_unwritable_outputs_do_not_stop_search() {
        let dir = tempdir().unwrap();
        // A regular file where a directory is expected makes both outputs unopenable.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let mut config = config(4, 3);
        config.output.search_log = Some(blocker.join("search.log"));
        config.output.best_results_dir = Some(blocker.join("best"));

        let mut engine = SearchEngine::new(config).unwrap();
        assert!(engine.state().search_log.is_none());
        assert!(engine.state().best_results.is_none());

        let result = engine.run();
        assert_eq!(result.stats.stop_reason, StopReason::MaxGenerations);
        assert_eq!(result.stats.total_evaluations, 12);
        assert!(result.best.is_some());
    }

    #[test]
    fn test_evenly_spaced_is_deterministic() {
        let mut config = config(4, 3);
        config.strategy = SearchStrategy::GeneticAlgorithm(GeneticAlgorithmConfig {
            initializer: Initializer::EvenlySpaced,
            ..Default::default()
        });
        let first = SearchEngine::new(config.clone()).unwrap().run();
        let second = SearchEngine::new(config).unwrap().run();
        assert_eq!(first.history.best_score, second.history.best_score);
    }
}
