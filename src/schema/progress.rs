//! Progress, history and result types reported by a search run.

use serde::{Deserialize, Serialize};

use super::EmulationParams;

/// Raw score components returned by the experiment harness.
///
/// Each component is a difference between emulated and real-trace statistics,
/// so lower is better.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FitnessScores {
    /// Median throughput difference.
    pub throughput: f64,
    /// Median delay difference.
    pub delay: f64,
    /// Combined throughput and delay difference.
    pub overall: f64,
}

impl FitnessScores {
    /// All components set to `value`.
    pub fn uniform(value: f64) -> Self {
        Self {
            throughput: value,
            delay: value,
            overall: value,
        }
    }

    /// Replace NaN and infinite components with `penalty`.
    pub fn sanitized(self, penalty: f64) -> Self {
        let fix = |v: f64| if v.is_finite() { v } else { penalty };
        Self {
            throughput: fix(self.throughput),
            delay: fix(self.delay),
            overall: fix(self.overall),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.throughput.is_finite() && self.delay.is_finite() && self.overall.is_finite()
    }
}

/// Snapshot of an evaluated candidate for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSnapshot {
    /// Scalar fitness (lower is better).
    pub score: f64,
    /// Gene values.
    pub genes: Vec<f64>,
    /// Decoded emulation parameters.
    pub params: EmulationParams,
    /// Raw score components, when known.
    pub scores: Option<FitnessScores>,
    /// Trials the score was averaged over.
    pub replications: usize,
    /// Generation the candidate was evaluated in.
    pub generation: usize,
}

/// Progress update emitted after every generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProgress {
    /// Generation just completed.
    pub generation: usize,
    /// Generation budget, if any.
    pub total_generations: Option<usize>,
    /// Trials per evaluation in this generation.
    pub replications: usize,
    /// Scores of this generation's population, in population order.
    pub population_scores: Vec<f64>,
    /// Archive scores, ascending.
    pub archive_scores: Vec<f64>,
    /// Best score seen so far under the current replication stage.
    pub best_score: f64,
    /// Best candidate so far.
    pub best_candidate: Option<CandidateSnapshot>,
    /// Generations since last improvement.
    pub stagnation_count: usize,
    /// Whether the archive was rebuilt this generation.
    pub archive_reset: bool,
    /// Evaluations that ended with the penalty score this generation.
    pub failed_evaluations: usize,
}

/// Per-generation history for plotting.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchHistory {
    /// Best population score per generation.
    pub best_score: Vec<f64>,
    /// Mean population score per generation.
    pub mean_score: Vec<f64>,
    /// Standard deviation of population scores per generation.
    pub score_std: Vec<f64>,
    /// Mean normalised pairwise genome distance per generation.
    pub diversity: Vec<f64>,
    /// Replication count per generation.
    pub replications: Vec<usize>,
}

impl SearchHistory {
    /// Append one generation's statistics.
    pub fn record(&mut self, scores: &[f64], diversity: f64, replications: usize) {
        let n = scores.len().max(1) as f64;
        let best = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let mean = scores.iter().sum::<f64>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

        self.best_score.push(best);
        self.mean_score.push(mean);
        self.score_std.push(variance.sqrt());
        self.diversity.push(diversity);
        self.replications.push(replications);
    }

    /// Number of generations recorded.
    pub fn len(&self) -> usize {
        self.best_score.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best_score.is_empty()
    }
}

/// Final result of a search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Best candidate found, if anything was evaluated.
    pub best: Option<CandidateSnapshot>,
    /// Final elite archive, best first.
    pub archive: Vec<CandidateSnapshot>,
    /// Statistics from the run.
    pub stats: SearchStats,
    /// Full history for analysis.
    pub history: SearchHistory,
}

/// Statistics from a search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStats {
    /// Strategy that ran.
    pub strategy: String,
    /// Generations (or iterations) completed.
    pub generations: usize,
    /// Total evaluations dispatched.
    pub total_evaluations: u64,
    /// Evaluations that ended with the penalty score.
    pub failed_evaluations: u64,
    /// Best score achieved.
    pub best_score: f64,
    /// Time taken in seconds.
    pub elapsed_seconds: f64,
    /// Reason for stopping.
    pub stop_reason: StopReason,
}

/// Reason a search stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Reached the generation budget.
    MaxGenerations,
    /// Reached the target score.
    TargetReached,
    /// Stagnation limit hit.
    Stagnation,
    /// Stopped through the cancel handle.
    Cancelled,
}
