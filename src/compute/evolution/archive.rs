//! Elite archive and the on-disk best-results store.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::compute::evaluation::SearchRecord;
use crate::schema::{ArchiveMode, CandidateSnapshot, FitnessScores, ObjectiveSense, ParameterSpace};

use super::genome::{Genome, ScoredGenome, sort_by_score};

/// The `k` lowest-scoring entries of `candidates`, ascending.
pub fn top_k<I>(candidates: I, k: usize) -> Vec<ScoredGenome>
where
    I: IntoIterator<Item = ScoredGenome>,
{
    let mut all: Vec<ScoredGenome> = candidates.into_iter().collect();
    sort_by_score(&mut all);
    all.truncate(k);
    all
}

/// Bounded set of the best scored genomes seen so far.
#[derive(Debug, Clone)]
pub struct EliteArchive {
    capacity: usize,
    mode: ArchiveMode,
    /// Sorted ascending by score.
    entries: Vec<ScoredGenome>,
}

impl EliteArchive {
    /// Create an empty archive keeping at most `capacity` entries.
    pub fn new(capacity: usize, mode: ArchiveMode) -> Self {
        Self {
            capacity,
            mode,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Rebuild an archive from search log records.
    ///
    /// Records whose parameters cannot be encoded in `space` still contribute;
    /// their values are clamped into it.
    pub fn from_records(
        records: &[SearchRecord],
        space: &ParameterSpace,
        capacity: usize,
        mode: ArchiveMode,
    ) -> Self {
        let scored = records.iter().map(|r| ScoredGenome {
            score: r.score,
            genome: Genome::new(space.encode(&r.params)),
            scores: Some(r.scores),
            generation: 0,
        });
        Self {
            capacity,
            mode,
            entries: top_k(scored, capacity),
        }
    }

    /// Fold a generation's scored population into the archive.
    ///
    /// `boundary` marks a replication-count change. In staged-reset mode the
    /// archive is then replaced by the best of `population` alone, since scores
    /// computed under different noise levels are not comparable. Returns whether
    /// a reset happened.
    pub fn update(&mut self, population: &[ScoredGenome], boundary: bool) -> bool {
        let reset = boundary && self.mode == ArchiveMode::StagedReset;
        let previous = if reset {
            debug!("Archive reset: discarding {} entries", self.entries.len());
            Vec::new()
        } else {
            std::mem::take(&mut self.entries)
        };

        self.entries = top_k(
            previous.into_iter().chain(population.iter().cloned()),
            self.capacity,
        );
        reset
    }

    /// Entries, best first.
    pub fn entries(&self) -> &[ScoredGenome] {
        &self.entries
    }

    /// Scores, ascending.
    pub fn scores(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.score).collect()
    }

    /// Best entry.
    pub fn best(&self) -> Option<&ScoredGenome> {
        self.entries.first()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Score component tracked by the best-results store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreCategory {
    Throughput,
    Delay,
    Overall,
}

impl ScoreCategory {
    pub const ALL: [ScoreCategory; 3] = [
        ScoreCategory::Throughput,
        ScoreCategory::Delay,
        ScoreCategory::Overall,
    ];

    fn dir_name(self) -> &'static str {
        match self {
            ScoreCategory::Throughput => "best_tput_median_results",
            ScoreCategory::Delay => "best_delay_median_results",
            ScoreCategory::Overall => "best_overall_median_results",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

const RESULT_FILE: &str = "result.json";

/// Best result per score category, mirrored to disk.
///
/// Category scores are compared after orienting them by the objective sense,
/// so "best" means highest when maximising. Advisory state: write failures
/// are logged and never interrupt the search.
#[derive(Debug)]
pub struct BestResults {
    dir: PathBuf,
    sense: ObjectiveSense,
    /// Oriented best per category, lower is better.
    best: [f64; 3],
}

impl BestResults {
    /// Open (creating if needed) the store, reloading any previous best scores.
    pub fn open<P: AsRef<Path>>(dir: P, sense: ObjectiveSense) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut best = [f64::INFINITY; 3];
        for category in ScoreCategory::ALL {
            let path = dir.join(category.dir_name()).join(RESULT_FILE);
            if let Ok(snapshot) = load_snapshot(&path)
                && let Some(scores) = snapshot.scores
            {
                best[category.index()] = sense.orient(category_score(category, &scores));
            }
        }

        Ok(Self { dir, sense, best })
    }

    /// Best raw score recorded for `category`, or `None` before any record.
    pub fn best(&self, category: ScoreCategory) -> Option<f64> {
        let oriented = self.best[category.index()];
        oriented.is_finite().then(|| self.sense.orient(oriented))
    }

    /// Record a candidate, overwriting every category it improves.
    /// Returns the improved categories.
    pub fn record(&mut self, candidate: &CandidateSnapshot) -> Vec<ScoreCategory> {
        let Some(scores) = candidate.scores else {
            return Vec::new();
        };

        let mut improved = Vec::new();
        for category in ScoreCategory::ALL {
            let score = self.sense.orient(category_score(category, &scores));
            if score < self.best[category.index()] {
                self.best[category.index()] = score;
                improved.push(category);
                if let Err(e) = self.save(category, candidate) {
                    warn!("Failed to save {} best result: {e}", category.dir_name());
                }
            }
        }
        improved
    }

    /// Path of the saved result for `category`.
    pub fn result_path(&self, category: ScoreCategory) -> PathBuf {
        self.dir.join(category.dir_name()).join(RESULT_FILE)
    }

    fn save(&self, category: ScoreCategory, candidate: &CandidateSnapshot) -> io::Result<()> {
        let path = self.result_path(category);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(candidate)?;
        fs::write(&path, json)
    }
}

fn category_score(category: ScoreCategory, scores: &FitnessScores) -> f64 {
    match category {
        ScoreCategory::Throughput => scores.throughput,
        ScoreCategory::Delay => scores.delay,
        ScoreCategory::Overall => scores.overall,
    }
}

fn load_snapshot(path: &Path) -> io::Result<CandidateSnapshot> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
