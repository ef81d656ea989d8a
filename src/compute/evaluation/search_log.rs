//! Append-only search log.
//!
//! One line per evaluation:
//!
//! ```text
//! bandwidth=9.6,delay=28,uplink_queue=175,uplink_loss=0.004,downlink_loss=0.003,trials=2,tput_median_score=1.2,delay_median_score=0.8,overall_median_score=1,score=1
//! ```
//!
//! `topology=0|1` follows `downlink_loss` when the gene is searched. Lines
//! without `trials` or `score` are still read: they count as one trial and
//! score by their overall component.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::warn;

use crate::schema::{EmulationParams, FitnessScores, whole};

/// One evaluated configuration as written to the search log.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRecord {
    pub params: EmulationParams,
    /// Trials the scores were aggregated over.
    pub replications: usize,
    pub scores: FitnessScores,
    /// Scalar fitness the engine used.
    pub score: f64,
}

impl SearchRecord {
    /// Render as a single log line, without trailing newline.
    pub fn to_line(&self) -> String {
        let p = &self.params;
        let mut line = format!(
            "bandwidth={},delay={},uplink_queue={},uplink_loss={},downlink_loss={}",
            p.bandwidth, p.delay, p.uplink_queue, p.uplink_loss, p.downlink_loss
        );
        if let Some(topology) = p.topology {
            line.push_str(&format!(",topology={}", u8::from(topology)));
        }
        let s = &self.scores;
        line.push_str(&format!(
            ",trials={},tput_median_score={},delay_median_score={}",
            self.replications, s.throughput, s.delay
        ));
        line.push_str(&format!(",overall_median_score={},score={}", s.overall, self.score));
        line
    }

    /// Parse a log line. Returns `None` for lines missing a field or holding
    /// an unparseable value.
    pub fn parse(line: &str) -> Option<Self> {
        let fields: HashMap<&str, &str> = line
            .trim()
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .collect();

        let float = |key: &str| fields.get(key)?.parse::<f64>().ok();
        // Integer parameters may have been logged before rounding.
        let int = |key: &str| float(key).map(whole);

        let topology = match fields.get("topology") {
            None => None,
            Some(&"1") | Some(&"true") => Some(true),
            Some(&"0") | Some(&"false") => Some(false),
            Some(_) => return None,
        };

        let scores = FitnessScores {
            throughput: float("tput_median_score")?,
            delay: float("delay_median_score")?,
            overall: float("overall_median_score")?,
        };

        Some(Self {
            params: EmulationParams {
                bandwidth: float("bandwidth")?,
                delay: int("delay")?,
                uplink_queue: int("uplink_queue")?,
                uplink_loss: float("uplink_loss")?,
                downlink_loss: float("downlink_loss")?,
                topology,
            },
            replications: match fields.get("trials") {
                Some(trials) => trials.parse().ok()?,
                None => 1,
            },
            scores,
            score: float("score").unwrap_or(scores.overall),
        })
    }
}

/// Append-only writer. Write failures are logged and otherwise ignored.
#[derive(Debug)]
pub struct SearchLog {
    path: PathBuf,
    file: File,
}

impl SearchLog {
    /// Open `path` for appending, creating it and its parent directory if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    pub fn append(&mut self, record: &SearchRecord) {
        let line = format!("{}\n", record.to_line());
        if let Err(e) = self
            .file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
        {
            warn!("Failed to append to search log {}: {e}", self.path.display());
        }
    }
}

/// Read every well-formed record from a search log, skipping malformed lines.
pub fn read_search_log<P: AsRef<Path>>(path: P) -> io::Result<Vec<SearchRecord>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut records = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match SearchRecord::parse(&line) {
            Some(record) => records.push(record),
            None => warn!("Skipping malformed search log line {}", number + 1),
        }
    }
    Ok(records)
}

/// The `n` lowest-scoring records, ascending. Ties keep log order.
pub fn best_records(records: &[SearchRecord], n: usize) -> Vec<&SearchRecord> {
    let mut sorted: Vec<&SearchRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.score.total_cmp(&b.score));
    sorted.truncate(n);
    sorted
}
