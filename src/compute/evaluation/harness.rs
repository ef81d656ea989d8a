//! Experiment harnesses: the external collaborators that turn an emulation
//! configuration into fitness scores.

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use rand::prelude::*;
use rand_distr::Normal;

use crate::schema::{EmulationParams, EvaluationConfig, FitnessScores, HarnessConfig};

/// Poll interval while waiting for a command with a deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Failure of one evaluation attempt.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error while running experiment: {0}")]
    Io(#[from] io::Error),
    #[error("Experiment timed out after {0:?}")]
    Timeout(Duration),
    #[error("Experiment exited with {0}")]
    Failed(ExitStatus),
    #[error("No score line in experiment output")]
    MissingScores,
    #[error("Worker {0} is unavailable")]
    Unavailable(String),
}

/// Runs `replications` trials of an emulation configuration on one worker and
/// returns the aggregate scores.
///
/// Implementations are called concurrently from the worker pool, one call per
/// worker at a time.
pub trait Harness: Send + Sync {
    fn run(
        &self,
        params: &EmulationParams,
        replications: usize,
        worker: &str,
    ) -> Result<FitnessScores, HarnessError>;
}

/// Build the harness described by the configuration.
pub fn build_harness(
    config: &HarnessConfig,
    evaluation: &EvaluationConfig,
    seed: u64,
) -> Box<dyn Harness> {
    match config {
        HarnessConfig::Command { program, args } => Box::new(CommandHarness {
            program: program.clone(),
            args: args.clone(),
            timeout: evaluation.timeout_secs.map(Duration::from_secs),
        }),
        HarnessConfig::Synthetic { target, noise } => {
            Box::new(SyntheticHarness::new(target.clone(), *noise, seed))
        }
    }
}

/// Runs a local program per evaluation and parses the scores it prints.
///
/// Invocation:
/// `program [args..] --worker W --trials N --bandwidth X --delay MS
/// --uplink-queue P --uplink-loss L --downlink-loss L [--topology]`.
/// The last stdout line holding `overall_median_score=` is parsed as
/// comma-separated `key=value` pairs.
#[derive(Debug, Clone)]
pub struct CommandHarness {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl CommandHarness {
    fn command(&self, params: &EmulationParams, replications: usize, worker: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--worker")
            .arg(worker)
            .arg("--trials")
            .arg(replications.to_string())
            .arg("--bandwidth")
            .arg(params.bandwidth.to_string())
            .arg("--delay")
            .arg(params.delay.to_string())
            .arg("--uplink-queue")
            .arg(params.uplink_queue.to_string())
            .arg("--uplink-loss")
            .arg(params.uplink_loss.to_string())
            .arg("--downlink-loss")
            .arg(params.downlink_loss.to_string());
        if params.topology == Some(true) {
            cmd.arg("--topology");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        cmd
    }
}

impl Harness for CommandHarness {
    fn run(
        &self,
        params: &EmulationParams,
        replications: usize,
        worker: &str,
    ) -> Result<FitnessScores, HarnessError> {
        let mut child = self
            .command(params, replications, worker)
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        // Drain stdout on its own thread so a chatty child never blocks on a full pipe.
        let mut stdout = child.stdout.take().ok_or(HarnessError::MissingScores)?;
        let reader = thread::spawn(move || {
            let mut output = String::new();
            stdout.read_to_string(&mut output).map(|_| output)
        });

        let status = match self.timeout {
            None => child.wait()?,
            Some(limit) => {
                let deadline = Instant::now() + limit;
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        reap_reader(reader);
                        return Err(HarnessError::Timeout(limit));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        let output = reader
            .join()
            .map_err(|_| io::Error::other("stdout reader panicked"))??;

        if !status.success() {
            return Err(HarnessError::Failed(status));
        }
        parse_scores(&output).ok_or(HarnessError::MissingScores)
    }
}

/// Join the stdout reader of a killed child if the pipe closes within one poll
/// interval. A grandchild can keep the pipe open past the kill; the reader is
/// then left detached and exits on its own once the pipe closes.
fn reap_reader<T>(reader: thread::JoinHandle<T>) {
    let deadline = Instant::now() + POLL_INTERVAL;
    while !reader.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    if reader.is_finished() {
        let _ = reader.join();
    } else {
        debug!("Experiment output pipe still open after kill, detaching reader");
    }
}

/// Parse the last score line of harness output.
///
/// Values that are not numbers become NaN so the evaluator penalises them.
pub fn parse_scores(output: &str) -> Option<FitnessScores> {
    let line = output
        .lines()
        .rev()
        .find(|l| l.contains("overall_median_score="))?;

    let fields: HashMap<&str, &str> = line
        .trim()
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect();

    let value = |key: &str| {
        fields
            .get(key)
            .map(|v| v.trim_end_matches('%').parse::<f64>().unwrap_or(f64::NAN))
    };

    Some(FitnessScores {
        throughput: value("tput_median_score")?,
        delay: value("delay_median_score")?,
        overall: value("overall_median_score")?,
    })
}

/// Analytic stand-in for the remote harness.
///
/// Scores are relative distances to a target configuration with multiplicative
/// Gaussian noise per trial, averaged over the requested trials.
#[derive(Debug)]
pub struct SyntheticHarness {
    target: EmulationParams,
    noise: f64,
    seed: u64,
    calls: AtomicU64,
}

impl SyntheticHarness {
    pub fn new(target: EmulationParams, noise: f64, seed: u64) -> Self {
        Self {
            target,
            noise,
            seed,
            calls: AtomicU64::new(0),
        }
    }

    /// Noise-free scores for `params`.
    pub fn exact_scores(&self, params: &EmulationParams) -> FitnessScores {
        let t = &self.target;
        let relative =
            |value: f64, target: f64| 100.0 * (value - target).abs() / target.abs().max(1e-9);

        let throughput = relative(params.bandwidth, t.bandwidth)
            + 1000.0 * (params.uplink_loss - t.uplink_loss).abs()
            + 1000.0 * (params.downlink_loss - t.downlink_loss).abs();
        let delay = relative(params.delay as f64, t.delay as f64)
            + 0.1 * relative(params.uplink_queue as f64, t.uplink_queue as f64);
        let topology = match (params.topology, t.topology) {
            (Some(a), Some(b)) if a != b => 5.0,
            _ => 0.0,
        };

        FitnessScores {
            throughput,
            delay,
            overall: (throughput + delay) / 2.0 + topology,
        }
    }
}

impl Harness for SyntheticHarness {
    fn run(
        &self,
        params: &EmulationParams,
        replications: usize,
        _worker: &str,
    ) -> Result<FitnessScores, HarnessError> {
        let exact = self.exact_scores(params);
        let normal = match Normal::new(0.0, self.noise) {
            Ok(normal) if self.noise > 0.0 => normal,
            _ => return Ok(exact),
        };

        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let mut rng = StdRng::seed_from_u64(self.seed ^ call.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let trials = replications.max(1);

        let mut total = FitnessScores::uniform(0.0);
        for _ in 0..trials {
            let mut jitter = || (1.0 + rng.sample(normal)).max(0.0);
            total.throughput += exact.throughput * jitter();
            total.delay += exact.delay * jitter();
            total.overall += exact.overall * jitter();
        }

        let n = trials as f64;
        Ok(FitnessScores {
            throughput: total.throughput / n,
            delay: total.delay / n,
            overall: total.overall / n,
        })
    }
}
