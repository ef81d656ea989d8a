//! Emulation search CLI - Run parameter searches from JSON configuration.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use emulation_search::{
    compute::evaluation::{best_records, read_search_log},
    compute::evolution::{EliteArchive, SearchEngine},
    schema::SearchConfig,
};

#[derive(Parser, Debug)]
#[command(name = "emulation-search")]
#[command(about = "Search network-emulation parameters that replicate a real trace")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the configured search
    Run {
        /// Path to search configuration file
        config: PathBuf,
        /// Override the generation budget
        #[arg(long)]
        generations: Option<usize>,
        /// Override the random seed
        #[arg(long)]
        seed: Option<u64>,
        /// Write the search result as JSON
        #[arg(long)]
        output: Option<PathBuf>,
        /// Seed the elite archive from an earlier search log
        #[arg(long)]
        resume: Option<PathBuf>,
    },
    /// Print a default configuration
    ExampleConfig,
    /// Print the best records of a search log
    Best {
        /// Path to search log
        log: PathBuf,
        /// Number of records to show
        #[arg(short, default_value_t = 5)]
        n: usize,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Commands::Run {
            config,
            generations,
            seed,
            output,
            resume,
        } => run(config, generations, seed, output, resume),
        Commands::ExampleConfig => print_example_config(),
        Commands::Best { log, n } => print_best(log, n),
    }
}

fn run(
    config_path: PathBuf,
    generations: Option<usize>,
    seed: Option<u64>,
    output: Option<PathBuf>,
    resume: Option<PathBuf>,
) -> Result<()> {
    let config_str = fs::read_to_string(&config_path)
        .with_context(|| format!("Error reading config file {}", config_path.display()))?;
    let mut config: SearchConfig =
        serde_json::from_str(&config_str).context("Error parsing config")?;

    if let Some(generations) = generations {
        config.population.max_generations = Some(generations);
    }
    if seed.is_some() {
        config.random_seed = seed;
    }

    let archive = match &resume {
        Some(path) => {
            let records = read_search_log(path)
                .with_context(|| format!("Error reading search log {}", path.display()))?;
            Some(EliteArchive::from_records(
                &records,
                &config.space,
                config.archive.elite_count,
                config.archive.mode,
            ))
        }
        None => None,
    };

    println!("Emulation Parameter Search");
    println!("==========================");
    println!("Genes: {}", config.space.len());
    println!("Workers: {}", config.workers.endpoints.join(", "));
    match config.population.max_generations {
        Some(max) => println!("Generations: {max}"),
        None => println!("Generations: unbounded"),
    }
    println!();

    let mut engine = SearchEngine::new(config)?;
    if let Some(archive) = archive {
        println!("Resuming with {} archived candidates", archive.len());
        engine = engine.with_archive(archive);
    }

    let start = Instant::now();
    let result = engine.run_with_callback(|progress| {
        let total = progress
            .total_generations
            .map_or_else(|| "?".to_string(), |t| t.to_string());
        println!(
            "  Generation {}/{}: best={:.4}, archive={:?}, trials={}, {:.1}s",
            progress.generation + 1,
            total,
            progress.best_score,
            progress.archive_scores,
            progress.replications,
            start.elapsed().as_secs_f32()
        );
    });

    println!();
    println!("Stopped: {:?}", result.stats.stop_reason);
    println!(
        "Evaluations: {} ({} failed)",
        result.stats.total_evaluations, result.stats.failed_evaluations
    );
    match &result.best {
        Some(best) => {
            println!("Best score: {:.4}", best.score);
            println!("Best parameters: {}", serde_json::to_string(&best.params)?);
        }
        None => println!("No candidates evaluated"),
    }

    if let Some(path) = output {
        fs::write(&path, serde_json::to_string_pretty(&result)?)
            .with_context(|| format!("Error writing result {}", path.display()))?;
        println!("Result written to {}", path.display());
    }

    Ok(())
}

fn print_best(path: PathBuf, n: usize) -> Result<()> {
    let records = read_search_log(&path)
        .with_context(|| format!("Error reading search log {}", path.display()))?;
    println!("{} records in {}", records.len(), path.display());
    for (rank, record) in best_records(&records, n).into_iter().enumerate() {
        println!("{:>3}. {}", rank + 1, record.to_line());
    }
    Ok(())
}

fn print_example_config() -> Result<()> {
    let config = SearchConfig::default();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
