//! Evolutionary search over emulation parameters.
//!
//! # Overview
//!
//! - **Genome Operations** (`genome`): initialization, crossover and mutation
//! - **Selection** (`selection`): four-way tournament with fixed pairs
//! - **Archive** (`archive`): bounded elite set and the best-results store
//! - **Strategies** (`genetic`, `spsa`): interchangeable [`Optimizer`]s
//! - **Driver** (`search`): the generation loop, stop conditions and reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use emulation_search::compute::evolution::SearchEngine;
//! use emulation_search::schema::SearchConfig;
//!
//! let mut engine = SearchEngine::new(SearchConfig::default()).unwrap();
//! let result = engine.run_with_callback(|progress| {
//!     println!("Generation {}: best score = {:.3}",
//!         progress.generation, progress.best_score);
//! });
//! println!("Best score: {:.3}", result.stats.best_score);
//! ```

mod archive;
mod genetic;
mod genome;
mod search;
mod selection;
mod spsa;

pub use archive::{BestResults, EliteArchive, ScoreCategory, top_k};
pub use genetic::GeneticSearch;
pub use genome::{
    Genome, GenomeRng, MutationParams, ScoredGenome, clamp_into, evenly_spaced_population,
    genome_distance, population_diversity, sort_by_score,
};
pub use search::{Optimizer, RunState, SearchEngine, SearchError};
pub use selection::{TOURNAMENT_SIZE, pair_winners, select_parent_pair};
pub use spsa::Spsa;
