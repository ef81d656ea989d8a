//! Emulation search - Black-box evolutionary search for network-emulation
//! parameters that reproduce the throughput and delay of a real trace.
//!
//! Every candidate configuration (bandwidth, delay, queue depth, loss rates and
//! an optional topology flag) is scored by an external, noisy and expensive
//! experiment harness. The engine spreads evaluations across the available
//! workers and keeps a bounded archive of the best configurations.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration, parameter space and result types
//! - `compute`: Evaluation (harness, worker pool, search log) and the search
//!   strategies (genetic algorithm, SPSA)
//!
//! # Example
//!
//! ```rust,no_run
//! use emulation_search::{SearchConfig, SearchEngine};
//!
//! let config = SearchConfig::default();
//! let mut engine = SearchEngine::new(config).unwrap();
//! let result = engine.run();
//!
//! if let Some(best) = result.best {
//!     println!("Best score {:.3} with {:?}", best.score, best.params);
//! }
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::evaluation::{FitnessEvaluator, Harness, SearchRecord};
pub use compute::evolution::{EliteArchive, Genome, SearchEngine, SearchError};
pub use schema::{EmulationParams, ParameterSpace, SearchConfig, SearchResult};
