//! Schema module - Configuration, parameter space and result types for the search.

mod config;
mod params;
mod progress;

pub use config::*;
pub use params::*;
pub use progress::*;
