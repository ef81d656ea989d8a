//! Compute module - Fitness evaluation and the search strategies.

pub mod evaluation;
pub mod evolution;
