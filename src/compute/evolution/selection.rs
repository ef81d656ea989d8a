//! Four-way tournament parent selection.

use super::genome::{GenomeRng, ScoredGenome};

/// Number of candidates drawn per tournament.
pub const TOURNAMENT_SIZE: usize = 4;

/// Draw four distinct candidates from `pool` and return the winners of the
/// pairs `(0, 1)` and `(2, 3)` in draw order.
///
/// The caller guarantees `pool.len() >= 4`; the engine validates the
/// population size at startup.
pub fn select_parent_pair<'a>(
    pool: &[&'a ScoredGenome],
    rng: &mut GenomeRng,
) -> (&'a ScoredGenome, &'a ScoredGenome) {
    debug_assert!(pool.len() >= TOURNAMENT_SIZE);
    let drawn = rng.sample_indices(pool.len(), TOURNAMENT_SIZE);
    pair_winners([pool[drawn[0]], pool[drawn[1]], pool[drawn[2]], pool[drawn[3]]])
}

/// Winners of the two fixed pairs `{0, 1}` and `{2, 3}`.
pub fn pair_winners<'a>(
    candidates: [&'a ScoredGenome; TOURNAMENT_SIZE],
) -> (&'a ScoredGenome, &'a ScoredGenome) {
    let [a, b, c, d] = candidates;
    (duel(a, b), duel(c, d))
}

/// Lower score wins; the first candidate wins a tie.
fn duel<'a>(a: &'a ScoredGenome, b: &'a ScoredGenome) -> &'a ScoredGenome {
    if b.score < a.score { b } else { a }
}
