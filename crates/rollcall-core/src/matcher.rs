//! Nearest-neighbour search over enrolled signatures.

use crate::types::{DimensionMismatch, Enrollment, MatchResult, Signature};

/// Strategy for finding the enrolled signature closest to a probe.
pub trait Matcher {
    /// Return the most similar enrollment, or `None` for an empty gallery.
    ///
    /// Thresholding is left to the caller.
    fn best_match(
        &self,
        probe: &Signature,
        gallery: &[Enrollment],
    ) -> Result<Option<MatchResult>, DimensionMismatch>;
}

/// Remapped cosine similarity matcher.
///
/// Visits every gallery entry, keeps the strictly greatest score, so ties
/// go to the entry enrolled first.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(
        &self,
        probe: &Signature,
        gallery: &[Enrollment],
    ) -> Result<Option<MatchResult>, DimensionMismatch> {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let sim = probe.similarity(&entry.signature)?;
            let is_better = match best {
                None => true,
                Some((_, best_sim)) => sim > best_sim,
            };
            if is_better {
                best = Some((i, sim));
            }
        }

        Ok(best.map(|(idx, similarity)| MatchResult {
            identity: gallery[idx].identity.clone(),
            similarity,
        }))
    }
}
