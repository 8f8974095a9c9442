//! Cosine similarity matching with a fixed decision threshold.

use crate::config::PipelineConfig;
use crate::types::{GalleryMatch, MatchResult, RegisteredIdentity, Signature};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("signature length mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Compares signatures by cosine similarity and applies `similarity >= threshold`.
///
/// Stateless and reentrant; holds no references past a single call.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityMatcher {
    threshold: f32,
}

impl Default for SimilarityMatcher {
    fn default() -> Self {
        Self::new(PipelineConfig::default().similarity_threshold)
    }
}

impl SimilarityMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Cosine similarity in [-1, 1].
    ///
    /// Both sides are re-normalized here, so callers need not pass unit
    /// vectors. A zero-norm side yields `0.0`.
    pub fn similarity(&self, a: &Signature, b: &Signature) -> Result<f32, MatchError> {
        if a.dim() != b.dim() {
            return Err(MatchError::DimensionMismatch {
                left: a.dim(),
                right: b.dim(),
            });
        }

        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (&x, &y) in a.values.iter().zip(b.values.iter()) {
            let (x, y) = (x as f64, y as f64);
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        Ok(if denom > 0.0 { (dot / denom) as f32 } else { 0.0 })
    }

    pub fn compare(&self, a: &Signature, b: &Signature) -> Result<MatchResult, MatchError> {
        let similarity = self.similarity(a, b)?;
        Ok(MatchResult::from_similarity(similarity, self.threshold))
    }

    /// Nearest-neighbour search over `gallery`.
    ///
    /// Visits every entry (no early exit). The highest similarity wins; ties
    /// keep the earlier entry. The best candidate is returned even when it is
    /// below threshold, with `is_match == false`. `None` for an empty gallery.
    pub fn best_match(
        &self,
        probe: &Signature,
        gallery: &[RegisteredIdentity],
    ) -> Result<Option<GalleryMatch>, MatchError> {
        let mut best: Option<(usize, f32)> = None;

        for (i, identity) in gallery.iter().enumerate() {
            let sim = self.similarity(probe, &identity.signature)?;
            let better = match best {
                None => true,
                Some((_, best_sim)) => sim > best_sim,
            };
            if better {
                best = Some((i, sim));
            }
        }

        Ok(best.map(|(i, sim)| GalleryMatch {
            identity_id: gallery[i].id.clone(),
            name: gallery[i].name.clone(),
            result: MatchResult::from_similarity(sim, self.threshold),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sig(values: &[f32]) -> Signature {
        Signature::new(values.to_vec())
    }

    fn identity(id: &str, values: &[f32]) -> RegisteredIdentity {
        RegisteredIdentity {
            id: id.into(),
            name: format!("name-{id}"),
            signature: sig(values),
            photo_ref: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_self_similarity() {
        let s = Signature::new((0..512).map(|i| ((i * 37) % 101) as f32 - 50.0).collect());
        let r = SimilarityMatcher::default().compare(&s, &s).unwrap();
        assert!((r.similarity - 1.0).abs() < 1e-6);
        assert!(r.distance.abs() < 1e-6);
        assert!(r.is_match);
        assert_eq!(r.confidence_percent, 100);
    }

    #[test]
    fn test_symmetric() {
        let a = sig(&[0.3, -1.2, 4.0, 0.01]);
        let b = sig(&[2.0, 0.5, -0.7, 3.3]);
        let m = SimilarityMatcher::default();
        assert_eq!(m.similarity(&a, &b).unwrap(), m.similarity(&b, &a).unwrap());
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        let m = SimilarityMatcher::default();
        assert!(m.similarity(&sig(&[1.0, 0.0]), &sig(&[0.0, 1.0])).unwrap().abs() < 1e-6);
        let opp = m.compare(&sig(&[1.0, 0.0]), &sig(&[-1.0, 0.0])).unwrap();
        assert!((opp.similarity + 1.0).abs() < 1e-6);
        assert_eq!(opp.confidence_percent, -100);
        assert!(!opp.is_match);
    }

    #[test]
    fn test_renormalizes_inputs() {
        let m = SimilarityMatcher::default();
        let r = m.compare(&sig(&[10.0, 0.0]), &sig(&[0.5, 0.0])).unwrap();
        assert!((r.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_never_matches() {
        let m = SimilarityMatcher::new(-1.0);
        let r = m.compare(&sig(&[0.0, 0.0]), &sig(&[1.0, 0.0])).unwrap();
        assert_eq!(r.similarity, 0.0);
        assert_eq!(r.confidence_percent, 0);

        let strict = SimilarityMatcher::default();
        assert!(!strict.compare(&sig(&[0.0, 0.0]), &sig(&[0.0, 0.0])).unwrap().is_match);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = SimilarityMatcher::default()
            .compare(&sig(&[1.0, 0.0, 0.0]), &sig(&[1.0, 0.0]))
            .unwrap_err();
        assert_eq!(err, MatchError::DimensionMismatch { left: 3, right: 2 });
    }

    #[test]
    fn test_threshold_boundary() {
        let m = SimilarityMatcher::new(0.6);
        let a = sig(&[1.0, 0.0]);

        // cos = 3/5 exactly
        let at = m.compare(&a, &sig(&[3.0, 4.0])).unwrap();
        assert_eq!(at.similarity, 0.6);
        assert!(at.is_match);
        assert_eq!(at.confidence_percent, 60);

        let below_y = (1.0f32 - 0.59 * 0.59).sqrt();
        let below = m.compare(&a, &sig(&[0.59, below_y])).unwrap();
        assert!((below.similarity - 0.59).abs() < 1e-6);
        assert!(!below.is_match);
        assert_eq!(below.confidence_percent, 59);
    }

    #[test]
    fn test_best_match_picks_highest_not_first() {
        let gallery = vec![
            identity("1", &[0.0, 1.0, 0.0]),
            identity("2", &[0.7, 0.7, 0.0]),
            identity("3", &[1.0, 0.05, 0.0]),
        ];
        let probe = sig(&[1.0, 0.0, 0.0]);

        let best = SimilarityMatcher::default()
            .best_match(&probe, &gallery)
            .unwrap()
            .unwrap();
        assert_eq!(best.identity_id, "3");
        assert_eq!(best.name, "name-3");
        assert!(best.result.is_match);
    }

    #[test]
    fn test_best_match_below_threshold_reported() {
        let gallery = vec![identity("1", &[0.0, 1.0]), identity("2", &[0.3, 1.0])];
        let best = SimilarityMatcher::default()
            .best_match(&sig(&[1.0, 0.0]), &gallery)
            .unwrap()
            .unwrap();
        assert_eq!(best.identity_id, "2");
        assert!(!best.result.is_match);
    }

    #[test]
    fn test_best_match_tie_keeps_earliest() {
        let gallery = vec![identity("a", &[1.0, 0.0]), identity("b", &[2.0, 0.0])];
        let best = SimilarityMatcher::default()
            .best_match(&sig(&[1.0, 0.0]), &gallery)
            .unwrap()
            .unwrap();
        assert_eq!(best.identity_id, "a");
    }

    #[test]
    fn test_best_match_empty_gallery() {
        let best = SimilarityMatcher::default().best_match(&sig(&[1.0]), &[]).unwrap();
        assert!(best.is_none());
    }

    #[test]
    fn test_best_match_dimension_mismatch() {
        let gallery = vec![identity("1", &[1.0, 0.0, 0.0])];
        assert!(SimilarityMatcher::default()
            .best_match(&sig(&[1.0, 0.0]), &gallery)
            .is_err());
    }
}
