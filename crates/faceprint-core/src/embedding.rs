//! Post-processing of raw model output into unit-length signatures.

use crate::types::Signature;

/// L2-normalizes raw embedding vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingPostProcessor;

impl EmbeddingPostProcessor {
    /// Divide every component by the vector's Euclidean norm.
    ///
    /// An all-zero vector carries no direction and is returned unchanged.
    pub fn post_process(&self, raw: Vec<f32>) -> Signature {
        Signature::new(l2_normalize(raw))
    }
}

/// L2-normalize `values`; zero-norm input is passed through.
pub fn l2_normalize(values: Vec<f32>) -> Vec<f32> {
    let norm = values
        .iter()
        .map(|&v| (v as f64) * (v as f64))
        .sum::<f64>()
        .sqrt();

    if norm == 0.0 {
        tracing::warn!(dim = values.len(), "zero-norm embedding, leaving unnormalized");
        return values;
    }

    values.into_iter().map(|v| (v as f64 / norm) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dim: usize, seed: u32) -> Vec<f32> {
        (0..dim)
            .map(|i| ((i as u32).wrapping_mul(2_654_435_761).wrapping_add(seed) % 2000) as f32 / 1000.0 - 1.0)
            .collect()
    }

    #[test]
    fn test_unit_norm() {
        let sig = EmbeddingPostProcessor.post_process(sample(512, 7));
        assert_eq!(sig.dim(), 512);
        assert!((sig.norm() - 1.0).abs() < 1e-4, "norm = {}", sig.norm());
    }

    #[test]
    fn test_scale_invariant() {
        let v = sample(512, 11);
        let scaled: Vec<f32> = v.iter().map(|x| x * 37.5).collect();
        let a = EmbeddingPostProcessor.post_process(v);
        let b = EmbeddingPostProcessor.post_process(scaled);
        for (x, y) in a.values.iter().zip(b.values.iter()) {
            assert!((x - y).abs() < 1e-6, "{x} vs {y}");
        }
    }

    #[test]
    fn test_zero_vector_passthrough() {
        let sig = EmbeddingPostProcessor.post_process(vec![0.0; 512]);
        assert_eq!(sig.values, vec![0.0; 512]);
    }

    #[test]
    fn test_idempotent_on_unit_vector() {
        let sig = EmbeddingPostProcessor.post_process(vec![0.6, 0.8]);
        assert!((sig.values[0] - 0.6).abs() < 1e-7);
        assert!((sig.values[1] - 0.8).abs() < 1e-7);
    }

    #[test]
    fn test_tiny_values_normalized() {
        let sig = EmbeddingPostProcessor.post_process(vec![1e-20, 0.0, 0.0]);
        assert!((sig.values[0] - 1.0).abs() < 1e-6);
    }
}
