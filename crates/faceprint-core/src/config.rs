use serde::Deserialize;

/// Tunables for the embedding pipeline, fixed at construction time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cosine similarity at or above which two signatures match.
    pub similarity_threshold: f32,
    /// Padding added on each side of the detector box, as a fraction of its size.
    pub padding_ratio: f32,
    /// Minimum crop width/height in pixels.
    pub min_crop_size: u32,
    /// Distance kept between the crop's right/bottom edge and the frame edge.
    pub safety_margin: u32,
    /// Side of the centered fallback crop, as a fraction of the smaller frame side.
    pub fallback_ratio: f32,
    /// Square input side expected by the recognition model.
    pub input_size: usize,
    /// Length of the signature produced by the recognition model.
    pub embedding_dim: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            padding_ratio: 0.2,
            min_crop_size: 50,
            safety_margin: 5,
            fallback_ratio: 0.5,
            input_size: 112,
            embedding_dim: 512,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.similarity_threshold, 0.6);
        assert_eq!(c.padding_ratio, 0.2);
        assert_eq!(c.min_crop_size, 50);
        assert_eq!(c.safety_margin, 5);
        assert_eq!(c.input_size, 112);
        assert_eq!(c.embedding_dim, 512);
    }
}
