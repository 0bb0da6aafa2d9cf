use async_trait::async_trait;
use std::collections::HashMap;
use tac_core::TacResult;

/// Computes dense vectors for stored values.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text. Blank text maps to the zero vector.
    async fn embed(&self, text: &str) -> TacResult<Vec<f32>>;

    /// Width of the vectors this provider produces.
    fn dimension(&self) -> usize;
}

/// Feature-hashing embedding that needs no model or network.
///
/// Tokens and adjacent token pairs are hashed into a fixed number of
/// buckets, weighted by term frequency and L2-normalized. Deterministic
/// across runs and processes.
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    /// Dimension used when the config does not set one.
    pub const DEFAULT_DIMENSION: usize = 256;

    /// Embedder producing vectors of `dimension` (at least 1).
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn tokens(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() > 1)
            .map(str::to_string)
            .collect()
    }

    fn bucket(&self, feature: &str, salt: u8) -> usize {
        let mut bytes = feature.as_bytes().to_vec();
        bytes.push(salt);
        fnv1a(&bytes) as usize % self.dimension
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> TacResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens = Self::tokens(text);
        if tokens.is_empty() {
            return Ok(vector);
        }

        let mut weights: HashMap<String, f32> = HashMap::new();
        for token in &tokens {
            *weights.entry(token.clone()).or_insert(0.0) += 1.0;
        }
        for pair in tokens.windows(2) {
            *weights.entry(format!("{} {}", pair[0], pair[1])).or_insert(0.0) += 0.5;
        }

        let total = tokens.len() as f32;
        for (feature, weight) in &weights {
            let tf = weight / total;
            vector[self.bucket(feature, 0)] += tf;
            vector[self.bucket(feature, 1)] += tf * 0.5;
        }

        normalize(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Cosine similarity; zero when either side is the zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

// FNV-1a, 32 bit.
fn fnv1a(data: &[u8]) -> u32 {
    data.iter().fold(0x811c_9dc5u32, |hash, &byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}
