/// Turns text into a fixed-size vector. `Ok(None)` means the text carries no
/// embeddable tokens.
pub trait Embedder {
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub const DEFAULT_EMBEDDING_DIM: usize = 64;

/// Deterministic feature-hashing embedder over lowercased tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashedEmbedder {
    dimensions: usize,
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIM,
        }
    }
}

impl HashedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Embedder for HashedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Ok(None);
        }

        let mut out = vec![0.0_f32; self.dimensions];
        for token in tokens {
            let hash = stable_hash(token.as_bytes());
            let idx = (hash as usize) % self.dimensions;
            let sign = if hash & 1 == 0 { 1.0_f32 } else { -1.0_f32 };
            let mag = 1.0_f32 + (token.chars().count() as f32 / 32.0_f32);
            out[idx] += sign * mag;
        }

        let norm = l2_norm(&out);
        if norm <= f32::EPSILON {
            return Ok(None);
        }
        for value in &mut out {
            *value /= norm;
        }
        Ok(Some(out))
    }
}

/// Lowercased alphanumeric tokens, in order, duplicates kept.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Cosine similarity; zero when either side has no magnitude or the
/// dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let a_norm = l2_norm(a);
    let b_norm = l2_norm(b);
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot = a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    dot / (a_norm * b_norm)
}

pub fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

pub fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if let Ok(parsed) = serde_json::from_slice::<Vec<f32>>(blob) {
        return Some(parsed);
    }
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

fn stable_hash(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325_u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3_u64);
    }
    hash
}
