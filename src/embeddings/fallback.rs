//! Deterministic token-hash embedding.
//!
//! Used only when the embedding service cannot answer. The vectors are not
//! semantically meaningful beyond shared vocabulary and have a different
//! dimension from model embeddings, so they are always tagged as fallback.

/// Hash a token into a bucket index using FNV-1a
fn bucket(token: &str, dimension: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % dimension as u64) as usize
}

/// Build a unit-length bag-of-tokens vector of the given dimension.
///
/// Text without any alphanumeric token maps to the zero vector.
#[inline]
pub fn fallback_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dimension = dimension.max(1);
    let mut vector = vec![0.0f32; dimension];

    let lowered = text.to_lowercase();
    for token in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let index = bucket(token, dimension);
        vector[index] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}
