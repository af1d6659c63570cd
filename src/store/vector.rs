//! Embedding blob packing and similarity.
//!
//! Vectors are stored in BLOB columns as little-endian packed `f32`; a
//! blob's length divided by four must equal the model dimension.

use crate::errors::{CoreError, CoreResult};

/// Pack a float vector into a little-endian byte blob.
pub fn pack(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len().saturating_mul(4));
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Unpack a little-endian byte blob into a float vector.
///
/// # Errors
///
/// Returns [`CoreError::Parse`] when the blob length is not a multiple of
/// four bytes.
pub fn unpack(blob: &[u8]) -> CoreResult<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(CoreError::Parse(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect())
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 (not NaN) for zero vectors or mismatched lengths.
// Accumulating in f64 keeps the narrowing f32 cast within precision.
#[allow(clippy::cast_possible_truncation)]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}
