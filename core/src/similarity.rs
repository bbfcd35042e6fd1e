use std::collections::HashMap;

use sha2::{Digest, Sha256};

/// Cosine similarity in [-1, 1]. Vectors of different length, empty vectors
/// and zero vectors have no direction and score 0.0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, sq_a, sq_b) = a
        .iter()
        .zip(b)
        .fold((0.0, 0.0, 0.0), |(dot, sq_a, sq_b), (x, y)| {
            (dot + x * y, sq_a + x * x, sq_b + y * y)
        });
    let denominator = (sq_a * sq_b).sqrt();
    if denominator == 0.0 {
        return 0.0;
    }
    (dot / denominator).clamp(-1.0, 1.0)
}

/// Decode an embedding stored as a JSON number array. A non-array or any
/// non-numeric element yields an empty vector.
pub fn parse_embedding(value: &serde_json::Value) -> Vec<f64> {
    value
        .as_array()
        .and_then(|items| items.iter().map(serde_json::Value::as_f64).collect())
        .unwrap_or_default()
}

/// Lowercased word tokens; anything other than letters, digits and `_`
/// separates words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Bucket and sign for one token in a `dimensions`-wide feature space.
fn feature_slot(token: &str, dimensions: usize) -> (usize, f64) {
    let digest = Sha256::digest(token.as_bytes());
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    let bucket = (u64::from_le_bytes(word) % dimensions as u64) as usize;
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    (bucket, sign)
}

/// Local embedding by signed feature hashing with sublinear term weights,
/// L2-normalized. Used when no embedding provider is configured.
pub fn hashing_embedding(text: &str, dimensions: usize) -> Vec<f64> {
    let mut embedding = vec![0.0_f64; dimensions];
    if dimensions == 0 {
        return embedding;
    }

    let mut term_counts: HashMap<String, u32> = HashMap::new();
    for token in tokenize(text) {
        *term_counts.entry(token).or_default() += 1;
    }

    for (token, count) in &term_counts {
        let (bucket, sign) = feature_slot(token, dimensions);
        embedding[bucket] += sign * (1.0 + f64::from(*count).ln());
    }

    let norm = embedding.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        embedding.iter_mut().for_each(|v| *v /= norm);
    }
    embedding
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_is_symmetric() {
        let a = [0.3, -1.2, 4.0, 0.0];
        let b = [1.0, 0.5, -0.25, 2.0];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn self_similarity_is_one_for_non_zero_vectors() {
        for v in [vec![1.0, 2.0, 3.0], vec![-0.5, 0.0, 1e-3], vec![42.0]] {
            assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn opposite_vectors_score_minus_one() {
        assert!((cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn parse_embedding_rejects_non_numeric_items() {
        assert_eq!(parse_embedding(&serde_json::json!([0.5, 1, -2.5])), vec![0.5, 1.0, -2.5]);
        assert!(parse_embedding(&serde_json::json!([0.5, "x"])).is_empty());
        assert!(parse_embedding(&serde_json::json!({"v": 1})).is_empty());
    }

    #[test]
    fn hashing_embedding_is_deterministic_and_normalized() {
        let a = hashing_embedding("Comparison catastrophe spiral", 64);
        let b = hashing_embedding("Comparison catastrophe spiral", 64);
        assert_eq!(a, b);

        let norm = a.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
        assert!(hashing_embedding("", 64).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn tokenize_splits_on_punctuation() {
        assert_eq!(tokenize("Past-prison, fear!"), vec!["past", "prison", "fear"]);
    }
}
