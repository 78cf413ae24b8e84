//! Embedding capability and similarity math.
//!
//! Convergence detection and flip detection both reduce to "embed these
//! texts, compare with cosine". The [`Embedder`] trait is the seam; the
//! production implementation wraps the provider-backed
//! [`EmbeddingRouter`], and when no embedding backend is configured the
//! engine degrades to the deterministic [`LexicalEmbedder`] instead of
//! disabling similarity features.

use ag_domain::error::Result;
use ag_providers::embeddings::EmbeddingRouter;

/// Batch embedding capability.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[async_trait::async_trait]
impl Embedder for EmbeddingRouter {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        EmbeddingRouter::embed(self, texts).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lexical fallback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const LEXICAL_DIM: usize = 256;

/// Hashed bag-of-words embedder: deterministic, offline, cosine-compatible.
///
/// Far weaker than a real embedding model, but preserves the property the
/// engine needs — near-identical texts score near 1.0, disjoint texts near
/// 0.0 — so convergence and flip thresholds keep their meaning.
pub struct LexicalEmbedder;

impl LexicalEmbedder {
    pub fn embed_one(text: &str) -> Vec<f32> {
        let mut v = vec![0f32; LEXICAL_DIM];
        for token in tokenize(text) {
            let h = hash_token(&token) as usize % LEXICAL_DIM;
            v[h] += 1.0;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait::async_trait]
impl Embedder for LexicalEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::embed_one(t)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(|w| w.to_lowercase())
}

/// Knuth multiplicative hash.
fn hash_token(token: &str) -> u32 {
    let mut h: u32 = 0;
    for b in token.bytes() {
        h = h.wrapping_mul(31).wrapping_add(b as u32);
    }
    h.wrapping_mul(2654435761)
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Similarity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cosine similarity clamped to [0, 1]. Mismatched or empty vectors score 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0f64;
    let mut na = 0f64;
    let mut nb = 0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        na += (*x as f64) * (*x as f64);
        nb += (*y as f64) * (*y as f64);
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 1.0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_score_one() {
        let a = LexicalEmbedder::embed_one("use a bigger cache for reads");
        let b = LexicalEmbedder::embed_one("use a bigger cache for reads");
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_texts_score_low() {
        let a = LexicalEmbedder::embed_one("prefer microservices architecture");
        let b = LexicalEmbedder::embed_one("tune garbage collector pauses");
        assert!(cosine(&a, &b) < 0.3);
    }

    #[test]
    fn overlapping_texts_score_between() {
        let a = LexicalEmbedder::embed_one("cache size one megabyte is best");
        let b = LexicalEmbedder::embed_one("cache size one megabyte is best assuming workload");
        let sim = cosine(&a, &b);
        assert!(sim > 0.7 && sim < 1.0);
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn embedding_is_normalized() {
        let v = LexicalEmbedder::embed_one("a handful of words to embed");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn batch_embed_matches_single() {
        let texts = vec!["first text".to_string(), "second text".to_string()];
        let batch = LexicalEmbedder.embed(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], LexicalEmbedder::embed_one("first text"));
    }
}
