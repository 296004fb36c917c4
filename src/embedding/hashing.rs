//! Deterministic offline embeddings via feature hashing.
//!
//! Each lowercase word contributes a weighted feature for itself and one
//! for every boundary-marked character trigram, so "greeting" and "greeted"
//! share most of their mass. Features are hashed (FNV-1a) into a fixed
//! number of buckets with a hash-derived sign, and the result is
//! L2-normalized. Text with no alphanumeric content embeds to the zero
//! vector, which the index refuses.

use anyhow::Result;

use super::{l2_normalize, EmbeddingProvider};

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            model_id: format!("hashing-v1-{dimensions}"),
        }
    }

    fn add(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let bucket = (h % self.dimensions as u64) as usize;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign * weight;
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dimensions];
        let lower = text.to_lowercase();
        for word in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.add(&mut v, word.as_bytes(), WORD_WEIGHT);

            let marked: Vec<char> = std::iter::once('^')
                .chain(word.chars())
                .chain(std::iter::once('$'))
                .collect();
            for tri in marked.windows(3) {
                let s: String = tri.iter().collect();
                self.add(&mut v, s.as_bytes(), TRIGRAM_WEIGHT);
            }
        }
        l2_normalize(&mut v);
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn deterministic_and_normalized() {
        let e = HashingEmbedder::new(64);
        let a = e.embed("Hello, world").unwrap();
        let b = e.embed("hello world").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_stems_are_closer_than_unrelated_words() {
        let e = HashingEmbedder::new(256);
        let greeting = e.embed("greeting").unwrap();
        let greeted = e.embed("greeted the user").unwrap();
        let weather = e.embed("rain tomorrow afternoon").unwrap();
        assert!(cosine(&greeting, &greeted) > cosine(&greeting, &weather));
    }

    #[test]
    fn punctuation_only_is_zero() {
        let e = HashingEmbedder::new(16);
        assert!(e.embed("?!  ...").unwrap().iter().all(|x| *x == 0.0));
    }

    #[test]
    fn model_id_includes_dimensions() {
        assert_eq!(HashingEmbedder::new(128).model_id(), "hashing-v1-128");
    }
}
