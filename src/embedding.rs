// houndb - embedding.rs
// Vector normalization, similarity metrics, embedder seam and vector parsing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{HoundError, Result};

/// Supported similarity metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity (vectors are normalized inside the index → dot product)
    Cosine,
    /// Euclidean (L2) distance (lower = closer)
    Euclidean,
    /// Raw dot product (higher = closer)
    #[serde(rename = "dot")]
    DotProduct,
}

impl Metric {
    /// Transform a vector into the form the index compares.
    /// Cosine normalizes; the other metrics use the raw vector.
    pub fn prepare(&self, v: &[f32]) -> Vec<f32> {
        match self {
            Metric::Cosine => normalize(v),
            Metric::Euclidean | Metric::DotProduct => v.to_vec(),
        }
    }

    /// Distance between two prepared vectors: lower = closer.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => 1.0 - dot(a, b),
            Metric::Euclidean => euclidean_distance(a, b),
            Metric::DotProduct => -dot(a, b),
        }
    }

    /// Convert a distance back into a similarity score: higher = better match.
    pub fn similarity(&self, distance: f32) -> f32 {
        match self {
            Metric::Cosine => 1.0 - distance,
            Metric::Euclidean => 1.0 / (1.0 + distance),
            Metric::DotProduct => -distance,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::DotProduct => "dot",
        };
        f.pad(name)
    }
}

impl FromStr for Metric {
    type Err = HoundError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "dot" | "dotproduct" => Ok(Metric::DotProduct),
            other => Err(HoundError::ConfigError(format!(
                "unknown metric '{other}' (expected cosine | euclidean | dot)"
            ))),
        }
    }
}

// ── Normalization ─────────────────────────────────────────────────────────────

/// L2-normalize a vector (in-place copy). Returns a unit vector.
/// If the vector is all-zero, it is returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let mag = magnitude(v);
    if mag < 1e-10 {
        return v.to_vec();
    }
    v.iter().map(|x| x / mag).collect()
}

/// Compute the L2 (Euclidean) magnitude (norm) of a vector.
#[inline]
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

// ── Similarity / Distance ─────────────────────────────────────────────────────

/// Dot product of two equal-length vectors.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity between two raw vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let na = normalize(a);
    let nb = normalize(b);
    dot(&na, &nb).clamp(-1.0, 1.0)
}

/// Squared Euclidean distance (cheaper, avoids sqrt when only ranking).
pub fn euclidean_distance_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Euclidean distance.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    euclidean_distance_sq(a, b).sqrt()
}

// ── Embedder ──────────────────────────────────────────────────────────────────

/// External capability turning raw input (an image, usually) into a vector.
///
/// The store never decodes or embeds anything itself; front ends supply an
/// implementation and hand the resulting vector to a query or insert.
pub trait Embedder: Send + Sync {
    /// Output dimensionality; must match the target collection's `vector_dim`.
    fn dim(&self) -> usize;

    fn embed(&self, input: &[u8]) -> Result<Vec<f32>>;
}

/// Deterministic stand-in for a vision model: signed feature hashing of byte
/// trigrams, normalized. Inputs sharing byte runs land close together.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Embedder for HashingEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, input: &[u8]) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dim];
        let width = input.len().min(3);
        if width == 0 {
            return Ok(v);
        }
        for gram in input.windows(width) {
            // FNV-1a
            let h = gram.iter().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
                (h ^ *b as u64).wrapping_mul(0x0100_0000_01b3)
            });
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[(h % self.dim as u64) as usize] += sign;
        }
        Ok(normalize(&v))
    }
}

/// Embedder for callers that already hold a vector: the input is its JSON
/// array or whitespace/comma separated text form.
#[derive(Debug, Clone, Copy)]
pub struct ParsedEmbedder {
    dim: usize,
}

impl ParsedEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Embedder for ParsedEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, input: &[u8]) -> Result<Vec<f32>> {
        let text = std::str::from_utf8(input)
            .map_err(|e| HoundError::Serialization(format!("vector is not UTF-8: {e}")))?;
        let v = parse_json_embedding(text)
            .or_else(|| parse_text_embedding(text))
            .ok_or_else(|| HoundError::Serialization(format!("cannot parse vector from {text:?}")))?;
        if v.len() != self.dim {
            return Err(HoundError::DimensionMismatch {
                expected: self.dim,
                got: v.len(),
            });
        }
        Ok(v)
    }
}

// ── Vector Parsing ────────────────────────────────────────────────────────────

/// Parse a JSON array of floats into a Vec<f32>.
///
/// Returns `None` if parsing fails or the array is empty.
pub fn parse_json_embedding(json: &str) -> Option<Vec<f32>> {
    let v: Vec<f32> = serde_json::from_str(json.trim()).ok()?;
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

/// Parse a whitespace- or comma-separated string of floats.
pub fn parse_text_embedding(text: &str) -> Option<Vec<f32>> {
    let v: Option<Vec<f32>> = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f32>().ok())
        .collect();
    let v = v?;
    if v.is_empty() { None } else { Some(v) }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
