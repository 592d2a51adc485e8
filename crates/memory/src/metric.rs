//! Distance metrics. All scores are distances: lower means closer, so a
//! single ascending sort orders every metric best-first (dot product is
//! negated to fit).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    SquaredEuclidean,
    DotProduct,
    Manhattan,
    /// Components are treated as set membership (non-zero = present),
    /// matching binary/sparse embeddings.
    Hamming,
    /// Same membership interpretation as `Hamming`.
    Jaccard,
}

impl DistanceMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::SquaredEuclidean => "squared-euclidean",
            Self::DotProduct => "dot-product",
            Self::Manhattan => "manhattan",
            Self::Hamming => "hamming",
            Self::Jaccard => "jaccard",
        }
    }

    /// Distance between two vectors under this metric (lower = closer).
    /// Shorter vectors are padded with zeros.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => {
                let dot = dot(a, b);
                let norms = norm(a) * norm(b);
                if norms == 0.0 { 1.0 } else { 1.0 - dot / norms }
            },
            Self::Euclidean => Self::SquaredEuclidean.distance(a, b).sqrt(),
            Self::SquaredEuclidean => {
                zipped(a, b).map(|(x, y)| (x - y) * (x - y)).sum()
            },
            Self::DotProduct => -dot(a, b),
            Self::Manhattan => zipped(a, b).map(|(x, y)| (x - y).abs()).sum(),
            Self::Hamming => zipped(a, b)
                .filter(|(x, y)| (*x != 0.0) != (*y != 0.0))
                .count() as f32,
            Self::Jaccard => {
                let mut inter = 0usize;
                let mut union = 0usize;
                for (x, y) in zipped(a, b) {
                    let (xs, ys) = (x != 0.0, y != 0.0);
                    if xs && ys {
                        inter += 1;
                    }
                    if xs || ys {
                        union += 1;
                    }
                }
                if union == 0 {
                    0.0
                } else {
                    1.0 - inter as f32 / union as f32
                }
            },
        }
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = orac_common::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            "squared-euclidean" => Ok(Self::SquaredEuclidean),
            "dot-product" => Ok(Self::DotProduct),
            "manhattan" => Ok(Self::Manhattan),
            "hamming" => Ok(Self::Hamming),
            "jaccard" => Ok(Self::Jaccard),
            other => Err(orac_common::EngineError::InvalidInput(format!(
                "unknown distance metric: {other}"
            ))),
        }
    }
}

/// Zip two slices, zero-padding the shorter one.
fn zipped<'a>(a: &'a [f32], b: &'a [f32]) -> impl Iterator<Item = (f32, f32)> + 'a {
    let len = a.len().max(b.len());
    (0..len).map(|i| {
        (
            a.get(i).copied().unwrap_or(0.0),
            b.get(i).copied().unwrap_or(0.0),
        )
    })
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    zipped(a, b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    a.iter().map(|x| x * x).sum::<f32>().sqrt()
}
