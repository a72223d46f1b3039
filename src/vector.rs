use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::{Type, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Distance {
    Euclidean,
    Manhattan,
    Cosine,
    Hamming,
    Jaccard,
}

impl Distance {
    pub fn name(&self) -> &'static str {
        match self {
            Distance::Euclidean => "EUCLIDEAN",
            Distance::Manhattan => "MANHATTAN",
            Distance::Cosine => "COSINE",
            Distance::Hamming => "HAMMING",
            Distance::Jaccard => "JACCARD",
        }
    }

    /// Whether this metric is defined over vectors of type `ty`.
    pub fn supports(&self, ty: &Type) -> bool {
        match ty {
            Type::BooleanVector(_) => matches!(self, Distance::Hamming | Distance::Jaccard),
            Type::IntVector(_) | Type::LongVector(_) | Type::FloatVector(_) | Type::DoubleVector(_) => {
                !matches!(self, Distance::Jaccard)
            }
            _ => false,
        }
    }

    /// Distance between two vector values of the same kind and length. LOWER is ALWAYS closer.
    pub fn between(&self, a: &Value, b: &Value) -> Result<f64> {
        let (ta, tb) = (a.value_type(), b.value_type());
        if std::mem::discriminant(&ta) != std::mem::discriminant(&tb) || ta.dimensions() != tb.dimensions() {
            return Err(Error::TypeMismatch {
                attribute: "vector".to_string(),
                expected: ta.to_string(),
                found: tb.to_string(),
            });
        }
        if !self.supports(&ta) {
            return Err(Error::Unsupported(format!("{} distance on {}", self.name(), ta)));
        }
        match (a, b) {
            (Value::BooleanVector(x), Value::BooleanVector(y)) => Ok(self.binary(x, y)),
            _ => match (a.numeric_vector(), b.numeric_vector()) {
                (Some(x), Some(y)) => Ok(self.numeric(&x, &y)),
                _ => Err(Error::Unsupported(format!("{} distance on {}", self.name(), ta))),
            },
        }
    }

    /// Numeric kernels. Euclidean is the true (rooted) distance.
    ///
    /// Unrolling 8 lanes lets LLVM keep the accumulators in vector registers.
    #[inline(always)]
    pub fn numeric(&self, a: &[f64], b: &[f64]) -> f64 {
        let remainder_start = a.len() - a.len() % 8;
        match self {
            Distance::Euclidean => {
                let mut sum = 0.0;
                for (ac, bc) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
                    let d0 = ac[0] - bc[0];
                    let d1 = ac[1] - bc[1];
                    let d2 = ac[2] - bc[2];
                    let d3 = ac[3] - bc[3];
                    let d4 = ac[4] - bc[4];
                    let d5 = ac[5] - bc[5];
                    let d6 = ac[6] - bc[6];
                    let d7 = ac[7] - bc[7];
                    sum += d0 * d0 + d1 * d1 + d2 * d2 + d3 * d3 + d4 * d4 + d5 * d5 + d6 * d6 + d7 * d7;
                }
                for i in remainder_start..a.len() {
                    let diff = a[i] - b[i];
                    sum += diff * diff;
                }
                sum.sqrt()
            }
            Distance::Manhattan => {
                let mut sum = 0.0;
                for (ac, bc) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
                    sum += (ac[0] - bc[0]).abs() + (ac[1] - bc[1]).abs()
                        + (ac[2] - bc[2]).abs() + (ac[3] - bc[3]).abs()
                        + (ac[4] - bc[4]).abs() + (ac[5] - bc[5]).abs()
                        + (ac[6] - bc[6]).abs() + (ac[7] - bc[7]).abs();
                }
                for i in remainder_start..a.len() {
                    sum += (a[i] - b[i]).abs();
                }
                sum
            }
            Distance::Cosine => {
                let mut dot = 0.0;
                let mut norm_a = 0.0;
                let mut norm_b = 0.0;
                for (ac, bc) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
                    for i in 0..8 {
                        dot += ac[i] * bc[i];
                        norm_a += ac[i] * ac[i];
                        norm_b += bc[i] * bc[i];
                    }
                }
                for i in remainder_start..a.len() {
                    dot += a[i] * b[i];
                    norm_a += a[i] * a[i];
                    norm_b += b[i] * b[i];
                }
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                1.0 - (dot / (norm_a.sqrt() * norm_b.sqrt()))
            }
            Distance::Hamming => a.iter().zip(b).filter(|(x, y)| x != y).count() as f64,
            Distance::Jaccard => f64::NAN,
        }
    }

    /// Bit-vector kernels.
    pub fn binary(&self, a: &[bool], b: &[bool]) -> f64 {
        match self {
            Distance::Hamming => a.iter().zip(b).filter(|(x, y)| x != y).count() as f64,
            Distance::Jaccard => {
                let (mut both, mut either) = (0usize, 0usize);
                for (x, y) in a.iter().zip(b) {
                    both += (*x && *y) as usize;
                    either += (*x || *y) as usize;
                }
                if either == 0 {
                    return 0.0;
                }
                1.0 - both as f64 / either as f64
            }
            _ => f64::NAN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fv(v: &[f32]) -> Value {
        Value::FloatVector(v.to_vec())
    }

    #[test]
    fn test_euclidean_is_rooted() {
        let q = fv(&[1.0, 0.0, 0.0]);
        assert_eq!(Distance::Euclidean.between(&q, &fv(&[1.0, 0.0, 0.0])).unwrap(), 0.0);
        assert_eq!(Distance::Euclidean.between(&q, &fv(&[0.0, 0.0, 0.0])).unwrap(), 1.0);
        let d = Distance::Euclidean.between(&q, &fv(&[0.0, 1.0, 0.0])).unwrap();
        assert!((d - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_unrolled_path_matches_remainder_path() {
        let a: Vec<f64> = (0..19).map(|i| i as f64 * 0.5).collect();
        let b: Vec<f64> = (0..19).map(|i| (19 - i) as f64 * 0.25).collect();
        let naive: f64 = a.iter().zip(&b).map(|(x, y)| (x - y).abs()).sum();
        assert!((Distance::Manhattan.numeric(&a, &b) - naive).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_of_zero_vector() {
        let d = Distance::Cosine.between(&fv(&[0.0, 0.0]), &fv(&[1.0, 1.0])).unwrap();
        assert_eq!(d, 1.0);
    }

    #[test]
    fn test_bit_metrics() {
        let a = Value::BooleanVector(vec![true, true, false, false]);
        let b = Value::BooleanVector(vec![true, false, true, false]);
        assert_eq!(Distance::Hamming.between(&a, &b).unwrap(), 2.0);
        let j = Distance::Jaccard.between(&a, &b).unwrap();
        assert!((j - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_unsupported_metric_is_an_error() {
        let a = Value::BooleanVector(vec![true]);
        assert!(matches!(Distance::Cosine.between(&a, &a), Err(Error::Unsupported(_))));
        assert!(matches!(
            Distance::Jaccard.between(&fv(&[1.0]), &fv(&[1.0])),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_mismatched_lengths() {
        assert!(Distance::Euclidean.between(&fv(&[1.0]), &fv(&[1.0, 2.0])).is_err());
    }

    proptest! {
        #[test]
        fn prop_metrics_are_symmetric_and_non_negative(
            pair in (1usize..24).prop_flat_map(|n| (
                prop::collection::vec(-100.0f32..100.0, n),
                prop::collection::vec(-100.0f32..100.0, n),
            ))
        ) {
            let (a, b) = (fv(&pair.0), fv(&pair.1));
            for metric in [Distance::Euclidean, Distance::Manhattan, Distance::Hamming] {
                let ab = metric.between(&a, &b).unwrap();
                let ba = metric.between(&b, &a).unwrap();
                prop_assert!(ab >= 0.0);
                prop_assert!((ab - ba).abs() < 1e-9);
            }
            prop_assert_eq!(Distance::Euclidean.between(&a, &a).unwrap(), 0.0);
        }
    }
}
