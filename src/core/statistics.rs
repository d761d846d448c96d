//! Wind speed comparison statistics between two co-located products.

use crate::dataset::AttrValue;
use crate::types::{ColocError, ColocResult};
use ndarray::{ArrayD, Zip};
use num_traits::Float;

/// Below this many common points, bias, deviation and correlation are reported as 0
pub const MIN_POINTS_FOR_STATISTICS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindStatistics {
    /// Cells where both wind speeds are finite
    pub counted_points: usize,
    /// Maximum of the element-wise sum of both wind speeds
    pub vmax_m_s: f64,
    pub bias: f64,
    pub standard_deviation: f64,
    pub correlation_coefficient: f64,
    pub scatter_index: f64,
}

impl WindStatistics {
    pub fn to_attrs(&self) -> Vec<(String, AttrValue)> {
        vec![
            ("vmax_m_s".to_string(), AttrValue::Float(self.vmax_m_s)),
            ("Bias".to_string(), AttrValue::Float(self.bias)),
            ("Standard deviation".to_string(), AttrValue::Float(self.standard_deviation)),
            ("scatter_index".to_string(), AttrValue::Float(self.scatter_index)),
            ("counted_points".to_string(), AttrValue::Int(self.counted_points as i64)),
            (
                "correlation_coefficient".to_string(),
                AttrValue::Float(self.correlation_coefficient),
            ),
        ]
    }
}

/// Arithmetic mean, NaN when empty
fn mean<T: Float>(values: &[T]) -> T {
    match T::from(values.len()) {
        Some(n) if !values.is_empty() => values.iter().fold(T::zero(), |acc, &v| acc + v) / n,
        _ => T::nan(),
    }
}

/// Population standard deviation
fn std_dev<T: Float>(values: &[T]) -> T {
    let m = mean(values);
    let squared: Vec<T> = values.iter().map(|&v| (v - m).powi(2)).collect();
    mean(&squared).sqrt()
}

fn pearson(pairs: &[(f64, f64)]) -> f64 {
    let xs: Vec<f64> = pairs.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = pairs.iter().map(|p| p.1).collect();
    let (mx, my) = (mean(&xs), mean(&ys));
    let (mut cov, mut vx, mut vy) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    let denominator = (vx * vy).sqrt();
    if denominator > 0.0 {
        cov / denominator
    } else {
        f64::NAN
    }
}

/// RMSE of the paired samples over the mean of every finite sample of both, in percent
pub fn scatter_index(first: &ArrayD<f64>, second: &ArrayD<f64>) -> f64 {
    let squared: Vec<f64> = first
        .iter()
        .zip(second.iter())
        .map(|(a, b)| (a - b).powi(2))
        .filter(|d| d.is_finite())
        .collect();
    let observed: Vec<f64> = first
        .iter()
        .chain(second.iter())
        .copied()
        .filter(|v| v.is_finite())
        .collect();
    mean(&squared).sqrt() / mean(&observed) * 100.0
}

/// Statistics over two co-registered wind speed arrays of identical shape
pub fn wind_statistics(first: &ArrayD<f64>, second: &ArrayD<f64>) -> ColocResult<WindStatistics> {
    if first.shape() != second.shape() {
        return Err(ColocError::Processing(format!(
            "wind speed arrays differ in shape: {:?} vs {:?}",
            first.shape(),
            second.shape()
        )));
    }

    let mut pairs = Vec::new();
    Zip::from(first).and(second).for_each(|&a, &b| {
        if (a + b).is_finite() {
            pairs.push((a, b));
        }
    });
    let counted_points = pairs.len();
    let vmax_m_s = pairs
        .iter()
        .map(|(a, b)| a + b)
        .fold(f64::NAN, f64::max);

    let (bias, standard_deviation, correlation_coefficient) = if counted_points > MIN_POINTS_FOR_STATISTICS {
        let differences: Vec<f64> = pairs.iter().map(|(a, b)| a - b).collect();
        (mean(&differences), std_dev(&differences), pearson(&pairs))
    } else {
        log::debug!(
            "Only {} common points, statistics below {} points are reported as 0",
            counted_points,
            MIN_POINTS_FOR_STATISTICS
        );
        (0.0, 0.0, 0.0)
    };

    Ok(WindStatistics {
        counted_points,
        vmax_m_s,
        bias,
        standard_deviation,
        correlation_coefficient,
        scatter_index: scatter_index(first, second),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    #[test]
    fn test_small_sample_policy() {
        let a = Array1::from_elem(80, 10.0).into_dyn();
        let b = Array1::from_elem(80, 8.0).into_dyn();
        let stats = wind_statistics(&a, &b).unwrap();
        assert_eq!(stats.counted_points, 80);
        assert_eq!(stats.bias, 0.0);
        assert_eq!(stats.standard_deviation, 0.0);
        assert_eq!(stats.correlation_coefficient, 0.0);
        assert_relative_eq!(stats.vmax_m_s, 18.0);
        // rmse 2 over mean 9
        assert_relative_eq!(stats.scatter_index, 2.0 / 9.0 * 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_large_sample_statistics() {
        let a: Vec<f64> = (0..200).map(|i| 5.0 + (i % 10) as f64).collect();
        let b: Vec<f64> = a.iter().map(|v| v - 1.0).collect();
        let mut a = Array1::from(a).into_dyn();
        a[[0]] = f64::NAN;
        let stats = wind_statistics(&a, &Array1::from(b).into_dyn()).unwrap();
        assert_eq!(stats.counted_points, 199);
        assert_relative_eq!(stats.bias, 1.0, epsilon = 1e-12);
        assert_relative_eq!(stats.standard_deviation, 0.0, epsilon = 1e-12);
        assert_relative_eq!(stats.correlation_coefficient, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let a = Array1::from_elem(3, 1.0).into_dyn();
        let b = Array1::from_elem(4, 1.0).into_dyn();
        assert!(wind_statistics(&a, &b).is_err());
    }
}
