//! Gaussian kernel density estimation for bias distributions
//!
//! Curves are evaluated on a fixed grid of [`GRID_POINTS`] points spanning
//! the sample range padded by 10% on each side. Evaluation is lazy: a
//! [`KdeCurve`] borrows the samples and computes each point on demand, so it
//! can be cloned and restarted freely.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use thiserror::Error;

/// Number of evaluation points per curve
pub const GRID_POINTS: usize = 100;

/// Default kernel bandwidth
pub const DEFAULT_BANDWIDTH: f64 = 0.1;

/// Fraction of the sample range added on each side of the grid
const PADDING: f64 = 0.1;

/// Span substituted when every sample has the same value
pub const DEGENERATE_RANGE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum KdeError {
    #[error("Bandwidth must be a positive finite number, got {0}")]
    InvalidBandwidth(f64),
}

/// Density estimator with a fixed bandwidth
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kde {
    bandwidth: f64,
}

impl Default for Kde {
    fn default() -> Self {
        Self {
            bandwidth: DEFAULT_BANDWIDTH,
        }
    }
}

impl Kde {
    pub fn new(bandwidth: f64) -> Result<Self, KdeError> {
        if !(bandwidth.is_finite() && bandwidth > 0.0) {
            return Err(KdeError::InvalidBandwidth(bandwidth));
        }
        Ok(Self { bandwidth })
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Density curve for one sample set
    ///
    /// Non-finite samples are ignored. An empty set yields a flat zero curve
    /// around the origin.
    pub fn curve<'a>(&self, samples: &'a [f64]) -> KdeCurve<'a> {
        let (count, min, max) = samples
            .iter()
            .filter(|s| s.is_finite())
            .fold((0usize, f64::INFINITY, f64::NEG_INFINITY), |(n, lo, hi), &s| {
                (n + 1, lo.min(s), hi.max(s))
            });

        let (lo, hi) = if count == 0 {
            (-DEGENERATE_RANGE / 2.0, DEGENERATE_RANGE / 2.0)
        } else if max > min {
            // Split the padding so spreads near f64::MAX stay finite
            let pad = PADDING * max - PADDING * min;
            ((min - pad).max(f64::MIN), (max + pad).min(f64::MAX))
        } else {
            (min - DEGENERATE_RANGE / 2.0, max + DEGENERATE_RANGE / 2.0)
        };

        let norm = if count == 0 {
            0.0
        } else {
            1.0 / (count as f64 * self.bandwidth * (2.0 * PI).sqrt())
        };

        KdeCurve {
            samples,
            bandwidth: self.bandwidth,
            norm,
            lo,
            hi,
            next: 0,
        }
    }

    /// One curve per category, each independent of the others
    pub fn curves<'a, K: Ord + Clone>(
        &self,
        categories: &'a BTreeMap<K, Vec<f64>>,
    ) -> BTreeMap<K, KdeCurve<'a>> {
        categories
            .iter()
            .map(|(key, samples)| (key.clone(), self.curve(samples)))
            .collect()
    }
}

/// Lazy sequence of `(x, density)` points
#[derive(Debug, Clone)]
pub struct KdeCurve<'a> {
    samples: &'a [f64],
    bandwidth: f64,
    norm: f64,
    lo: f64,
    hi: f64,
    next: usize,
}

impl KdeCurve<'_> {
    /// Left end of the evaluation grid
    pub fn start(&self) -> f64 {
        self.lo
    }

    /// Right end of the evaluation grid
    pub fn end(&self) -> f64 {
        self.hi
    }

    /// Grid point `i`, interpolated so wide grids never overflow
    fn grid_x(&self, i: usize) -> f64 {
        let t = i as f64 / (GRID_POINTS - 1) as f64;
        self.lo * (1.0 - t) + self.hi * t
    }

    pub fn density_at(&self, x: f64) -> f64 {
        let h = self.bandwidth;
        let sum: f64 = self
            .samples
            .iter()
            .filter(|s| s.is_finite())
            .map(|s| {
                let z = (x - s) / h;
                (-0.5 * z * z).exp()
            })
            .sum();
        sum * self.norm
    }
}

impl Iterator for KdeCurve<'_> {
    type Item = (f64, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= GRID_POINTS {
            return None;
        }
        let x = self.grid_x(self.next);
        self.next += 1;
        Some((x, self.density_at(x)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = GRID_POINTS.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for KdeCurve<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    /// Trapezoidal integral over the curve's own grid
    fn integrate(curve: KdeCurve<'_>) -> f64 {
        let points: Vec<(f64, f64)> = curve.collect();
        points
            .windows(2)
            .map(|w| (w[1].0 - w[0].0) * (w[0].1 + w[1].1) / 2.0)
            .sum()
    }

    #[test]
    fn test_rejects_bad_bandwidth() {
        assert!(Kde::new(0.0).is_err());
        assert!(Kde::new(-1.0).is_err());
        assert!(Kde::new(f64::NAN).is_err());
        assert_eq!(Kde::new(0.5).unwrap().bandwidth(), 0.5);
    }

    #[test]
    fn test_unimodal_set_integrates_to_one() {
        // Triangular histogram centered at 0 with spacing 0.05
        let mut samples = Vec::new();
        for i in -10i32..=10 {
            let copies = 11 - i.abs();
            for _ in 0..copies {
                samples.push(i as f64 * 0.05);
            }
        }

        let kde = Kde::new(0.1).unwrap();
        let area = integrate(kde.curve(&samples));
        assert!((area - 1.0).abs() < 0.1, "area was {area}");
    }

    #[test]
    fn test_single_sample_is_centered_peak() {
        let samples = [3.0];
        let curve = Kde::default().curve(&samples);
        assert_eq!(curve.len(), GRID_POINTS);
        assert!(curve.start() < 3.0 && curve.end() > 3.0);

        let points: Vec<(f64, f64)> = curve.collect();
        let (peak, _) = points
            .iter()
            .enumerate()
            .max_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
            .unwrap();
        assert!((points[peak].0 - 3.0).abs() < 0.02);

        // Rises to the peak, falls after it
        for w in points[..=peak].windows(2) {
            assert!(w[1].1 >= w[0].1);
        }
        for w in points[peak..].windows(2) {
            assert!(w[1].1 <= w[0].1);
        }
    }

    #[test]
    fn test_equal_samples_are_finite() {
        let samples = [-7.0; 4];
        let points: Vec<(f64, f64)> = Kde::default().curve(&samples).collect();
        assert_eq!(points.len(), GRID_POINTS);
        assert!(points.iter().all(|(x, d)| x.is_finite() && d.is_finite()));
        assert!(points.iter().any(|(_, d)| *d > 0.0));
    }

    #[test]
    fn test_extreme_spread_stays_finite() {
        let samples = [-1e308, 1e308];
        let curve = Kde::default().curve(&samples);
        assert!(curve.start() <= -1e308 && curve.end() >= 1e308);

        let points: Vec<(f64, f64)> = curve.collect();
        assert_eq!(points.len(), GRID_POINTS);
        assert!(points.iter().all(|(x, d)| x.is_finite() && d.is_finite()));
        assert!(points.windows(2).all(|w| w[1].0 > w[0].0));
    }

    #[test]
    fn test_empty_samples_give_flat_curve() {
        let points: Vec<(f64, f64)> = Kde::default().curve(&[]).collect();
        assert_eq!(points.len(), GRID_POINTS);
        assert!(points.iter().all(|(_, d)| *d == 0.0));
    }

    #[test]
    fn test_curve_is_restartable_and_does_not_mutate_input() {
        let samples = vec![0.3, -0.1, 0.8];
        let kde = Kde::default();
        let curve = kde.curve(&samples);
        let first: Vec<_> = curve.clone().collect();
        let second: Vec<_> = curve.collect();
        assert_eq!(first, second);
        assert_eq!(samples, vec![0.3, -0.1, 0.8]);
    }

    #[test]
    fn test_grid_spans_padded_range() {
        let samples = [0.0, 10.0];
        let curve = Kde::default().curve(&samples);
        assert!((curve.start() + 1.0).abs() < 1e-9);
        assert!((curve.end() - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_categories_are_independent() {
        let mut categories = BTreeMap::new();
        categories.insert("spelling", vec![-5.0, -7.0, -9.0]);
        categories.insert("pio", vec![1.0]);
        let curves = Kde::default().curves(&categories);
        assert_eq!(curves.len(), 2);
        assert!(curves["pio"].start() < 1.0);
        assert!(curves["spelling"].start() < -9.0);
    }
}
