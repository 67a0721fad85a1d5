//! Fixed-width histograms and bin-by-bin efficiencies.

use trackeff_core::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One-dimensional histogram with uniform bins over `[low, high)`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Histogram1D {
    low: f64,
    high: f64,
    counts: Vec<f64>,
    underflow: f64,
    overflow: f64,
}

impl Histogram1D {
    /// Creates an empty histogram.
    ///
    /// # Errors
    /// Returns `ConfigError` for zero bins or an empty or non-finite range.
    pub fn new(bins: usize, low: f64, high: f64) -> Result<Self> {
        if bins == 0 {
            return Err(Error::ConfigError("histogram needs at least one bin".into()));
        }
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(Error::ConfigError(format!(
                "invalid histogram range [{low}, {high})"
            )));
        }
        Ok(Self {
            low,
            high,
            counts: vec![0.0; bins],
            underflow: 0.0,
            overflow: 0.0,
        })
    }

    /// Number of regular bins.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    /// Lower edge of the first bin.
    #[must_use]
    pub fn low(&self) -> f64 {
        self.low
    }

    /// Upper edge of the last bin.
    #[must_use]
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Width of each bin.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bin_width(&self) -> f64 {
        (self.high - self.low) / self.counts.len() as f64
    }

    /// Center of bin `i`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bin_center(&self, i: usize) -> f64 {
        self.low + (i as f64 + 0.5) * self.bin_width()
    }

    /// Bin index for a value, or `None` outside the range (or NaN).
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn find_bin(&self, x: f64) -> Option<usize> {
        if !(x >= self.low && x < self.high) {
            return None;
        }
        let bin = ((x - self.low) / (self.high - self.low) * self.counts.len() as f64) as usize;
        Some(bin.min(self.counts.len() - 1))
    }

    /// Adds one entry.
    pub fn fill(&mut self, x: f64) {
        match self.find_bin(x) {
            Some(bin) => self.counts[bin] += 1.0,
            None if x < self.low => self.underflow += 1.0,
            None if x >= self.high => self.overflow += 1.0,
            None => {}
        }
    }

    /// Content of every regular bin.
    #[must_use]
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// Entries below the range.
    #[must_use]
    pub fn underflow(&self) -> f64 {
        self.underflow
    }

    /// Entries at or above the range.
    #[must_use]
    pub fn overflow(&self) -> f64 {
        self.overflow
    }

    /// Sum of the regular bins.
    #[must_use]
    pub fn integral(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Returns true if both histograms have the same binning.
    #[must_use]
    pub fn same_binning(&self, other: &Self) -> bool {
        self.counts.len() == other.counts.len()
            && (self.low - other.low).abs() <= f64::EPSILON
            && (self.high - other.high).abs() <= f64::EPSILON
    }

    /// Adds the contents of another histogram with the same binning.
    ///
    /// # Errors
    /// Returns `ConfigError` if the binnings differ.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if !self.same_binning(other) {
            return Err(Error::ConfigError("cannot merge histograms with different binning".into()));
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        Ok(())
    }
}

/// Per-bin uncertainty model for an efficiency ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorModel {
    /// `sqrt(e * (1 - e) / d)`.
    #[default]
    Binomial,
    /// `sqrt(n) / d`, treating the denominator as exact.
    Poisson,
}

/// Bin-by-bin ratio of a passing histogram over a total histogram.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EfficiencyHistogram {
    low: f64,
    high: f64,
    values: Vec<f64>,
    errors: Vec<f64>,
}

impl EfficiencyHistogram {
    /// Divides `passed` by `total`. Bins with an empty denominator get
    /// efficiency and error zero.
    ///
    /// # Errors
    /// Returns `ConfigError` if the binnings differ.
    pub fn divide(passed: &Histogram1D, total: &Histogram1D, model: ErrorModel) -> Result<Self> {
        if !passed.same_binning(total) {
            return Err(Error::ConfigError("cannot divide histograms with different binning".into()));
        }
        let (values, errors) = passed
            .counts()
            .iter()
            .zip(total.counts())
            .map(|(&n, &d)| {
                if d <= 0.0 {
                    return (0.0, 0.0);
                }
                let e = n / d;
                let err = match model {
                    ErrorModel::Binomial => (e * (1.0 - e) / d).abs().sqrt(),
                    ErrorModel::Poisson => n.sqrt() / d,
                };
                (e, err)
            })
            .unzip();
        Ok(Self {
            low: passed.low(),
            high: passed.high(),
            values,
            errors,
        })
    }

    /// Efficiency per bin.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Uncertainty per bin.
    #[must_use]
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// Bin edges as `(low, high)`.
    #[must_use]
    pub fn range(&self) -> (f64, f64) {
        (self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fill_and_edges() {
        let mut h = Histogram1D::new(4, 0.0, 2.0).unwrap();
        for x in [-1.0, 0.0, 0.49, 0.5, 1.99, 2.0, f64::NAN] {
            h.fill(x);
        }
        assert_eq!(h.counts(), &[2.0, 1.0, 0.0, 1.0]);
        assert_relative_eq!(h.underflow(), 1.0);
        assert_relative_eq!(h.overflow(), 1.0);
        assert_relative_eq!(h.bin_center(1), 0.75);
        assert_relative_eq!(h.integral(), 4.0);
    }

    #[test]
    fn test_invalid_binning() {
        assert!(Histogram1D::new(0, 0.0, 1.0).is_err());
        assert!(Histogram1D::new(3, 1.0, 1.0).is_err());
        assert!(Histogram1D::new(3, 0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_binomial_efficiency() {
        let mut passed = Histogram1D::new(2, 0.0, 2.0).unwrap();
        let mut total = Histogram1D::new(2, 0.0, 2.0).unwrap();
        for _ in 0..4 {
            total.fill(0.5);
        }
        passed.fill(0.5);
        passed.fill(0.5);

        let eff = EfficiencyHistogram::divide(&passed, &total, ErrorModel::Binomial).unwrap();
        assert_relative_eq!(eff.values()[0], 0.5);
        assert_relative_eq!(eff.errors()[0], 0.25);
        assert_relative_eq!(eff.values()[1], 0.0);
        assert_relative_eq!(eff.errors()[1], 0.0);

        let poisson = EfficiencyHistogram::divide(&passed, &total, ErrorModel::Poisson).unwrap();
        assert_relative_eq!(poisson.errors()[0], 2.0_f64.sqrt() / 4.0);
    }

    #[test]
    fn test_mismatched_binning() {
        let a = Histogram1D::new(2, 0.0, 2.0).unwrap();
        let mut b = Histogram1D::new(3, 0.0, 2.0).unwrap();
        assert!(EfficiencyHistogram::divide(&a, &b, ErrorModel::Binomial).is_err());
        assert!(b.merge(&a).is_err());
    }
}
