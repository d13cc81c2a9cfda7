//! Streaming aggregation and the `compute_statistics` / `detect_anomalies`
//! tool algorithms.

use serde::{Deserialize, Serialize};

/// A mergeable streaming accumulator following Welford's online algorithm
/// for numerically stable mean/variance. Mergeable so pivot aggregation can
/// combine per-chunk accumulators without reprocessing raw values.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Accumulator {
    pub count: u64,
    pub count_numbers: u64,
    pub sum: f64,
    pub product: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: f64,
    pub m2: f64,
}

impl Accumulator {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if value.is_nan() {
            return;
        }
        self.count_numbers += 1;
        self.sum += value;
        self.product = if self.count_numbers == 1 {
            value
        } else {
            self.product * value
        };
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));

        let delta = value - self.mean;
        self.mean += delta / self.count_numbers as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Sample variance (Bessel-corrected, n-1 denominator).
    pub fn variance(&self) -> Option<f64> {
        if self.count_numbers < 2 {
            return None;
        }
        Some(self.m2 / (self.count_numbers - 1) as f64)
    }

    /// Population variance (n denominator), used by pivot `var`/`varp`.
    pub fn population_variance(&self) -> Option<f64> {
        if self.count_numbers == 0 {
            return None;
        }
        Some(self.m2 / self.count_numbers as f64)
    }

    pub fn stdev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    pub fn population_stdev(&self) -> Option<f64> {
        self.population_variance().map(f64::sqrt)
    }

    /// Parallel (Chan et al.) merge of two accumulators' moments.
    pub fn merge(&self, other: &Accumulator) -> Accumulator {
        if self.count_numbers == 0 {
            return *other;
        }
        if other.count_numbers == 0 {
            return *self;
        }
        let n_a = self.count_numbers as f64;
        let n_b = other.count_numbers as f64;
        let delta = other.mean - self.mean;
        let n_ab = n_a + n_b;
        let mean = self.mean + delta * n_b / n_ab;
        let m2 = self.m2 + other.m2 + delta * delta * n_a * n_b / n_ab;
        Accumulator {
            count: self.count + other.count,
            count_numbers: self.count_numbers + other.count_numbers,
            sum: self.sum + other.sum,
            product: self.product * other.product,
            min: match (self.min, other.min) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, None) => a,
                (None, b) => b,
            },
            max: match (self.max, other.max) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, None) => a,
                (None, b) => b,
            },
            mean,
            m2,
        }
    }
}

/// Result of `compute_statistics` for one or more columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub mode: Option<f64>,
    pub stdev: Option<f64>,
    pub variance: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub quartiles: Option<Quartiles>,
    pub correlation: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quartiles {
    pub q1: f64,
    pub q2: f64,
    pub q3: f64,
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

fn quartiles(sorted: &[f64]) -> Quartiles {
    Quartiles {
        q1: quantile(sorted, 0.25),
        q2: quantile(sorted, 0.5),
        q3: quantile(sorted, 0.75),
    }
}

fn mode(values: &[f64]) -> Option<f64> {
    use std::collections::HashMap;
    let mut counts: HashMap<u64, (f64, usize)> = HashMap::new();
    for &v in values {
        let key = v.to_bits();
        let entry = counts.entry(key).or_insert((v, 0));
        entry.1 += 1;
    }
    let best = counts.values().max_by_key(|(_, c)| *c).copied();
    match best {
        Some((value, count)) if count > 1 => Some(value),
        _ => None,
    }
}

/// Computes `compute_statistics` output for a single numeric column.
pub fn compute_column_statistics(values: &[f64]) -> ColumnStatistics {
    let mut numeric: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    numeric.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let mut acc = Accumulator::default();
    for &v in &numeric {
        acc.push(v);
    }

    ColumnStatistics {
        mean: if numeric.is_empty() { None } else { Some(acc.mean) },
        median: if numeric.is_empty() {
            None
        } else {
            Some(quantile(&numeric, 0.5))
        },
        mode: mode(&numeric),
        stdev: acc.stdev(),
        variance: acc.variance(),
        min: acc.min,
        max: acc.max,
        quartiles: if numeric.is_empty() {
            None
        } else {
            Some(quartiles(&numeric))
        },
        correlation: None,
    }
}

/// Pearson correlation between exactly two equal-length numeric columns.
pub fn correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..a.len() {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// z-score anomaly detection: indices whose standardized deviation exceeds
/// `threshold`. Sample standard deviation; returns no anomalies if stdev is
/// zero (a constant column has no outliers by construction).
pub fn detect_anomalies_zscore(values: &[f64], threshold: f64) -> Vec<usize> {
    let mut acc = Accumulator::default();
    for &v in values {
        if !v.is_nan() {
            acc.push(v);
        }
    }
    let Some(stdev) = acc.stdev().filter(|s| *s > 0.0) else {
        return Vec::new();
    };
    values
        .iter()
        .enumerate()
        .filter_map(|(i, &v)| {
            if v.is_nan() {
                return None;
            }
            let z = (v - acc.mean) / stdev;
            (z.abs() > threshold).then_some(i)
        })
        .collect()
}

/// IQR fence anomaly detection: indices outside `[Q1 - k*IQR, Q3 + k*IQR]`.
pub fn detect_anomalies_iqr(values: &[f64], multiplier: f64) -> Vec<usize> {
    let mut numeric: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if numeric.len() < 2 {
        return Vec::new();
    }
    numeric.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let q = quartiles(&numeric);
    let iqr = q.q3 - q.q1;
    let lower = q.q1 - multiplier * iqr;
    let upper = q.q3 + multiplier * iqr;
    values
        .iter()
        .enumerate()
        .filter_map(|(i, &v)| {
            if v.is_nan() {
                return None;
            }
            (v < lower || v > upper).then_some(i)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_matches_naive_mean_and_variance() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut acc = Accumulator::default();
        for v in values {
            acc.push(v);
        }
        assert!((acc.mean - 5.0).abs() < 1e-9);
        // sample variance of this set is 4.0
        assert!((acc.variance().unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn merge_matches_single_pass() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut whole = Accumulator::default();
        for v in values {
            whole.push(v);
        }
        let mut a = Accumulator::default();
        for v in &values[..3] {
            a.push(*v);
        }
        let mut b = Accumulator::default();
        for v in &values[3..] {
            b.push(*v);
        }
        let merged = a.merge(&b);
        assert!((merged.mean - whole.mean).abs() < 1e-9);
        assert!((merged.variance().unwrap() - whole.variance().unwrap()).abs() < 1e-9);
    }

    #[test]
    fn mode_is_none_without_repeats() {
        assert_eq!(mode(&[1.0, 2.0, 3.0]), None);
        assert_eq!(mode(&[1.0, 2.0, 2.0]), Some(2.0));
    }

    #[test]
    fn zscore_detects_outlier() {
        let values = [1.0, 2.0, 1.5, 2.5, 1.8, 100.0];
        let anomalies = detect_anomalies_zscore(&values, 3.0);
        assert_eq!(anomalies, vec![5]);
    }

    #[test]
    fn zscore_constant_column_has_no_anomalies() {
        let values = [5.0, 5.0, 5.0];
        assert!(detect_anomalies_zscore(&values, 3.0).is_empty());
    }

    #[test]
    fn iqr_detects_outlier() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 50.0];
        let anomalies = detect_anomalies_iqr(&values, 1.5);
        assert_eq!(anomalies, vec![5]);
    }

    #[test]
    fn correlation_requires_equal_length() {
        assert_eq!(correlation(&[1.0, 2.0], &[1.0]), None);
    }
}
