// Histogram bucket resolution
// Turns an optional explicit boundary list (from the environment) or a
// geometric default into the upper bounds a histogram is created with
//
// Numan Thabit 2025 Nov

use crate::errors::{MetricsError, Result};
use std::f64::consts::SQRT_2;

/// How generated boundaries are rounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rounding {
    /// Round to a number of decimal places (time based buckets).
    Decimals(u32),
    /// Round to whole numbers (byte based buckets).
    Whole,
}

impl Rounding {
    fn apply(self, value: f64) -> f64 {
        match self {
            Rounding::Decimals(places) => {
                let scale = 10f64.powi(places as i32);
                (value * scale).round() / scale
            }
            Rounding::Whole => value.round(),
        }
    }
}

/// Geometric default for a histogram: `start * factor^i` for `i` in `[0, count)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSpec {
    pub metric: &'static str,
    pub start: f64,
    pub factor: f64,
    pub count: usize,
    pub rounding: Rounding,
}

/// 4ms up to ~65s
pub const LATENCY_BUCKETS: BucketSpec = BucketSpec {
    metric: "api_latency_seconds",
    start: 0.004,
    factor: SQRT_2,
    count: 29,
    rounding: Rounding::Decimals(3),
};

/// 256B up to 4GB
pub const BYTES_RW_BUCKETS: BucketSpec = BucketSpec {
    metric: "api_bytes_rw",
    start: 256.0,
    factor: SQRT_2,
    count: 49,
    rounding: Rounding::Whole,
};

impl BucketSpec {
    /// Generate the default boundaries.
    pub fn generate(&self) -> Result<Vec<f64>> {
        let raw = prometheus::exponential_buckets(self.start, self.factor, self.count)
            .map_err(|err| MetricsError::InvalidBuckets {
                metric: self.metric,
                reason: err.to_string(),
            })?;
        Ok(raw.into_iter().map(|b| self.rounding.apply(b)).collect())
    }

    /// Use `explicit` verbatim when present, the generated default otherwise.
    pub fn resolve(&self, explicit: Option<&[f64]>) -> Result<Vec<f64>> {
        match explicit {
            Some(bounds) => Ok(bounds.to_vec()),
            None => self.generate(),
        }
    }

    /// Parse a comma-separated list of integers such as `"1,2,4,8"`.
    ///
    /// A blank string yields `None` so the default applies. The list must be
    /// strictly increasing; the registry would otherwise reject the histogram
    /// long after start-up.
    pub fn parse_explicit(&self, raw: &str) -> Result<Option<Vec<f64>>> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let mut bounds = Vec::new();
        for part in raw.split(',') {
            let part = part.trim();
            let value: i64 = part.parse().map_err(|_| MetricsError::InvalidBuckets {
                metric: self.metric,
                reason: format!("not an integer: {part:?}"),
            })?;
            bounds.push(value as f64);
        }
        if let Some(pair) = bounds.windows(2).find(|w| w[0] >= w[1]) {
            return Err(MetricsError::InvalidBuckets {
                metric: self.metric,
                reason: format!("not strictly increasing at {} -> {}", pair[0], pair[1]),
            });
        }
        Ok(Some(bounds))
    }
}

/// Final boundaries for the latency and byte histograms.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketConfig {
    pub latency: Vec<f64>,
    pub bytes_rw: Vec<f64>,
}

impl BucketConfig {
    /// Resolve both histograms from optional comma-separated overrides.
    pub fn from_overrides(latency: Option<&str>, bytes_rw: Option<&str>) -> Result<Self> {
        let latency_explicit = match latency {
            Some(raw) => LATENCY_BUCKETS.parse_explicit(raw)?,
            None => None,
        };
        let bytes_explicit = match bytes_rw {
            Some(raw) => BYTES_RW_BUCKETS.parse_explicit(raw)?,
            None => None,
        };
        Ok(Self {
            latency: LATENCY_BUCKETS.resolve(latency_explicit.as_deref())?,
            bytes_rw: BYTES_RW_BUCKETS.resolve(bytes_explicit.as_deref())?,
        })
    }

    pub fn defaults() -> Result<Self> {
        Self::from_overrides(None, None)
    }
}
