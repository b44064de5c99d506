//! Rolling realized volatility of the reference spot price.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::*;
use std::collections::VecDeque;

use super::VolatilitySample;

/// Volatility is reported over this horizon.
const HORIZON_MINUTES: f64 = 15.0;

/// Keeps spot samples for a trailing window and derives the standard
/// deviation of per-sample percentage returns, scaled to 15 minutes.
#[derive(Debug, Clone)]
pub struct VolatilityTracker {
    window: Duration,
    samples: VecDeque<(DateTime<Utc>, Decimal)>,
}

impl VolatilityTracker {
    pub fn new(window_minutes: i64) -> Self {
        Self {
            window: Duration::minutes(window_minutes),
            samples: VecDeque::new(),
        }
    }

    /// Add a spot observation and drop anything older than the window.
    /// Out-of-order observations are ignored.
    pub fn record(&mut self, at: DateTime<Utc>, price: Decimal) {
        if price <= Decimal::ZERO {
            return;
        }
        if let Some((last, _)) = self.samples.back() {
            if at <= *last {
                return;
            }
        }
        self.samples.push_back((at, price));
        let cutoff = at - self.window;
        while let Some((t, _)) = self.samples.front() {
            if *t < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `None` until at least two returns exist.
    pub fn volatility(&self) -> Option<VolatilitySample> {
        if self.samples.len() < 3 {
            return None;
        }

        let points: Vec<(DateTime<Utc>, f64)> = self
            .samples
            .iter()
            .filter_map(|(t, p)| p.to_f64().map(|p| (*t, p)))
            .collect();

        let mut returns = Vec::with_capacity(points.len());
        let mut minutes = 0.0;
        for pair in points.windows(2) {
            let (t0, p0) = pair[0];
            let (t1, p1) = pair[1];
            returns.push((p1 - p0) / p0 * 100.0);
            minutes += (t1 - t0).num_milliseconds() as f64 / 60_000.0;
        }

        let n = returns.len() as f64;
        if n < 2.0 || minutes <= 0.0 {
            return None;
        }
        let mean = returns.iter().sum::<f64>() / n;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let interval = minutes / n;
        let std_15m = var.sqrt() * (HORIZON_MINUTES / interval).sqrt();

        Some(VolatilitySample {
            std_pct: Decimal::from_f64(std_15m)?.round_dp(6),
            samples: returns.len(),
        })
    }
}
