use serde::{Deserialize, Serialize};

/// Running statistics for one numeric metric of an entity.
///
/// The average is always derived from `sum / count` so it can never drift
/// away from the observations that produced it. Every observation carries
/// equal weight, however far apart in time the observations are.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricState {
    sum: f64,
    count: u64,
    min: f64,
    max: f64,
}

impl MetricState {
    /// State after a single observation.
    pub fn new(value: f64) -> Self {
        MetricState {
            sum: value,
            count: 1,
            min: value,
            max: value,
        }
    }

    /// Returns the state after one more observation.
    pub fn update(self, value: f64) -> Self {
        MetricState {
            sum: self.sum + value,
            count: self.count + 1,
            min: self.min.min(value),
            max: self.max.max(value),
        }
    }

    pub fn observe(&mut self, value: f64) {
        *self = self.update(value);
    }

    pub fn average(&self) -> f64 {
        self.sum / self.count as f64
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
