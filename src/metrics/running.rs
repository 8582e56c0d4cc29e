//! Online running statistics.

/// Exact running mean, updated one value at a time.
///
/// After `n` updates `compute()` equals the arithmetic mean of the values:
/// `mean += (value - mean) / count`.
#[derive(Debug, Clone, Default)]
pub struct RunningMean {
    mean: f64,
    count: usize,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
    }

    pub fn compute(&self) -> f64 {
        self.mean
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        self.mean = 0.0;
        self.count = 0;
    }
}
