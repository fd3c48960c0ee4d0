use std::collections::VecDeque;

/// Fixed-capacity sliding window with population statistics.
///
/// Shared by the outlier detector (implied-speed statistics), the stationary
/// detector (speed average) and the motion feed (acceleration variance).
#[derive(Clone, Debug)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RollingWindow {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    /// Population variance (divides by n)
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        let n = self.values.len() as f64;
        Some(self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n)
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.values.iter()
    }
}

/// First-order exponential smoother: y += α (x − y), seeded with the first sample
#[derive(Clone, Debug)]
pub struct ExponentialSmoother {
    alpha: f64,
    value: Option<f64>,
}

impl ExponentialSmoother {
    pub fn new(alpha: f64) -> Self {
        ExponentialSmoother {
            alpha: alpha.clamp(0.0, 1.0),
            value: None,
        }
    }

    pub fn apply(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            Some(prev) => prev + self.alpha * (sample - prev),
            None => sample,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Ground speed from a least-squares line through the most recent local
/// positions. Used when the fixes themselves carry no velocity.
#[derive(Clone, Debug)]
pub struct PositionRate {
    /// (timestamp, north, east)
    samples: VecDeque<(f64, f64, f64)>,
    capacity: usize,
    min_samples: usize,
}

impl PositionRate {
    pub fn new(capacity: usize, min_samples: usize) -> Self {
        let capacity = capacity.max(2);
        PositionRate {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            min_samples: min_samples.clamp(2, capacity),
        }
    }

    pub fn push(&mut self, timestamp: f64, north: f64, east: f64) {
        if !(timestamp.is_finite() && north.is_finite() && east.is_finite()) {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((timestamp, north, east));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Fitted speed (m/s). None until `min_samples` positions spanning a nonzero time.
    pub fn speed(&self) -> Option<f64> {
        if self.samples.len() < self.min_samples {
            return None;
        }
        let n = self.samples.len() as f64;
        let (st, sn, se) = self
            .samples
            .iter()
            .fold((0.0, 0.0, 0.0), |(a, b, c), &(t, no, ea)| (a + t, b + no, c + ea));
        let (t_mean, n_mean, e_mean) = (st / n, sn / n, se / n);

        let mut stt = 0.0;
        let mut stn = 0.0;
        let mut ste = 0.0;
        for &(t, no, ea) in &self.samples {
            let dt = t - t_mean;
            stt += dt * dt;
            stn += dt * (no - n_mean);
            ste += dt * (ea - e_mean);
        }
        if stt <= f64::EPSILON {
            return None;
        }
        Some((stn / stt).hypot(ste / stt))
    }
}
