#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub total: u64,
}

impl CounterSnapshot {
    pub fn new(total: u64) -> Self {
        Self { total }
    }

    pub fn delta_since(self, prev: Option<Self>) -> u64 {
        match prev {
            Some(prev) => self.total.saturating_sub(prev.total),
            None => self.total,
        }
    }

    /// True if the counter went backwards, i.e. the underlying store was reset.
    pub fn regressed_since(self, prev: Self) -> bool {
        self.total < prev.total
    }
}

/// Rate over `dt_secs`. Returns zero for non-positive or non-finite intervals.
#[inline]
pub fn per_sec(delta: u64, dt_secs: f64) -> f64 {
    if !dt_secs.is_finite() || dt_secs <= 0.0 {
        return 0.0;
    }
    delta as f64 / dt_secs
}
