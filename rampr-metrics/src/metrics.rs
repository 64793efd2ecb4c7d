use hdrhistogram::Histogram;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramSummary {
    pub p50: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub count: u64,
}

pub(crate) fn new_default_histogram() -> Histogram<u64> {
    // Latency in microseconds. Upper bound: 1 hour.
    match Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

pub(crate) fn summarize_histogram(h: &Histogram<u64>) -> HistogramSummary {
    let count = h.len();
    let map_val = |v| v as f64;

    HistogramSummary {
        p50: (count > 0).then(|| map_val(h.value_at_quantile(0.50))),
        p95: (count > 0).then(|| map_val(h.value_at_quantile(0.95))),
        p99: (count > 0).then(|| map_val(h.value_at_quantile(0.99))),
        min: (count > 0).then(|| map_val(h.min())),
        max: (count > 0).then(|| map_val(h.max())),
        mean: (count > 0).then(|| h.mean()),
        count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_summarizes_to_none() {
        let h = new_default_histogram();
        let s = summarize_histogram(&h);
        assert_eq!(s.count, 0);
        assert_eq!(s.p95, None);
        assert_eq!(s.mean, None);
    }

    #[test]
    fn summary_reports_bounds() {
        let mut h = new_default_histogram();
        for v in [1_000u64, 2_000, 3_000] {
            let _ = h.record(v);
        }
        let s = summarize_histogram(&h);
        assert_eq!(s.count, 3);
        assert!(s.min.is_some_and(|v| (v - 1_000.0).abs() < 1.0));
        assert!(s.max.is_some_and(|v| (v - 3_000.0).abs() < 5.0));
    }
}
