use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::cursor::{StageCursor, StageTag};
use crate::payload::{PayloadMetric, PayloadSamples, PayloadStat};

/// Error kind charged to failures that carry no reason.
pub const UNKNOWN_ERROR_KIND: &str = "UNKNOWN";

/// Bucket for events that completed while no stage was open.
const UNATTRIBUTED_EPOCH: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// Notification fired once per finished request.
#[derive(Debug, Clone, Copy)]
pub struct CompletionEvent<'a> {
    pub outcome: Outcome,
    pub error_kind: Option<&'a str>,
    pub size_sample: Option<&'a str>,
    /// Index of the named target the request went to, in registration order.
    pub target: Option<usize>,
}

impl<'a> CompletionEvent<'a> {
    pub fn success() -> Self {
        Self {
            outcome: Outcome::Success,
            error_kind: None,
            size_sample: None,
            target: None,
        }
    }

    pub fn failure(kind: &'a str) -> Self {
        Self {
            outcome: Outcome::Failure,
            error_kind: Some(kind),
            size_sample: None,
            target: None,
        }
    }

    #[must_use]
    pub fn with_size_sample(mut self, sample: Option<&'a str>) -> Self {
        self.size_sample = sample;
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: Option<usize>) -> Self {
        self.target = target;
        self
    }
}

#[derive(Debug)]
struct Bucket {
    tag: Option<StageTag>,
    events: AtomicU64,
    failures: AtomicU64,
    errors: DashMap<Arc<str>, AtomicU64>,
    payload: Mutex<PayloadSamples>,
}

impl Bucket {
    fn new(tag: Option<StageTag>) -> Self {
        Self {
            tag,
            events: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            errors: DashMap::new(),
            payload: Mutex::new(PayloadSamples::default()),
        }
    }

    fn count(&self, event: &CompletionEvent<'_>) {
        self.events.fetch_add(1, Ordering::Relaxed);
        if event.outcome == Outcome::Failure {
            self.failures.fetch_add(1, Ordering::Relaxed);
            self.add_error(event.error_kind.unwrap_or(UNKNOWN_ERROR_KIND));
        }
    }

    fn add_error(&self, kind: &str) {
        if let Some(counter) = self.errors.get(kind) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.errors
            .entry(Arc::from(kind))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn errors(&self) -> BTreeMap<String, u64> {
        self.errors
            .iter()
            .map(|e| (e.key().to_string(), e.value().load(Ordering::Relaxed)))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}

/// One error kind's share of all errors in a tally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorShare {
    pub code: String,
    pub count: u64,
    pub percentage: f64,
}

/// Error kinds sorted by count (descending, ties by name), truncated to `limit`.
pub fn rank_errors(errors: &BTreeMap<String, u64>, limit: usize) -> Vec<ErrorShare> {
    let total: u64 = errors.values().sum();
    let mut ranked: Vec<ErrorShare> = errors
        .iter()
        .filter(|(_, n)| **n > 0)
        .map(|(code, &count)| ErrorShare {
            code: code.clone(),
            count,
            percentage: if total > 0 {
                count as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.code.cmp(&b.code)));
    ranked.truncate(limit);
    ranked
}

/// Per-stage error tally frozen for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct StageErrorTally {
    pub label: String,
    pub epoch: u64,
    pub events: u64,
    pub failures: u64,
    pub errors: BTreeMap<String, u64>,
}

/// Per-target error tally frozen for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetErrorTally {
    pub name: String,
    pub events: u64,
    pub failures: u64,
    pub errors: BTreeMap<String, u64>,
    pub payload: Option<PayloadStat>,
}

/// Frozen copy of an [`EventTally`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorTally {
    pub global: BTreeMap<String, u64>,
    pub per_stage: Vec<StageErrorTally>,
    /// Registered targets in registration order.
    pub per_target: Vec<TargetErrorTally>,
    pub unattributed: BTreeMap<String, u64>,
    pub events_total: u64,
    pub late_events: u64,
    /// Run-wide size samples, when a payload metric is configured.
    pub payload: Option<PayloadStat>,
}

impl ErrorTally {
    pub fn total_errors(&self) -> u64 {
        self.global.values().sum()
    }

    pub fn target(&self, name: &str) -> Option<&TargetErrorTally> {
        self.per_target.iter().find(|t| t.name == name)
    }
}

/// Concurrent accumulator of completion events.
///
/// Events are charged to the stage the cursor pointed at when the event was recorded
/// (completion-time attribution). The global view is the sum over all buckets, so it always
/// agrees with the per-stage view. Events tagged with a registered target are also charged
/// to that target.
#[derive(Debug)]
pub struct EventTally {
    cursor: StageCursor,
    payload_metric: Option<PayloadMetric>,
    buckets: DashMap<u64, Arc<Bucket>>,
    targets: Vec<(Arc<str>, Bucket)>,
    terminated: AtomicBool,
    late_events: AtomicU64,
}

impl EventTally {
    pub fn new(payload_metric: Option<PayloadMetric>) -> Self {
        Self::with_targets(payload_metric, std::iter::empty::<&str>())
    }

    pub fn with_targets<I, N>(payload_metric: Option<PayloadMetric>, targets: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Arc<str>>,
    {
        Self {
            cursor: StageCursor::default(),
            payload_metric,
            buckets: DashMap::new(),
            targets: targets
                .into_iter()
                .map(|n| (n.into(), Bucket::new(None)))
                .collect(),
            terminated: AtomicBool::new(false),
            late_events: AtomicU64::new(0),
        }
    }

    pub fn payload_metric(&self) -> Option<PayloadMetric> {
        self.payload_metric
    }

    pub fn current_stage(&self) -> Option<StageTag> {
        self.cursor.current()
    }

    pub fn on_complete(&self, event: CompletionEvent<'_>) {
        let tag = self.cursor.current();
        let bucket = self.bucket(tag);
        let target = event
            .target
            .and_then(|i| self.targets.get(i))
            .map(|(_, b)| b);

        bucket.count(&event);
        if let Some(t) = target {
            t.count(&event);
        }

        if let (Some(metric), Some(raw)) = (self.payload_metric, event.size_sample) {
            let measured = metric.measure(raw);
            if let Err(err) = &measured {
                tracing::debug!(%metric, error = %err, "size sample skipped");
            }
            for b in std::iter::once(&*bucket).chain(target) {
                let mut samples = b.payload.lock();
                match &measured {
                    Ok(v) => samples.push(*v),
                    Err(_) => samples.skip(),
                }
            }
        }

        if self.terminated.load(Ordering::Acquire) {
            self.late_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn bucket(&self, tag: Option<StageTag>) -> Arc<Bucket> {
        let epoch = tag.as_ref().map_or(UNATTRIBUTED_EPOCH, |t| t.epoch);
        if let Some(b) = self.buckets.get(&epoch) {
            return b.value().clone();
        }
        self.buckets
            .entry(epoch)
            .or_insert_with(|| Arc::new(Bucket::new(tag)))
            .value()
            .clone()
    }

    pub(crate) fn open_stage(&self, index: usize, label: &str) -> StageTag {
        let tag = self.cursor.open(index, label);
        self.buckets
            .entry(tag.epoch)
            .or_insert_with(|| Arc::new(Bucket::new(Some(tag.clone()))));
        tag
    }

    pub(crate) fn close_stages(&self) {
        self.cursor.clear();
        self.terminated.store(true, Ordering::Release);
    }

    pub fn stage_errors(&self, epoch: u64) -> BTreeMap<String, u64> {
        self.buckets
            .get(&epoch)
            .map(|b| b.errors())
            .unwrap_or_default()
    }

    pub fn stage_payload(&self, epoch: u64) -> Option<PayloadStat> {
        let metric = self.payload_metric?;
        let bucket = self.buckets.get(&epoch)?.value().clone();
        let samples = bucket.payload.lock();
        Some(samples.summarize(metric))
    }

    pub fn overall_payload(&self) -> Option<PayloadStat> {
        let metric = self.payload_metric?;
        let mut all = PayloadSamples::default();
        for b in self.buckets.iter() {
            all.merge(&b.value().payload.lock());
        }
        Some(all.summarize(metric))
    }

    pub fn global_errors(&self) -> BTreeMap<String, u64> {
        let mut out: BTreeMap<String, u64> = BTreeMap::new();
        for b in self.buckets.iter() {
            for (kind, n) in b.value().errors() {
                *out.entry(kind).or_insert(0) += n;
            }
        }
        out
    }

    pub fn late_events(&self) -> u64 {
        self.late_events.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ErrorTally {
        let mut buckets: Vec<Arc<Bucket>> =
            self.buckets.iter().map(|b| b.value().clone()).collect();
        buckets.sort_by_key(|b| b.tag.as_ref().map_or(UNATTRIBUTED_EPOCH, |t| t.epoch));

        let mut out = ErrorTally {
            late_events: self.late_events(),
            payload: self.overall_payload(),
            ..ErrorTally::default()
        };

        for b in buckets {
            let errors = b.errors();
            out.events_total += b.events.load(Ordering::Relaxed);
            for (kind, n) in &errors {
                *out.global.entry(kind.clone()).or_insert(0) += n;
            }
            match &b.tag {
                Some(tag) => out.per_stage.push(StageErrorTally {
                    label: tag.label.to_string(),
                    epoch: tag.epoch,
                    events: b.events.load(Ordering::Relaxed),
                    failures: b.failures.load(Ordering::Relaxed),
                    errors,
                }),
                None => out.unattributed = errors,
            }
        }

        out.per_target = self
            .targets
            .iter()
            .map(|(name, b)| TargetErrorTally {
                name: name.to_string(),
                events: b.events.load(Ordering::Relaxed),
                failures: b.failures.load(Ordering::Relaxed),
                errors: b.errors(),
                payload: self
                    .payload_metric
                    .map(|metric| b.payload.lock().summarize(metric)),
            })
            .collect();

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;

    #[test]
    fn failures_are_charged_to_the_open_stage() {
        let tally = EventTally::new(None);
        tally.on_complete(CompletionEvent::failure("HTTP_500"));

        let s1 = tally.open_stage(0, "S1");
        tally.on_complete(CompletionEvent::failure("HTTP_503"));
        tally.on_complete(CompletionEvent::success());

        let s2 = tally.open_stage(1, "S2");
        tally.on_complete(CompletionEvent::failure("HTTP_503"));
        tally.on_complete(CompletionEvent {
            outcome: Outcome::Failure,
            error_kind: None,
            size_sample: None,
            target: None,
        });

        assert_eq!(tally.stage_errors(s1.epoch).get("HTTP_503"), Some(&1));
        assert_eq!(tally.stage_errors(s2.epoch).get("HTTP_503"), Some(&1));
        assert_eq!(
            tally.stage_errors(s2.epoch).get(UNKNOWN_ERROR_KIND),
            Some(&1)
        );

        let snap = tally.snapshot();
        assert_eq!(snap.global.get("HTTP_503"), Some(&2));
        assert_eq!(snap.global.get("HTTP_500"), Some(&1));
        assert_eq!(snap.unattributed.get("HTTP_500"), Some(&1));
        assert_eq!(snap.per_stage.len(), 2);
        assert_eq!(snap.per_stage[0].label, "S1");
        assert_eq!(snap.per_stage[0].events, 2);
        assert_eq!(snap.per_stage[0].failures, 1);
        assert_eq!(snap.events_total, 5);
        assert_eq!(snap.total_errors(), 4);
        assert_eq!(snap.late_events, 0);
    }

    #[test]
    fn events_after_termination_are_accepted_and_counted_late() {
        let tally = EventTally::new(None);
        tally.open_stage(0, "S1");
        tally.close_stages();

        tally.on_complete(CompletionEvent::failure("TIMEOUT"));
        tally.on_complete(CompletionEvent::success());

        let snap = tally.snapshot();
        assert_eq!(snap.late_events, 2);
        assert_eq!(snap.global.get("TIMEOUT"), Some(&1));
        assert_eq!(snap.unattributed.get("TIMEOUT"), Some(&1));
    }

    #[test]
    fn broken_size_samples_never_suppress_counting() {
        let tally = EventTally::new(Some(PayloadMetric::AudioSeconds));
        let tag = tally.open_stage(0, "S1");
        let good = STANDARD.encode(vec![0u8; 44 + 64_000]);

        tally.on_complete(CompletionEvent::success().with_size_sample(Some(&good)));
        tally.on_complete(CompletionEvent::failure("HTTP_500").with_size_sample(Some("%%%")));

        let stat = tally
            .stage_payload(tag.epoch)
            .unwrap_or_else(|| panic!("expected payload stat"));
        assert_eq!(stat.count, 1);
        assert_eq!(stat.skipped, 1);
        assert!((stat.avg - 2.0).abs() < 1e-9);
        assert_eq!(tally.global_errors().get("HTTP_500"), Some(&1));
    }

    #[test]
    fn no_payload_metric_means_no_payload_stat() {
        let tally = EventTally::new(None);
        let tag = tally.open_stage(0, "S1");
        tally.on_complete(CompletionEvent::success().with_size_sample(Some("abc")));
        assert!(tally.stage_payload(tag.epoch).is_none());
        assert!(tally.overall_payload().is_none());
    }

    #[test]
    fn ranking_orders_by_count_then_code() {
        let mut errors = BTreeMap::new();
        errors.insert("HTTP_500".to_string(), 2);
        errors.insert("EXCEPTION:TIMEOUT".to_string(), 6);
        errors.insert("HTTP_429".to_string(), 2);
        errors.insert("HTTP_404".to_string(), 0);

        let ranked = rank_errors(&errors, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].code, "EXCEPTION:TIMEOUT");
        assert!((ranked[0].percentage - 60.0).abs() < 1e-9);
        assert_eq!(ranked[1].code, "HTTP_429");
    }

    #[test]
    fn targets_get_their_own_errors_and_samples() {
        let tally = EventTally::with_targets(Some(PayloadMetric::TextChars), ["ner", "nmt"]);
        let tag = tally.open_stage(0, "S1");

        tally.on_complete(
            CompletionEvent::success()
                .with_size_sample(Some("hello"))
                .with_target(Some(0)),
        );
        tally.on_complete(
            CompletionEvent::failure("HTTP_503")
                .with_size_sample(Some("hi"))
                .with_target(Some(1)),
        );
        tally.on_complete(CompletionEvent::failure("HTTP_500").with_target(Some(9)));

        let snap = tally.snapshot();
        assert_eq!(snap.per_target.len(), 2);

        let ner = snap.target("ner").unwrap_or_else(|| panic!("ner"));
        assert_eq!((ner.events, ner.failures), (1, 0));
        assert!(ner.errors.is_empty());
        assert_eq!(ner.payload.as_ref().map(|p| p.avg), Some(5.0));

        let nmt = snap.target("nmt").unwrap_or_else(|| panic!("nmt"));
        assert_eq!((nmt.events, nmt.failures), (1, 1));
        assert_eq!(nmt.errors.get("HTTP_503"), Some(&1));
        assert_eq!(nmt.payload.as_ref().map(|p| p.avg), Some(2.0));

        // Unregistered targets still count toward the stage and the run.
        assert_eq!(snap.global.get("HTTP_500"), Some(&1));
        assert_eq!(snap.per_stage[0].events, 3);
        let stage = tally
            .stage_payload(tag.epoch)
            .unwrap_or_else(|| panic!("stage payload"));
        assert_eq!(stage.count, 2);
    }

    #[test]
    fn one_failure_per_worker_loses_nothing() {
        const WORKERS: u64 = 256;
        let tally = EventTally::new(None);
        tally.open_stage(0, "S1");

        std::thread::scope(|s| {
            for _ in 0..WORKERS {
                s.spawn(|| tally.on_complete(CompletionEvent::failure("HTTP_429")));
            }
        });

        assert_eq!(tally.global_errors().get("HTTP_429"), Some(&WORKERS));
    }
}
