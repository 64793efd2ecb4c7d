use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use rampr_metrics::CumulativeSource;

use crate::differencer::{StageBaseline, StageMetricRecord, finalize};
use crate::shape::{ShapeState, StagePlan};
use crate::signal::StopSignal;
use crate::tally::EventTally;

/// Wall-clock source for stage timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, t: SystemTime) {
        *self.now.lock() = t;
    }

    pub fn advance(&self, by: std::time::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> SystemTime {
        (**self).now()
    }
}

/// What the harness should do until the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    Run { concurrency: u64, ramp_rate: f64 },
    Terminated,
}

/// Drives a [`StagePlan`] from elapsed run time.
///
/// The transition itself is [`StagePlan::state_at`]; this type owns the side effects of a
/// transition: finalizing the outgoing stage, publishing the incoming one to the tally and
/// capturing its baseline. Repeated ticks inside one stage window do nothing.
pub struct StageScheduler<S, C = SystemClock> {
    plan: StagePlan,
    source: S,
    tally: Arc<EventTally>,
    clock: C,
    stop: Arc<StopSignal>,
    state: Option<ShapeState>,
    baseline: Option<StageBaseline>,
    records: Vec<StageMetricRecord>,
}

impl<S: CumulativeSource> StageScheduler<S, SystemClock> {
    pub fn new(plan: StagePlan, source: S, tally: Arc<EventTally>) -> Self {
        Self::with_clock(plan, source, tally, SystemClock)
    }
}

impl<S: CumulativeSource, C: Clock> StageScheduler<S, C> {
    pub fn with_clock(plan: StagePlan, source: S, tally: Arc<EventTally>, clock: C) -> Self {
        Self {
            plan,
            source,
            tally,
            clock,
            stop: Arc::new(StopSignal::new()),
            state: None,
            baseline: None,
            records: Vec::new(),
        }
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    pub fn tally(&self) -> &Arc<EventTally> {
        &self.tally
    }

    pub fn stop_signal(&self) -> Arc<StopSignal> {
        self.stop.clone()
    }

    pub fn state(&self) -> Option<ShapeState> {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == Some(ShapeState::Terminated)
    }

    /// Baseline of the stage currently open, if any.
    pub fn current_baseline(&self) -> Option<&StageBaseline> {
        self.baseline.as_ref()
    }

    pub fn records(&self) -> &[StageMetricRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<StageMetricRecord> {
        self.records
    }

    pub fn tick(&mut self, elapsed_seconds: f64) -> Tick {
        let next = self.plan.state_at(elapsed_seconds);
        match (self.state, next) {
            (Some(current), next) if current == next => {}
            (Some(ShapeState::Terminated), _) => {}
            (Some(ShapeState::Stage(current)), ShapeState::Stage(next)) if next < current => {
                tracing::debug!(elapsed_seconds, current, next, "elapsed went backwards; ignored");
            }
            (_, next) => self.transition(next, true),
        }
        self.current_tick()
    }

    /// Ends the run early. The open stage is finalized with what it has; stages never reached
    /// produce no records.
    pub fn terminate(&mut self) -> Tick {
        if !self.is_terminated() {
            tracing::info!("terminating load shape early");
            self.transition(ShapeState::Terminated, false);
        }
        Tick::Terminated
    }

    fn current_tick(&self) -> Tick {
        match self.state.and_then(ShapeState::stage_index) {
            Some(idx) => match self.plan.stage(idx) {
                Some(stage) => Tick::Run {
                    concurrency: stage.target_concurrency,
                    ramp_rate: stage.ramp_rate,
                },
                None => Tick::Terminated,
            },
            None => Tick::Terminated,
        }
    }

    fn transition(&mut self, next: ShapeState, fill_skipped: bool) {
        let from_index = self.state.and_then(ShapeState::stage_index);

        if let Some(baseline) = self.baseline.take() {
            let record = self.close(&baseline);
            tracing::info!(
                stage = %record.label,
                requests = record.requests,
                failures = record.failures,
                rps = record.throughput_rps,
                "stage finished"
            );
            self.records.push(record);
        }

        if fill_skipped {
            let first = from_index.map_or(0, |i| i + 1);
            let until = next.stage_index().unwrap_or(self.plan.len());
            for index in first..until {
                self.push_skipped(index);
            }
        }

        self.state = Some(next);
        match next {
            ShapeState::Stage(index) => self.open(index),
            ShapeState::Terminated => {
                self.tally.close_stages();
                self.stop.stop();
                tracing::info!(stages = self.records.len(), "load shape complete");
            }
        }
    }

    fn open(&mut self, index: usize) {
        let Some(stage) = self.plan.stage(index) else {
            return;
        };
        let tag = self.tally.open_stage(index, &stage.label);
        let cumulative = self.source.snapshot();
        let baseline = StageBaseline::capture(
            index,
            stage.label.as_str(),
            stage.target_concurrency,
            Some(tag.epoch),
            self.clock.now(),
            &cumulative,
        )
        .quarantined(self.plan.is_quarantined(index));

        tracing::info!(
            stage = %stage.label,
            target_concurrency = stage.target_concurrency,
            ramp_rate = stage.ramp_rate,
            "stage started"
        );
        tracing::debug!(
            stage = %stage.label,
            epoch = tag.epoch,
            requests_at_start = baseline.requests_at_start,
            failures_at_start = baseline.failures_at_start,
            "baseline captured"
        );
        self.baseline = Some(baseline);
    }

    fn close(&self, baseline: &StageBaseline) -> StageMetricRecord {
        let (errors, payload) = match baseline.epoch {
            Some(epoch) => (
                self.tally.stage_errors(epoch),
                self.tally.stage_payload(epoch),
            ),
            None => Default::default(),
        };
        finalize(
            baseline,
            self.clock.now(),
            &self.source.snapshot(),
            errors,
            payload,
        )
    }

    fn push_skipped(&mut self, index: usize) {
        let Some(stage) = self.plan.stage(index) else {
            return;
        };
        tracing::warn!(stage = %stage.label, "stage elapsed between ticks; recording it empty");

        let now = self.clock.now();
        let cumulative = self.source.snapshot();
        let baseline = StageBaseline::capture(
            index,
            stage.label.as_str(),
            stage.target_concurrency,
            None,
            now,
            &cumulative,
        )
        .quarantined(self.plan.is_quarantined(index));
        let record = finalize(&baseline, now, &cumulative, Default::default(), None);
        self.records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::StageDef;
    use crate::tally::CompletionEvent;
    use rampr_metrics::{RequestSample, StatsStore};
    use std::time::Duration;

    struct Fixture {
        store: Arc<StatsStore>,
        clock: Arc<ManualClock>,
        scheduler: StageScheduler<Arc<StatsStore>, Arc<ManualClock>>,
    }

    fn fixture(stages: Vec<StageDef>) -> Fixture {
        let store = Arc::new(StatsStore::default());
        let clock = Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH));
        let plan = StagePlan::new(stages).unwrap_or_else(|e| panic!("{e}"));
        let scheduler = StageScheduler::with_clock(
            plan,
            store.clone(),
            Arc::new(EventTally::new(None)),
            clock.clone(),
        );
        Fixture {
            store,
            clock,
            scheduler,
        }
    }

    fn requests(store: &StatsStore, n: usize, failed: bool) {
        for _ in 0..n {
            store.record(RequestSample {
                elapsed: Duration::from_millis(20),
                failed,
                content_length: 0,
                target: None,
            });
        }
    }

    fn two_stages() -> Vec<StageDef> {
        vec![
            StageDef::new("S1 (5 users)", 10.0, 5, 1.0),
            StageDef::new("S2 (10 users)", 30.0, 10, 2.0),
        ]
    }

    #[test]
    fn ticks_follow_the_plan_and_finalize_once_per_transition() {
        let mut f = fixture(two_stages());

        assert_eq!(
            f.scheduler.tick(5.0),
            Tick::Run {
                concurrency: 5,
                ramp_rate: 1.0
            }
        );
        requests(&f.store, 4, false);
        f.clock.advance(Duration::from_secs(4));
        assert_eq!(
            f.scheduler.tick(9.9),
            Tick::Run {
                concurrency: 5,
                ramp_rate: 1.0
            }
        );
        assert!(f.scheduler.records().is_empty());

        f.clock.advance(Duration::from_secs(4));
        assert_eq!(
            f.scheduler.tick(15.0),
            Tick::Run {
                concurrency: 10,
                ramp_rate: 2.0
            }
        );
        assert_eq!(f.scheduler.records().len(), 1);
        assert_eq!(f.scheduler.records()[0].label, "S1 (5 users)");
        assert_eq!(f.scheduler.records()[0].requests, 4);
        assert!((f.scheduler.records()[0].duration_seconds - 8.0).abs() < 1e-9);

        requests(&f.store, 3, true);
        f.clock.advance(Duration::from_secs(16));
        assert_eq!(f.scheduler.tick(31.0), Tick::Terminated);
        assert_eq!(f.scheduler.tick(40.0), Tick::Terminated);

        let records = f.scheduler.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].label, "S2 (10 users)");
        assert_eq!(records[1].requests, 3);
        assert_eq!(records[1].failures, 3);
        assert!(f.scheduler.stop_signal().is_stopped());
    }

    #[test]
    fn repeated_ticks_inside_a_window_do_nothing() {
        let mut f = fixture(two_stages());
        f.scheduler.tick(1.0);
        let baseline = f.scheduler.current_baseline().cloned();

        requests(&f.store, 2, false);
        for t in [1.5, 2.0, 9.0, 9.99] {
            f.scheduler.tick(t);
        }
        assert_eq!(f.scheduler.current_baseline().cloned(), baseline);
        assert!(f.scheduler.records().is_empty());
    }

    #[test]
    fn stages_between_ticks_get_empty_records() {
        let mut f = fixture(vec![
            StageDef::new("a", 1.0, 1, 1.0),
            StageDef::new("b", 2.0, 2, 1.0),
            StageDef::new("c", 3.0, 3, 1.0),
            StageDef::new("d", 10.0, 4, 1.0),
        ]);

        f.scheduler.tick(0.5);
        requests(&f.store, 5, false);
        f.scheduler.tick(5.0);

        let labels: Vec<&str> = f.scheduler.records().iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["a", "b", "c"]);
        assert_eq!(f.scheduler.records()[0].requests, 5);
        for skipped in &f.scheduler.records()[1..] {
            assert!(skipped.skipped);
            assert_eq!(skipped.requests, 0);
            assert_eq!(skipped.duration_seconds, 0.0);
        }

        f.scheduler.tick(11.0);
        assert_eq!(f.scheduler.records().len(), 4);
    }

    #[test]
    fn first_tick_past_the_end_records_every_stage_and_stops() {
        let mut f = fixture(two_stages());
        assert_eq!(f.scheduler.tick(100.0), Tick::Terminated);
        assert_eq!(f.scheduler.records().len(), 2);
        assert!(f.scheduler.records().iter().all(|r| r.skipped));
        assert!(f.scheduler.stop_signal().is_stopped());
    }

    #[test]
    fn early_termination_finalizes_only_the_open_stage() {
        let mut f = fixture(two_stages());
        f.scheduler.tick(1.0);
        requests(&f.store, 2, false);

        assert_eq!(f.scheduler.terminate(), Tick::Terminated);
        assert_eq!(f.scheduler.terminate(), Tick::Terminated);
        assert_eq!(f.scheduler.records().len(), 1);
        assert_eq!(f.scheduler.records()[0].requests, 2);
        assert_eq!(f.scheduler.tick(15.0), Tick::Terminated);
        assert_eq!(f.scheduler.records().len(), 1);
    }

    #[test]
    fn stage_records_carry_their_own_tally() {
        let mut f = fixture(two_stages());
        let tally = f.scheduler.tally().clone();

        f.scheduler.tick(0.0);
        tally.on_complete(CompletionEvent::failure("HTTP_500"));
        f.scheduler.tick(12.0);
        tally.on_complete(CompletionEvent::failure("HTTP_503"));
        tally.on_complete(CompletionEvent::failure("HTTP_503"));
        f.scheduler.tick(30.0);

        let records = f.scheduler.into_records();
        assert_eq!(records[0].error_code_distribution.get("HTTP_500"), Some(&1));
        assert_eq!(records[0].error_code_distribution.get("HTTP_503"), None);
        assert_eq!(records[1].error_code_distribution.get("HTTP_503"), Some(&2));
        assert_eq!(tally.global_errors().values().sum::<u64>(), 3);
    }

    #[test]
    fn quarantined_stages_are_flagged_on_their_records() {
        let mut f = fixture(vec![
            StageDef::new("a", 5.0, 1, 1.0),
            StageDef::new("b", 10.0, 2, 0.0),
        ]);
        f.scheduler.tick(1.0);
        f.scheduler.tick(6.0);
        f.scheduler.tick(11.0);
        let records = f.scheduler.records();
        assert!(!records[0].quarantined);
        assert!(records[1].quarantined);
    }
}
