use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use rampr_core::{
    CompletionEvent, EventTally, StageMetricRecord, StagePlan, StageScheduler, StopSignal, Tick,
};
use rampr_metrics::{RequestSample, StatsStore};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::http::{HttpClient, status_failure_kind};
use crate::output::OutputFormatter;
use crate::target::TargetSet;

#[derive(Debug, Clone, Copy)]
pub(crate) struct HarnessConfig {
    pub tick: Duration,
    pub grace: Duration,
}

/// Live view of the run, pushed to the output once per tick.
#[derive(Debug, Clone)]
pub(crate) struct ProgressUpdate<'a> {
    pub elapsed: Duration,
    pub planned: Duration,
    pub stage: Option<&'a str>,
    pub active_users: u64,
    pub target_users: u64,
    pub requests: u64,
    pub failures: u64,
}

#[derive(Debug)]
pub(crate) struct HarnessOutcome {
    pub records: Vec<StageMetricRecord>,
    pub started_at: SystemTime,
    pub elapsed: Duration,
    pub interrupted: bool,
    /// Virtual users still busy when the grace window ran out.
    pub unfinished_vus: usize,
}

/// Gate shared by every virtual user: user `id` works only while `id <= active`.
#[derive(Debug)]
struct VuPool {
    active: AtomicU64,
    wake: Notify,
    stop: Arc<StopSignal>,
}

impl VuPool {
    fn set_active(&self, n: u64) {
        let prev = self.active.swap(n, Ordering::AcqRel);
        if n > prev {
            self.wake.notify_waiters();
        }
    }

    fn release(&self) {
        self.active.store(0, Ordering::Release);
        self.wake.notify_waiters();
    }
}

struct VuContext {
    id: u64,
    pool: Arc<VuPool>,
    client: HttpClient,
    targets: Arc<TargetSet>,
    store: Arc<StatsStore>,
    tally: Arc<EventTally>,
}

/// Starts virtual users as the active count first reaches them. Users are never torn
/// down mid-run; the pool parks the ones above the current count.
struct VuSpawner<F> {
    tasks: JoinSet<()>,
    spawned: u64,
    make: F,
}

impl<F, Fut> VuSpawner<F>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn new(make: F) -> Self {
        Self {
            tasks: JoinSet::new(),
            spawned: 0,
            make,
        }
    }

    fn grow_to(&mut self, n: u64) {
        if n <= self.spawned {
            return;
        }
        while self.spawned < n {
            self.spawned += 1;
            self.tasks.spawn((self.make)(self.spawned));
        }
        tracing::debug!(spawned = self.spawned, "virtual users spawned");
    }
}

/// Moves the active user count toward `target` by at most `ramp_rate * dt_secs`.
///
/// A non-positive or non-finite rate jumps straight to the target.
pub(crate) fn step_toward(current: f64, target: f64, ramp_rate: f64, dt_secs: f64) -> f64 {
    if !(ramp_rate.is_finite() && ramp_rate > 0.0) {
        return target;
    }
    let max_step = ramp_rate * dt_secs.max(0.0);
    if current < target {
        (current + max_step).min(target)
    } else {
        (current - max_step).max(target)
    }
}

pub(crate) async fn run(
    plan: StagePlan,
    targets: Arc<TargetSet>,
    tally: Arc<EventTally>,
    store: Arc<StatsStore>,
    cfg: HarnessConfig,
    output: &dyn OutputFormatter,
) -> HarnessOutcome {
    let planned = Duration::try_from_secs_f64(plan.total_duration_seconds()).unwrap_or_default();

    let mut scheduler = StageScheduler::new(plan, store.clone(), tally.clone());
    let pool = Arc::new(VuPool {
        active: AtomicU64::new(0),
        wake: Notify::new(),
        stop: scheduler.stop_signal(),
    });

    let client = HttpClient::default();
    let mut vus = VuSpawner::new({
        let pool = pool.clone();
        let store = store.clone();
        let tally = tally.clone();
        move |id| {
            vu_loop(VuContext {
                id,
                pool: pool.clone(),
                client: client.clone(),
                targets: targets.clone(),
                store: store.clone(),
                tally: tally.clone(),
            })
        }
    });

    let started_at = SystemTime::now();
    let started = Instant::now();
    let mut interval = tokio::time::interval(cfg.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut current = 0.0f64;
    let mut last_tick: Option<Instant> = None;
    let mut reported = 0usize;
    let mut interrupted = false;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            res = &mut ctrl_c => {
                if let Err(err) = res {
                    tracing::warn!(error = %err, "failed to listen for ctrl-c");
                }
                tracing::warn!("interrupted; finalizing the current stage");
                interrupted = true;
                scheduler.terminate();
                report_finished(scheduler.records(), &mut reported, output);
                break;
            }
        }

        let now = Instant::now();
        let elapsed = now.duration_since(started);
        let dt = last_tick.map_or(cfg.tick, |t| now.duration_since(t));
        last_tick = Some(now);

        let tick = scheduler.tick(elapsed.as_secs_f64());
        report_finished(scheduler.records(), &mut reported, output);

        let Tick::Run {
            concurrency,
            ramp_rate,
        } = tick
        else {
            break;
        };

        current = step_toward(current, concurrency as f64, ramp_rate, dt.as_secs_f64());
        let active = current.floor() as u64;
        pool.set_active(active);
        vus.grow_to(active);

        let stage = scheduler.current_baseline().map(|b| b.label.as_str());
        output.progress(&ProgressUpdate {
            elapsed,
            planned,
            stage,
            active_users: active,
            target_users: concurrency,
            requests: store.requests_total(),
            failures: store.failures_total(),
        });
    }

    pool.release();
    let elapsed = started.elapsed();

    let mut vus = vus.tasks;
    let drained = tokio::time::timeout(cfg.grace, async {
        while vus.join_next().await.is_some() {}
    })
    .await;
    let unfinished_vus = if drained.is_err() {
        let n = vus.len();
        tracing::warn!(
            unfinished = n,
            grace = ?cfg.grace,
            "virtual users still busy after the grace window; aborting them"
        );
        vus.abort_all();
        while vus.join_next().await.is_some() {}
        n
    } else {
        0
    };

    HarnessOutcome {
        records: scheduler.into_records(),
        started_at,
        elapsed,
        interrupted,
        unfinished_vus,
    }
}

fn report_finished(
    records: &[StageMetricRecord],
    reported: &mut usize,
    output: &dyn OutputFormatter,
) {
    for record in records.iter().skip(*reported) {
        output.stage_finished(record);
    }
    *reported = records.len();
}

/// Each user walks the target rotation from its own offset, so concurrent users spread
/// over the targets from the first request on.
async fn vu_loop(ctx: VuContext) {
    let mut slot = ((ctx.id - 1) % ctx.targets.len() as u64) as usize;
    loop {
        let notified = ctx.pool.wake.notified();
        if ctx.pool.stop.is_stopped() {
            return;
        }
        if ctx.id > ctx.pool.active.load(Ordering::Acquire) {
            notified.await;
            continue;
        }
        drop(notified);

        issue_one(&ctx, slot).await;
        slot = (slot + 1) % ctx.targets.len();

        if let Some(pause) = ctx.targets.think() {
            tokio::time::sleep(pause).await;
        }
    }
}

async fn issue_one(ctx: &VuContext, slot: usize) {
    let template = ctx.targets.get(slot);
    let target = ctx.targets.stats_index(slot);
    let body = template.next_body();
    let started = Instant::now();
    let res = ctx.client.send(&template.request, body.bytes.clone()).await;
    let elapsed = started.elapsed();

    let (error_kind, content_length) = match res {
        Ok(res) => (status_failure_kind(res.status), res.body_len),
        Err(err) => {
            tracing::debug!(
                vu = ctx.id,
                target_name = template.name.as_deref().unwrap_or("-"),
                error = %err,
                "request failed"
            );
            (Some(err.failure_kind().to_string()), 0)
        }
    };

    // Store first: a stage boundary seen by the tally must never be ahead of the store.
    ctx.store.record(RequestSample {
        elapsed,
        failed: error_kind.is_some(),
        content_length,
        target,
    });

    let event = match error_kind.as_deref() {
        Some(kind) => CompletionEvent::failure(kind),
        None => CompletionEvent::success(),
    };
    ctx.tally.on_complete(
        event
            .with_size_sample(body.size_sample.as_deref())
            .with_target(target),
    );
}
