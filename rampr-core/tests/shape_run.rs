use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use rampr_core::{
    CapacityThresholds, CompletionEvent, EventTally, ManualClock, PayloadMetric, RunInfo,
    StageDef, StagePlan, StageScheduler, Tick, analyze, assemble,
};
use rampr_metrics::{CumulativeSource as _, RequestSample, StatsStore};

fn plan() -> StagePlan {
    StagePlan::new(vec![
        StageDef::new("Warm (2 users)", 2.0, 2, 1.0),
        StageDef::new("Push (4 users)", 4.0, 4, 2.0),
        StageDef::new("Peak (8 users)", 6.0, 8, 4.0),
    ])
    .unwrap_or_else(|e| panic!("{e}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_reconcile_with_the_store() {
    let store = Arc::new(StatsStore::with_targets(["asr", "nmt"]));
    let tally = Arc::new(EventTally::with_targets(
        Some(PayloadMetric::TextChars),
        ["asr", "nmt"],
    ));
    let clock = Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH));
    let mut scheduler =
        StageScheduler::with_clock(plan(), store.clone(), tally.clone(), clock.clone());

    let running = Arc::new(AtomicBool::new(true));
    let mut workers = Vec::new();
    for w in 0..16u64 {
        let store = store.clone();
        let tally = tally.clone();
        let running = running.clone();
        workers.push(tokio::spawn(async move {
            let mut i = 0u64;
            while running.load(Ordering::Relaxed) {
                let failed = (w + i) % 7 == 0;
                let target = Some(((w + i) % 2) as usize);
                store.record(RequestSample {
                    elapsed: Duration::from_millis(5 + (i % 10)),
                    failed,
                    content_length: 16,
                    target,
                });
                let event = if failed {
                    CompletionEvent::failure(if i % 2 == 0 { "HTTP_500" } else { "HTTP_503" })
                } else {
                    CompletionEvent::success()
                };
                tally.on_complete(event.with_size_sample(Some("hello")).with_target(target));
                i += 1;
                tokio::task::yield_now().await;
            }
        }));
    }

    let mut elapsed = 0.0;
    loop {
        let tick = scheduler.tick(elapsed);
        if tick == Tick::Terminated {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        clock.advance(Duration::from_millis(500));
        elapsed += 0.5;
    }

    running.store(false, Ordering::Relaxed);
    for w in workers {
        w.await.unwrap_or_else(|e| panic!("{e}"));
    }

    assert!(scheduler.stop_signal().is_stopped());
    let issues = scheduler.plan().issues().to_vec();
    let records = scheduler.into_records();
    assert_eq!(records.len(), 3);

    let overall = store.snapshot();
    let tally_snapshot = tally.snapshot();

    // Every failure the store saw shows up in the tally, across stages and the tail.
    assert_eq!(tally_snapshot.total_errors(), overall.failures);
    assert_eq!(tally_snapshot.events_total, overall.requests);
    let per_stage: u64 = tally_snapshot
        .per_stage
        .iter()
        .flat_map(|s| s.errors.values())
        .sum();
    let unattributed: u64 = tally_snapshot.unattributed.values().sum();
    assert_eq!(per_stage + unattributed, tally_snapshot.total_errors());

    let thresholds = CapacityThresholds::default();
    let verdict = analyze(&records, &issues, &thresholds);
    let report = assemble(
        RunInfo {
            service: "shape-run".to_string(),
            target: None,
            start_time: SystemTime::UNIX_EPOCH,
            total_duration_seconds: elapsed,
            planned_duration_seconds: 6.0,
            stage_count: 3,
            shape_issues: issues,
            thresholds,
        },
        &overall,
        &store.target_snapshots(),
        records,
        &tally_snapshot,
        verdict,
    );

    let stage_total: u64 = report.stage_by_stage_metrics.iter().map(|r| r.requests).sum();
    assert_eq!(report.validation.stage_total_requests, stage_total);
    assert_eq!(
        report.validation.discrepancy,
        stage_total as i64 - overall.requests as i64
    );
    assert!(report.validation.discrepancy <= 0);

    let payload = report
        .overall_statistics
        .payload_stat
        .unwrap_or_else(|| panic!("payload stat missing"));
    assert_eq!(payload.count, overall.requests);
    assert_eq!(payload.median, 5.0);

    // Per-target figures partition the run.
    let services: Vec<_> = report.per_service_metrics.iter().collect();
    assert_eq!(services.len(), 2);
    assert_eq!(
        services.iter().map(|s| s.total_requests).sum::<u64>(),
        overall.requests
    );
    assert_eq!(
        services.iter().map(|s| s.failed_requests).sum::<u64>(),
        overall.failures
    );
    for s in &services {
        let errors: u64 = s.error_codes.values().sum();
        assert_eq!(errors, s.failed_requests, "{}", s.name);
        let p = s.payload_stat.as_ref().unwrap_or_else(|| panic!("{} payload", s.name));
        assert_eq!(p.count, s.total_requests);
    }
}
