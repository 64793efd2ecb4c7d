use std::fmt::Write as _;
use std::path::Path;

use rampr_core::Report;

use super::format::*;

pub(crate) fn render(report: &Report, saved_to: &Path) -> String {
    let mut out = String::new();
    let info = &report.test_info;
    let overall = &report.overall_statistics;

    writeln!(&mut out, "summary: {}", info.service).ok();
    writeln!(
        &mut out,
        "  duration: {} (planned {})",
        format_seconds(info.total_duration_seconds),
        format_seconds(info.planned_duration_seconds)
    )
    .ok();
    writeln!(
        &mut out,
        "  requests: {} (failed {}) rps={} errors={}",
        overall.total_requests,
        overall.failed_requests,
        format_rate(overall.requests_per_second),
        format_pct(overall.error_rate)
    )
    .ok();
    writeln!(
        &mut out,
        "  latency: avg={} p50={} p95={} p99={} max={}",
        format_latency_ms(overall.latency.avg),
        format_latency_ms(overall.latency.median),
        format_latency_ms(overall.latency.p95),
        format_latency_ms(overall.latency.p99),
        format_latency_ms(overall.latency.max)
    )
    .ok();
    if let Some(p) = &overall.payload_stat {
        writeln!(
            &mut out,
            "  payload ({}): n={} avg={:.2} median={:.2} max={:.2} {}",
            p.metric, p.count, p.avg, p.median, p.max, p.unit
        )
        .ok();
    }

    out.push_str("\nstages\n");
    for r in report.stage_by_stage_metrics.iter() {
        let health = report
            .capacity_analysis
            .health_of(&r.label)
            .map_or_else(|| "-".to_string(), |h| h.to_string());
        writeln!(
            &mut out,
            "  {:<40} users={:<4} requests={:<7} rps={:<8} errors={:<8} p95={:<8} {}",
            r.label,
            r.target_concurrency,
            r.requests,
            format_rate(r.throughput_rps),
            format_pct(r.error_rate),
            format_latency_ms(r.latency.p95),
            health
        )
        .ok();
    }

    if !report.per_service_metrics.is_empty() {
        out.push_str("\nservices\n");
        for svc in report.per_service_metrics.iter() {
            write!(
                &mut out,
                "  {:<24} requests={:<7} rps={:<8} errors={:<8} p95={:<8}",
                svc.name,
                svc.total_requests,
                format_rate(svc.requests_per_second),
                format_pct(svc.error_rate),
                format_latency_ms(svc.latency.p95)
            )
            .ok();
            if let Some(top) = svc.top_errors.first() {
                write!(&mut out, " top={} x{}", top.code, top.count).ok();
            }
            out.push('\n');
        }
    }

    if !report.error_analysis.top_errors.is_empty() {
        out.push_str("\nerrors\n");
        for e in &report.error_analysis.top_errors {
            writeln!(&mut out, "  {}: {} ({:.1}%)", e.code, e.count, e.percentage).ok();
        }
    }

    let cap = &report.capacity_analysis;
    out.push_str("\ncapacity\n");
    writeln!(
        &mut out,
        "  healthy={} degraded={} failed={}",
        cap.healthy_stages.len(),
        cap.degraded_stages.len(),
        cap.failed_stages.len()
    )
    .ok();
    if let Some(bp) = &cap.breaking_point {
        writeln!(&mut out, "  breaking point: {bp}").ok();
    }
    match cap.max_healthy_capacity {
        Some(n) => writeln!(&mut out, "  max healthy capacity: {n} users").ok(),
        None => writeln!(&mut out, "  max healthy capacity: none").ok(),
    };
    for ex in &cap.excluded_stages {
        writeln!(&mut out, "  excluded {}: {}", ex.stage, ex.reasons.join("; ")).ok();
    }
    for note in &cap.notes {
        writeln!(&mut out, "  note: {note}").ok();
    }

    let rec = &report.recommendations;
    out.push_str("\nrecommendations\n");
    writeln!(&mut out, "  {}", rec.production_capacity).ok();
    for item in rec.optimization_priority.iter().chain(&rec.action_items) {
        writeln!(&mut out, "  - {item}").ok();
    }

    if report.validation.discrepancy != 0 || report.validation.late_events > 0 {
        writeln!(&mut out, "\nnote: {}", report.validation.note).ok();
    }

    writeln!(&mut out, "\nreport: {}", saved_to.display()).ok();
    out
}
