//! Console rendering of a `clean` pass.

use std::fmt::Write;

use jobhouse_core::{Job, Worker};
use jobhouse_infra::manager::CleanReport;

pub(crate) fn render_clean(report: &CleanReport) -> String {
    let mut out = String::new();
    render_workers(&mut out, &report.workers);
    out.push('\n');
    render_jobs(
        &mut out,
        "Resetting stuck jobs:",
        "Resetting",
        "jobs",
        "- No stuck jobs",
        &report.stuck,
    );
    out.push('\n');
    render_jobs(
        &mut out,
        "Rotating old jobs:",
        "Rotating",
        "old jobs",
        "- No old jobs to rotate",
        &report.rotated,
    );
    out
}

fn render_workers(out: &mut String, workers: &[Worker]) {
    let _ = writeln!(out, "Cleaning stale workers:");
    if workers.is_empty() {
        let _ = writeln!(out, "- No stale workers");
        return;
    }
    let _ = writeln!(out, "Deleting {} workers:", workers.len());
    for w in workers {
        let _ = writeln!(
            out,
            "- #{}:{} (queues: {})",
            w.id.get(),
            w.token,
            w.queues.join(", ")
        );
    }
}

fn render_jobs(out: &mut String, heading: &str, verb: &str, noun: &str, empty: &str, jobs: &[Job]) {
    let _ = writeln!(out, "{heading}");
    if jobs.is_empty() {
        let _ = writeln!(out, "{empty}");
        return;
    }
    let _ = writeln!(out, "{verb} {} {noun}:", jobs.len());
    for j in jobs {
        let _ = writeln!(out, "- {}:#{}", j.task, j.id.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use jobhouse_core::{JobId, JobStatus, WorkerId};

    fn worker() -> Worker {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Worker {
            id: WorkerId::new(3),
            token: "host:42:abcd".into(),
            queues: vec!["jobhouse.default".into(), "jobhouse.priority".into()],
            heartbeat: at,
            created: at,
            modified: at,
        }
    }

    fn job(id: i64) -> Job {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Job {
            id: JobId::new(id),
            queue: "jobhouse.default".into(),
            task: "app.mail".into(),
            data: serde_json::Value::Null,
            status: JobStatus::Pending,
            worker_id: None,
            available_at: at,
            started: None,
            finished: None,
            errors: Vec::new(),
            attempts: 0,
            created: at,
            modified: at,
        }
    }

    #[test]
    fn empty_report() {
        let text = render_clean(&CleanReport::default());
        assert_eq!(
            text,
            "Cleaning stale workers:\n- No stale workers\n\n\
             Resetting stuck jobs:\n- No stuck jobs\n\n\
             Rotating old jobs:\n- No old jobs to rotate\n"
        );
    }

    #[test]
    fn lists_each_item() {
        let report = CleanReport {
            workers: vec![worker()],
            stuck: vec![job(7)],
            rotated: vec![job(1), job(2)],
        };
        let text = render_clean(&report);
        assert!(text.contains(
            "Deleting 1 workers:\n- #3:host:42:abcd (queues: jobhouse.default, jobhouse.priority)\n"
        ));
        assert!(text.contains("Resetting 1 jobs:\n- app.mail:#7\n"));
        assert!(text.contains("Rotating 2 old jobs:\n- app.mail:#1\n- app.mail:#2\n"));
    }
}
