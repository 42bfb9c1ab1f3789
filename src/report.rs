//! Terminal outcome aggregation and the end-of-run summary.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::state_machine::{JobOutcome, JobRecord};

/// Collects exactly one terminal record per job while the run is in flight.
pub struct RunReport {
    total: usize,
    started: Instant,
    records: Mutex<HashMap<String, JobRecord>>,
}

impl RunReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            started: Instant::now(),
            records: Mutex::new(HashMap::with_capacity(total)),
        }
    }

    /// Record a job's terminal outcome. Called exactly once per job; a
    /// duplicate is dropped with a warning so the first record stays
    /// immutable.
    pub fn record(&self, record: JobRecord) {
        let mut records = self.records.lock().expect("run records poisoned");
        if records.contains_key(&record.job_id) {
            warn!(job = %record.job_id, "duplicate terminal record dropped");
            debug_assert!(false, "terminal outcome recorded twice for {}", record.job_id);
            return;
        }
        records.insert(record.job_id.clone(), record);
    }

    /// Seal the report once every job has drained.
    pub fn finalize(self) -> RunSummary {
        let wall_time = self.started.elapsed();
        let mut records: Vec<JobRecord> = self
            .records
            .into_inner()
            .expect("run records poisoned")
            .into_values()
            .collect();
        records.sort_by(|a, b| a.job_id.cmp(&b.job_id));

        RunSummary {
            total: self.total,
            wall_time,
            records,
        }
    }
}

/// The immutable end-of-run summary.
#[derive(Debug)]
pub struct RunSummary {
    /// Number of input items admitted to the run.
    pub total: usize,
    pub wall_time: Duration,
    /// One record per job, sorted by job id.
    pub records: Vec<JobRecord>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome.is_success())
            .count()
    }

    pub fn cancelled(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, JobOutcome::Cancelled { .. }))
            .count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded() == self.total
    }

    /// Failures grouped by failing stage and reason, for scanability.
    pub fn failure_groups(&self) -> BTreeMap<String, Vec<&str>> {
        let mut groups: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for record in &self.records {
            let key = match &record.outcome {
                JobOutcome::Failed { stage, reason } => format!("{stage} — {reason}"),
                JobOutcome::Cancelled { stage } => format!("{stage} — cancelled"),
                JobOutcome::Succeeded { .. } => continue,
            };
            groups.entry(key).or_default().push(&record.job_id);
        }
        groups
    }

    /// Render the summary banner.
    pub fn render(&self) -> String {
        let rule = "=".repeat(60);
        let failed = self.total - self.succeeded();
        let mut out = String::new();

        out.push_str(&format!("\n{rule}\n"));
        out.push_str(&format!(
            "Jobs: {} | Failed: {} | Successful: {}\n",
            self.total,
            failed,
            self.succeeded()
        ));
        if self.cancelled() > 0 {
            out.push_str(&format!("Cancelled: {}\n", self.cancelled()));
        }

        let success_durations: Vec<f64> = self
            .records
            .iter()
            .filter(|r| r.outcome.is_success())
            .map(|r| r.duration_ms as f64 / 1000.0)
            .collect();
        if !success_durations.is_empty() {
            let avg = success_durations.iter().sum::<f64>() / success_durations.len() as f64;
            out.push_str(&format!(
                "Total time: {} | Avg per job: {}\n",
                fmt_duration(self.wall_time.as_secs_f64()),
                fmt_duration(avg)
            ));
        }

        let groups = self.failure_groups();
        if !groups.is_empty() {
            out.push_str("Failures by stage:\n");
            for (key, jobs) in &groups {
                out.push_str(&format!("  {key}: {}\n", jobs.join(", ")));
            }
        }

        out.push_str(&format!("{rule}\n"));
        out
    }
}

/// Seconds below two minutes, minutes above.
pub fn fmt_duration(secs: f64) -> String {
    if secs < 120.0 {
        format!("{secs:.1}s")
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}
