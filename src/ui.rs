//! Live terminal board: one progress row per job, colored result lines.
//!
//! Jobs publish stage transitions fire-and-forget; rendering is indicatif's
//! problem and never blocks a job. Alongside the bars the board keeps a
//! plain snapshot map so the current state can be read back without
//! scraping the terminal.

use std::collections::HashMap;
use std::sync::Mutex;

use console::Style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::state_machine::Stage;

struct Row {
    bar: ProgressBar,
    stage: Stage,
    attempts: u32,
}

/// Fixed multi-row dashboard for a run.
pub struct ProgressBoard {
    multi: MultiProgress,
    rows: Mutex<HashMap<String, Row>>,
    green: Style,
    red: Style,
    yellow: Style,
}

impl ProgressBoard {
    /// Board drawing to stderr; silent when stderr is not a terminal.
    pub fn new() -> Self {
        let multi = if console::user_attended_stderr() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        Self::with_multi(multi)
    }

    /// Board that never draws. Used in tests.
    pub fn hidden() -> Self {
        Self::with_multi(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()))
    }

    fn with_multi(multi: MultiProgress) -> Self {
        Self {
            multi,
            rows: Mutex::new(HashMap::new()),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Add a row for a job. Call once per job before any updates.
    pub fn register(&self, job_id: &str) {
        let bar = self.multi.add(ProgressBar::new(100));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg:<40} {percent:>3}%|{bar:30.cyan/blue}| [{elapsed}]")
                .expect("invalid progress template"),
        );
        bar.set_message(format!("[{job_id}] {}", Stage::Queued));
        bar.enable_steady_tick(std::time::Duration::from_millis(100));

        let mut rows = self.rows.lock().expect("progress rows poisoned");
        rows.insert(
            job_id.to_string(),
            Row {
                bar,
                stage: Stage::Queued,
                attempts: 0,
            },
        );
    }

    /// Record a stage transition (or a new attempt of the same stage).
    pub fn update(&self, job_id: &str, stage: Stage, attempts: u32) {
        let mut rows = self.rows.lock().expect("progress rows poisoned");
        let Some(row) = rows.get_mut(job_id) else {
            return;
        };
        row.stage = stage;
        row.attempts = attempts;

        let label = if attempts > 1 {
            format!("[{job_id}] {stage} (attempt {attempts})")
        } else {
            format!("[{job_id}] {stage}")
        };
        row.bar.set_position(stage.percent());
        row.bar.set_message(label);
    }

    /// Print a retry notice above the bars.
    pub fn retrying(&self, job_id: &str, attempt: u32, max: u32, reason: &str, delay_ms: u64) {
        let _ = self.multi.println(format!(
            "  {} [{job_id}] retry {attempt}/{max}: {reason} (waiting {delay_ms}ms)",
            self.yellow.apply_to("↻"),
        ));
    }

    /// Finish a job's row in green.
    pub fn finish_success(&self, job_id: &str, message: &str) {
        let mut rows = self.rows.lock().expect("progress rows poisoned");
        if let Some(row) = rows.get_mut(job_id) {
            row.stage = Stage::Succeeded;
            row.bar.set_position(100);
            row.bar
                .finish_with_message(format!("[{job_id}] {} {message}", self.green.apply_to("✓")));
        }
    }

    /// Finish a job's row in red, keeping the position it failed at.
    pub fn finish_failure(&self, job_id: &str, message: &str) {
        let rows = self.rows.lock().expect("progress rows poisoned");
        if let Some(row) = rows.get(job_id) {
            row.bar
                .abandon_with_message(format!("[{job_id}] {} {message}", self.red.apply_to("✗")));
        }
    }

    /// Current (stage, attempts) per job.
    pub fn snapshot(&self) -> HashMap<String, (Stage, u32)> {
        let rows = self.rows.lock().expect("progress rows poisoned");
        rows.iter()
            .map(|(id, row)| (id.clone(), (row.stage, row.attempts)))
            .collect()
    }
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new()
    }
}
