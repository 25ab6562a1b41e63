use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::ui::icons::{CHECK, CROSS, RUNNING, SKIPPED, SPARKLE};

/// Step-by-step progress for one pipeline run.
///
/// A single bar counts completed steps; finished steps are printed above it
/// so the terminal keeps a log of what the run did. Output goes to stderr,
/// leaving stdout free for scripting.
pub struct PipelineProgress {
    bar: ProgressBar,
    completed: AtomicUsize,
    skipped: AtomicUsize,
}

impl PipelineProgress {
    pub fn new(pipeline: &str, total_steps: u64) -> Self {
        let style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");
        let bar = ProgressBar::with_draw_target(Some(total_steps), ProgressDrawTarget::stderr());
        bar.set_style(style);
        bar.set_prefix(pipeline.to_string());
        Self {
            bar,
            completed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    /// Progress that tracks steps but draws nothing.
    pub fn hidden(total_steps: u64) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total_steps);
        Self {
            bar,
            completed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.bar.is_hidden() {
            return;
        }
        self.bar.println(msg.as_ref());
    }

    pub fn start_step(&self, description: &str) {
        self.bar
            .set_message(format!("{}{}", RUNNING, style(description).yellow()));
        self.bar.enable_steady_tick(Duration::from_millis(120));
    }

    pub fn step_done(&self, description: &str) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.bar.inc(1);
        self.print_line(format!("{}{}", CHECK, description));
    }

    /// A step that had nothing to do (e.g. resource already absent).
    pub fn step_skipped(&self, description: &str, reason: &str) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.bar.inc(1);
        self.print_line(format!(
            "{}{} {}",
            SKIPPED,
            description,
            style(format!("({reason})")).dim()
        ));
    }

    pub fn step_failed(&self, description: &str, error: &str) {
        self.print_line(format!(
            "{}{}: {}",
            CROSS,
            style(description).red(),
            style(error).red()
        ));
        self.bar.abandon_with_message(format!("{} failed", description));
    }

    pub fn finish(&self, summary: &str) {
        self.bar.disable_steady_tick();
        self.bar
            .finish_with_message(format!("{}{}", SPARKLE, style(summary).green().bold()));
    }

    /// Number of steps reported done or skipped.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Steps counted in [`completed`](Self::completed) that had nothing to do.
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }
}
