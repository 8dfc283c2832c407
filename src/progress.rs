//! Terminal progress for the re-tag run.
//!
//! Interactive runs draw an indicatif bar whose message tracks the running
//! updated/skipped/missing tally. With `--log-only` nothing is drawn and the
//! same tally is logged every `LOG_EVERY` albums and once at the end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;

const BAR_TEMPLATE: &str = "{prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta}) {msg}";
const SPINNER_TEMPLATE: &str = "{msg} {spinner} [{elapsed_precise}]";
const LOG_EVERY: u64 = 500;

static LOG_ONLY: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

/// What happened to one album in a re-tag run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumOutcome {
    Updated,
    UpToDate,
    Missing,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    updated: u64,
    up_to_date: u64,
    missing: u64,
}

impl Tally {
    fn record(&mut self, outcome: AlbumOutcome) {
        match outcome {
            AlbumOutcome::Updated => self.updated += 1,
            AlbumOutcome::UpToDate => self.up_to_date += 1,
            AlbumOutcome::Missing => self.missing += 1,
        }
    }

    fn done(&self) -> u64 {
        self.updated + self.up_to_date + self.missing
    }

    fn message(&self) -> String {
        format!(
            "updated {}, up-to-date {}, missing {}",
            self.updated, self.up_to_date, self.missing
        )
    }
}

/// Progress over the albums of one re-tag run.
pub struct RetagProgress {
    bar: ProgressBar,
    total: u64,
    tally: Tally,
    log_only: bool,
}

impl RetagProgress {
    pub fn new(total: u64) -> Self {
        let log_only = is_log_only();
        let bar = ProgressBar::new(total);
        if log_only {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        } else {
            let style = ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ");
            bar.set_style(style);
            bar.set_prefix("Re-tagging");
        }
        Self {
            bar,
            total,
            tally: Tally::default(),
            log_only,
        }
    }

    pub fn record(&mut self, outcome: AlbumOutcome) {
        self.tally.record(outcome);
        let done = self.tally.done();
        if self.log_only {
            if done % LOG_EVERY == 0 && done != self.total {
                self.log_line();
            }
        } else {
            self.bar.set_message(self.tally.message());
            self.bar.inc(1);
        }
    }

    fn log_line(&self) {
        let pct = if self.total == 0 {
            100.0
        } else {
            100.0 * self.tally.done() as f64 / self.total as f64
        };
        info!("[retag] {}/{} ({:.1}%): {}", self.tally.done(), self.total, pct, self.tally.message());
    }

    pub fn finish(self) {
        if self.log_only {
            self.log_line();
        } else {
            self.bar.finish_with_message(self.tally.message());
        }
    }
}

/// Run `f` behind a spinner (hidden in log-only mode).
pub fn with_spinner<T>(msg: &str, f: impl FnOnce() -> T) -> T {
    let spinner = ProgressBar::new_spinner();
    if is_log_only() {
        spinner.set_draw_target(ProgressDrawTarget::hidden());
        info!("{}", msg);
    } else {
        let style = ProgressStyle::default_spinner()
            .template(SPINNER_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(100));
    }
    spinner.set_message(msg.to_string());
    let value = f();
    spinner.finish_and_clear();
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.5m");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1.5h");
    }

    #[test]
    fn test_tally_message() {
        let mut tally = Tally::default();
        for outcome in [AlbumOutcome::Updated, AlbumOutcome::Missing, AlbumOutcome::Updated] {
            tally.record(outcome);
        }
        assert_eq!(tally.done(), 3);
        assert_eq!(tally.message(), "updated 2, up-to-date 0, missing 1");
    }

    #[test]
    fn test_progress_counts_outcomes() {
        let mut progress = RetagProgress::new(2);
        progress.record(AlbumOutcome::UpToDate);
        progress.record(AlbumOutcome::Missing);
        assert_eq!(progress.tally.done(), 2);
        progress.finish();

        assert_eq!(with_spinner("loading", || 7), 7);
    }
}
