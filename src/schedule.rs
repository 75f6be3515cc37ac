//! Daily scheduling of pipeline runs.
//!
//! The date of the last completed run is kept in a small state file (`YYYY-MM-DD`), so a
//! restarted scheduler does not run twice on the same day.

use crate::config::ScheduleConfig;
use crate::Result;
use chrono::{DateTime, Local, NaiveDate, Timelike};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const STATE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Whether the daily run is due: the hour has come and today has not been done yet.
pub fn should_run(today: NaiveDate, hour: u32, last_run: Option<NaiveDate>, run_after_hour: u32) -> bool {
    hour >= run_after_hour && last_run != Some(today)
}

/// Reads the last run date. A missing or unreadable state file means "never ran".
pub async fn read_last_run(path: &Path) -> Option<NaiveDate> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    match NaiveDate::parse_from_str(raw.trim(), STATE_DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable schedule state");
            None
        }
    }
}

pub async fn write_last_run(path: &Path, date: NaiveDate) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, date.format(STATE_DATE_FORMAT).to_string()).await?;
    Ok(())
}

/// Runs a job at most once per day, after a configured hour.
pub struct Scheduler {
    config: ScheduleConfig,
}

impl Scheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Self { config }
    }

    /// Runs `job` if it is due at `now`.
    ///
    /// # Returns
    ///
    /// Whether the job ran and succeeded. Only a successful run is recorded, so a failed one
    /// is retried at the next check.
    pub async fn tick<F, Fut, T>(&self, now: DateTime<Local>, job: &F) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let today = now.date_naive();
        let last_run = read_last_run(&self.config.state_file).await;
        if !should_run(today, now.hour(), last_run, self.config.run_after_hour) {
            debug!(%today, ?last_run, "Daily run not due");
            return false;
        }

        info!(%today, "Starting daily run");
        match job().await {
            Ok(_) => {
                if let Err(e) = write_last_run(&self.config.state_file, today).await {
                    error!(path = %self.config.state_file.display(), error = %e, "Could not record run date");
                }
                true
            }
            Err(e) => {
                error!(error = %e, "Daily run failed");
                false
            }
        }
    }

    /// Checks once per interval, forever.
    pub async fn run_forever<F, Fut, T>(&self, job: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let interval = Duration::from_secs(self.config.check_interval_secs.max(1));
        info!(
            run_after_hour = self.config.run_after_hour,
            interval_secs = interval.as_secs(),
            "Scheduler started"
        );

        loop {
            self.tick(Local::now(), &job).await;
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScoutError;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn scheduler() -> (PathBuf, Scheduler) {
        let dir = std::env::temp_dir().join(format!("windscout-schedule-{}", uuid::Uuid::new_v4()));
        let config = ScheduleConfig {
            run_after_hour: 13,
            state_file: dir.join("last_run_date.txt"),
            check_interval_secs: 1,
        };
        (dir, Scheduler::new(config))
    }

    #[test]
    fn test_should_run() {
        let today = date(2024, 6, 1);
        assert!(!should_run(today, 12, None, 13));
        assert!(should_run(today, 13, None, 13));
        assert!(should_run(today, 20, Some(date(2024, 5, 31)), 13));
        assert!(!should_run(today, 20, Some(today), 13));
    }

    #[tokio::test]
    async fn test_tick_runs_once_per_day() {
        let (dir, scheduler) = scheduler();
        let calls = AtomicUsize::new(0);
        let job = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ScoutError>(())
        };

        let morning = Local.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let afternoon = Local.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap();
        let evening = Local.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap();
        let next_day = Local.with_ymd_and_hms(2024, 6, 2, 14, 0, 0).unwrap();

        assert!(!scheduler.tick(morning, &job).await);
        assert!(scheduler.tick(afternoon, &job).await);
        assert!(!scheduler.tick(evening, &job).await);
        assert_eq!(read_last_run(&dir.join("last_run_date.txt")).await, Some(date(2024, 6, 1)));
        assert!(scheduler.tick(next_day, &job).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_failed_run_is_retried() {
        let (dir, scheduler) = scheduler();
        let failing = || async { Err::<(), _>(ScoutError::ScrapeError("offline".into())) };
        let afternoon = Local.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap();

        assert!(!scheduler.tick(afternoon, &failing).await);
        assert_eq!(read_last_run(&dir.join("last_run_date.txt")).await, None);

        let succeeding = || async { Ok::<_, ScoutError>(()) };
        assert!(scheduler.tick(afternoon, &succeeding).await);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_garbage_state_means_never_ran() {
        let (dir, _) = scheduler();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("last_run_date.txt");
        std::fs::write(&path, "yesterday").unwrap();
        assert_eq!(read_last_run(&path).await, None);

        std::fs::write(&path, "2024-06-01\n").unwrap();
        assert_eq!(read_last_run(&path).await, Some(date(2024, 6, 1)));
        let _ = std::fs::remove_dir_all(dir);
    }
}
