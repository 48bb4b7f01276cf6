//! Tick scheduler
//!
//! Fires a blocking job on a fixed cadence aligned to wall-clock time
//! (every minute at :02 by default). The job runs on tokio's blocking
//! pool and is awaited before the next tick is computed, so cycles never
//! overlap. A slow cycle simply skips the ticks it ran over.

use chrono::{DateTime, TimeZone, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::ScheduleConfig;

/// Next fire time strictly after `now`
pub fn next_fire(now: DateTime<Utc>, schedule: &ScheduleConfig) -> DateTime<Utc> {
    let interval = schedule.interval_secs.max(1) as i64;
    let offset = (schedule.at_second as i64) % interval;

    let slot = (now.timestamp() - offset).div_euclid(interval) + 1;
    let fire = slot * interval + offset;

    Utc.timestamp_opt(fire, 0).single().unwrap_or(now)
}

/// Run `job` on every tick until Ctrl-C
pub async fn run<F>(schedule: ScheduleConfig, job: Arc<F>)
where
    F: Fn() + Send + Sync + 'static,
{
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    run_until(schedule, job, ctrl_c).await;
}

/// Run `job` on every tick until `shutdown` resolves.
///
/// `shutdown` is polled between cycles only; a signal that arrives while a
/// cycle is running stops the loop once that cycle returns.
pub async fn run_until<F, S>(schedule: ScheduleConfig, job: Arc<F>, shutdown: S)
where
    F: Fn() + Send + Sync + 'static,
    S: Future<Output = ()>,
{
    info!(
        "Scheduled job every {}s at offset {}s",
        schedule.interval_secs, schedule.at_second
    );
    tokio::pin!(shutdown);

    loop {
        let now = Utc::now();
        let fire = next_fire(now, &schedule);
        let wait = (fire - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, stopping scheduler");
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let job = Arc::clone(&job);
        if let Err(e) = tokio::task::spawn_blocking(move || job()).await {
            error!("Scheduled job panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_every_minute_at_second_two() {
        let schedule = ScheduleConfig::default();
        assert_eq!(next_fire(at(10, 0, 0), &schedule), at(10, 0, 2));
        assert_eq!(next_fire(at(10, 0, 1), &schedule), at(10, 0, 2));
        assert_eq!(next_fire(at(10, 0, 2), &schedule), at(10, 1, 2));
        assert_eq!(next_fire(at(10, 0, 59), &schedule), at(10, 1, 2));
    }

    #[test]
    fn test_custom_interval() {
        let schedule = ScheduleConfig {
            interval_secs: 300,
            at_second: 0,
        };
        assert_eq!(next_fire(at(10, 2, 30), &schedule), at(10, 5, 0));
        assert_eq!(next_fire(at(10, 5, 0), &schedule), at(10, 10, 0));
    }

    #[tokio::test]
    async fn test_job_runs_on_tick() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let job = Arc::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let schedule = ScheduleConfig {
            interval_secs: 1,
            at_second: 0,
        };
        let handle = tokio::spawn(run(schedule, job));
        for _ in 0..50 {
            if counter.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        handle.abort();

        assert!(counter.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_shutdown_during_cycle_stops_after_it() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::sync::Notify;

        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(Notify::new());

        let seen = Arc::clone(&runs);
        let signal = Arc::clone(&shutdown);
        let job = Arc::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            signal.notify_one();
            std::thread::sleep(std::time::Duration::from_millis(200));
        });

        let schedule = ScheduleConfig {
            interval_secs: 1,
            at_second: 0,
        };
        let stopped = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            run_until(schedule, job, async move { shutdown.notified().await }),
        )
        .await;

        assert!(stopped.is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
