use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::harvester::Harvester;
use crate::stats::{RunOutcome, RunReport};
use crate::traits::SessionLauncher;

/// One harvest run, logged.
pub async fn run_once<L: SessionLauncher>(harvester: &Harvester, launcher: &L) -> Result<RunReport> {
    let report = harvester.run(launcher).await?;
    log_report(&report);
    Ok(report)
}

/// Run once immediately, then every `interval`, until `shutdown` resolves.
///
/// Runs never overlap: a slow run delays the next tick instead of stacking.
/// A failed run is logged and the loop keeps going. Shutdown is observed
/// between runs, so an in-flight run always finishes and releases its session.
pub async fn run_every<F, Fut, S>(interval: Duration, shutdown: S, mut run: F) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RunReport>>,
    S: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut runs = 0u64;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!(runs, "Shutdown requested, stopping scheduler");
                break;
            }
            _ = ticker.tick() => {}
        }

        runs += 1;
        info!(run = runs, "Scheduled harvest starting");
        match run().await {
            Ok(report) => log_report(&report),
            Err(e) => error!(error = %format!("{e:#}"), "Harvest run failed"),
        }
    }
    runs
}

pub fn log_report(report: &RunReport) {
    info!("{report}");
    if report.outcome() == RunOutcome::CompletedWithErrors {
        warn!(run_id = %report.run_id, "Harvest run completed with errors");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn keeps_running_after_failures_until_shutdown() {
        let calls = Arc::new(AtomicU32::new(0));
        let stop = Arc::new(Notify::new());

        let runs = {
            let calls = calls.clone();
            let stop_signal = stop.clone();
            run_every(
                Duration::from_millis(5),
                async move { stop.notified().await },
                move || {
                    let calls = calls.clone();
                    let stop_signal = stop_signal.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        if n == 3 {
                            stop_signal.notify_one();
                        }
                        if n % 2 == 1 {
                            anyhow::bail!("browser crashed");
                        }
                        Ok(RunReport::new(Utc::now(), None, 0))
                    }
                },
            )
            .await
        };

        assert_eq!(runs, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_once_returns_the_report() {
        use crate::harvester::HarvestSettings;
        use crate::testing::{
            MemoryEvidenceStore, MemoryRecordStore, MemoryWatermarkStore, MockLauncher, MockUnit,
        };
        use harvest_common::{DelayRange, PageLayout};

        let harvester = Harvester::new(
            HarvestSettings {
                group_url: "https://www.facebook.com/groups/g".to_string(),
                keywords: vec!["registrar".to_string()],
                keyword_variants: false,
                layout: PageLayout::default(),
                nav_timeout: Duration::from_secs(1),
                max_scroll_passes: 1,
                max_age: None,
                scroll_delay: DelayRange::ZERO,
                settle_delay: DelayRange::ZERO,
            },
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryWatermarkStore::new()),
            Arc::new(MemoryEvidenceStore::default()),
        );
        let launcher =
            MockLauncher::new(vec![MockUnit::new("Registrar update").with_date_text("1 hr ago")]);

        let report = run_once(&harvester, &launcher).await.unwrap();
        assert_eq!(report.persisted, 1);
        assert_eq!(launcher.probe().closes(), 1);
    }
}
