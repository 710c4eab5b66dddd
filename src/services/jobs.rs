//! Background Jobs
//!
//! Runner for the daily ban report: drains the day's violation list from
//! the shared store, aggregates it, and hands the rendered report to the
//! notification sink.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveTime, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{error, info};

use crate::services::ban::{BanRecorder, BanSummary};
use crate::services::counter_store::CounterStoreError;
use crate::services::notifier::Notifier;

/// Configuration for the ban report job
#[derive(Debug, Clone)]
pub struct BanReportJobConfig {
    /// Local hour of day (0-23) at which the report fires
    pub report_hour: u32,
    /// Whether the job is enabled
    pub enabled: bool,
}

impl Default for BanReportJobConfig {
    fn default() -> Self {
        Self {
            report_hour: 6,
            enabled: true,
        }
    }
}

/// Background job runner for the daily ban summary
pub struct BanReportJob {
    recorder: BanRecorder,
    notifier: Arc<dyn Notifier>,
    config: BanReportJobConfig,
}

impl BanReportJob {
    pub fn new(
        recorder: BanRecorder,
        notifier: Arc<dyn Notifier>,
        config: BanReportJobConfig,
    ) -> Self {
        Self {
            recorder,
            notifier,
            config,
        }
    }

    /// Start the report loop.
    ///
    /// Returns a shutdown sender that can be used to stop the job.
    pub fn start(self) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        if !self.config.enabled {
            info!("Ban report job is disabled");
            return shutdown_tx;
        }

        let recorder = self.recorder;
        let notifier = self.notifier;
        let report_hour = self.config.report_hour;

        tokio::spawn(async move {
            info!("Starting ban report job, firing daily at {report_hour:02}:00 local time");

            loop {
                let sleep_for = duration_until_hour(report_hour);

                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {
                        let day = previous_utc_day();
                        if let Err(e) = run_ban_report(&recorder, notifier.as_ref(), day).await {
                            error!("Ban report failed: {e}");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Ban report job shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

/// Time until the next occurrence of the given local hour
fn duration_until_hour(hour: u32) -> Duration {
    let now = Local::now();
    let today_at = now.date_naive().and_time(
        NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN),
    );

    let mut next = match Local.from_local_datetime(&today_at).earliest() {
        Some(dt) => dt,
        None => now, // DST gap; fire immediately rather than never
    };
    if next <= now {
        next += chrono::Duration::days(1);
    }

    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

/// The UTC day the scheduled run reports on.
///
/// Ban lists are bucketed by UTC day. The fire hour falls inside the next
/// day's bucket, so draining anything but the completed previous day would
/// strand every entry recorded after the fire hour.
fn previous_utc_day() -> NaiveDate {
    Utc::now().date_naive().pred_opt().unwrap_or_else(|| Utc::now().date_naive())
}

/// Drain the given day's ban list and deliver the summary.
///
/// Also usable for manual triggering or testing. An empty drain sends no
/// report. Drain and delivery are deliberately not transactional: a crash in
/// between loses one report but never double-processes cleared entries.
pub async fn run_ban_report(
    recorder: &BanRecorder,
    notifier: &dyn Notifier,
    day: NaiveDate,
) -> Result<(), CounterStoreError> {
    let events = recorder.drain_day(day).await?;

    if events.is_empty() {
        info!("No rate-limit violations for {day}, skipping ban report");
        return Ok(());
    }

    let summary = BanSummary::from_events(&events);
    info!(
        "Sending ban report for {day}: {} violations across {} identities",
        summary.total,
        summary.by_identity.len()
    );

    notifier
        .notify(
            &format!("Rate-limit violations for {day}"),
            &summary.render(day),
        )
        .await;

    Ok(())
}
