//! Periodic polling of the sync service.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::sync_service::{Result, SyncPass};

/// Totals across the passes of one poll loop run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Passes started.
    pub passes: u64,
    /// Passes aborted by a transient error.
    pub aborted: u64,
    /// Events created across all passes.
    pub created: usize,
}

/// Runs sync passes on a fixed interval until cancelled.
///
/// Passes never overlap: the next one starts `interval` after the previous
/// one finished. Transient provider failures are logged and retried on the
/// next tick; anything else ends the loop with the error.
#[derive(Debug, Clone)]
pub struct PollService {
    interval: Duration,
}

impl PollService {
    /// Creates a poll loop with the given interval between passes.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Returns the interval between passes.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs passes until `cancel` fires or a non-transient error occurs.
    ///
    /// Cancellation is observed between passes and while sleeping; a pass in
    /// progress is allowed to finish so its records are persisted.
    pub async fn run<P: SyncPass + ?Sized>(
        &self,
        pass: &mut P,
        cancel: CancellationToken,
    ) -> Result<PollSummary> {
        let mut summary = PollSummary::default();
        tracing::info!(interval_secs = self.interval.as_secs_f64(), "Starting poll loop");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            summary.passes += 1;
            match pass.run_once().await {
                Ok(report) => summary.created += report.created.len(),
                Err(e) if e.is_transient() => {
                    summary.aborted += 1;
                    tracing::error!(error = %e, "Sync pass failed, retrying next interval");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Sync pass failed permanently");
                    return Err(e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!(
            passes = summary.passes,
            created = summary.created,
            "Poll loop stopped"
        );
        Ok(summary)
    }
}
