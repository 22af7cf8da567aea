use crate::error::AppError;
use crate::repository::{RefreshTokenRepository, UsedTokenRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub refresh_tokens_deleted: u64,
    pub ledger_entries_purged: u64,
}

/// Deletes expired refresh grants and purges ledger entries past their copied expiry.
#[derive(Debug)]
pub struct TokenCleanupWorker {
    refresh_tokens: Arc<dyn RefreshTokenRepository>,
    used_tokens: Arc<dyn UsedTokenRepository>,
    cleanup_interval_secs: u64,
}

impl TokenCleanupWorker {
    #[must_use]
    pub fn new(
        refresh_tokens: Arc<dyn RefreshTokenRepository>,
        used_tokens: Arc<dyn UsedTokenRepository>,
        cleanup_interval_secs: u64,
    ) -> Self {
        Self { refresh_tokens, used_tokens, cleanup_interval_secs }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if self.cleanup_interval_secs == 0 {
            tracing::info!("Token cleanup is disabled (interval = 0)");
            return;
        }

        let mut interval = tokio::time::interval(Duration::from_secs(self.cleanup_interval_secs));

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.perform_cleanup()
                        .instrument(tracing::info_span!("run_token_cleanup"))
                        .await
                    {
                        tracing::error!(error = ?e, "Token cleanup iteration failed");
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Token cleanup loop shutting down...");
    }

    /// Runs one purge pass over both stores.
    ///
    /// # Errors
    /// Returns the first storage error; the other store is still attempted.
    #[tracing::instrument(
        skip(self),
        err,
        fields(expired_deleted = tracing::field::Empty, ledger_purged = tracing::field::Empty)
    )]
    pub async fn perform_cleanup(&self) -> Result<CleanupReport, AppError> {
        tracing::debug!("Running token cleanup...");

        let (grants, ledger) = tokio::join!(self.refresh_tokens.delete_expired(), self.used_tokens.purge_expired());

        let mut report = CleanupReport::default();
        let mut first_error = None;

        match grants {
            Ok(count) => {
                report.refresh_tokens_deleted = count;
                if count > 0 {
                    tracing::info!(count = %count, "Deleted expired refresh tokens");
                    tracing::Span::current().record("expired_deleted", count);
                }
            }
            Err(e) => first_error = Some(e),
        }

        match ledger {
            Ok(count) => {
                report.ledger_entries_purged = count;
                if count > 0 {
                    tracing::info!(count = %count, "Purged expired used-token ledger entries");
                    tracing::Span::current().record("ledger_purged", count);
                }
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    tracing::error!(error = ?e, "Cleanup error (used token ledger)");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}
