use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info};

use crate::database::nonce_repository::NonceRepository;

/// Periodically deletes expired rows from the nonce ledger.
///
/// Expired nonces cannot pass the staleness check anyway, so pruning is
/// purely a size bound on the table.
pub struct NoncePrunerWorker {
    nonces: NonceRepository,
    interval_secs: u64,
}

impl NoncePrunerWorker {
    pub fn new(nonces: NonceRepository, interval_secs: u64) -> Self {
        Self {
            nonces,
            interval_secs,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        info!(
            interval_secs = self.interval_secs,
            "Nonce pruner worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.nonces.prune_expired(Utc::now()).await {
                        Ok(count) => {
                            if count > 0 {
                                info!(pruned = count, "Pruned expired callback nonces");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to prune expired nonces");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Nonce pruner worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
