use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::config::ExpiryScope;
use crate::error::VerifyError;
use crate::registry::Registry;
use crate::types::{Finished, VerificationResult};

/// Times out overdue pending verifications and removes resolved ones.
pub struct Sweeper {
    registry: Arc<Registry>,
    results: mpsc::Sender<VerificationResult>,
    scope: ExpiryScope,
    period: Duration,
}

impl Sweeper {
    pub(crate) fn new(
        registry: Arc<Registry>,
        results: mpsc::Sender<VerificationResult>,
        scope: ExpiryScope,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            results,
            scope,
            period,
        }
    }

    pub(crate) async fn run(self, mut finished: mpsc::Receiver<Finished>, shutdown: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // skip first immediate tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("sweeper shutting down");
                    break;
                }
                Some(done) = finished.recv() => {
                    if !self.registry.remove(done.id, done.number) {
                        trace!(id = done.id, number = done.number, "nothing to remove");
                    }
                }
                _ = ticker.tick() => {
                    self.sweep(Instant::now()).await;
                }
            }
        }
    }

    /// Fail every entry the expiry scope says is overdue at `now`. Returns how
    /// many timed out.
    pub async fn sweep(&self, now: Instant) -> usize {
        let expired = self.registry.drain_expired(now, self.scope);
        if expired.is_empty() {
            return 0;
        }

        let count = expired.len();
        warn!(count, scope = ?self.scope, "pending verifications timed out");
        for entry in expired {
            let result = VerificationResult::failed(entry.id, entry.hash(), VerifyError::Timeout);
            if self.results.send(result).await.is_err() {
                error!("result queue closed");
                break;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PendingVerification;
    use chain::{BlockHeader, SealedHeader};

    fn pending(id: u64, number: u64, deadline: Instant) -> PendingVerification {
        let header = SealedHeader::shared(BlockHeader {
            number,
            ..Default::default()
        });
        PendingVerification::new(id, header, true, deadline, Vec::new(), 1)
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reports_each_timeout_once() {
        let registry = Arc::new(Registry::new());
        let (tx, mut rx) = mpsc::channel(8);
        let sweeper = Sweeper::new(registry.clone(), tx, ExpiryScope::Request, Duration::from_secs(1));

        let now = Instant::now();
        registry.put(pending(1, 10, now)).unwrap();
        registry.put(pending(1, 11, now + Duration::from_secs(60))).unwrap();

        assert_eq!(sweeper.sweep(now).await, 2);
        assert_eq!(sweeper.sweep(now).await, 0);
        for _ in 0..2 {
            assert_eq!(rx.recv().await.unwrap().error, Some(VerifyError::Timeout));
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_evicts_and_expires() {
        let registry = Arc::new(Registry::new());
        let (tx, mut rx) = mpsc::channel(8);
        let (done_tx, done_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let sweeper = Sweeper::new(registry.clone(), tx, ExpiryScope::Entry, Duration::from_millis(100));

        let now = Instant::now();
        registry.put(pending(1, 10, now + Duration::from_secs(5))).unwrap();
        registry.put(pending(2, 20, now + Duration::from_secs(60))).unwrap();
        registry.claim(2, 20);

        let task = tokio::spawn(sweeper.run(done_rx, shutdown.clone()));
        done_tx.send(Finished { id: 2, number: 20 }).await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        let result = rx.recv().await.unwrap();
        assert_eq!(result.id, 1);
        assert_eq!(result.error, Some(VerifyError::Timeout));
        assert!(registry.is_empty());

        shutdown.cancel();
        task.await.unwrap();
    }
}
