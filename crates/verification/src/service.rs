use std::sync::Arc;

use chain::HeaderCache;
use consensus::Engine;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::VerifierConfig;
use crate::dispatcher::Dispatcher;
use crate::registry::Registry;
use crate::sweeper::Sweeper;
use crate::types::{AncestorRequest, AncestorResponse, VerificationResult, VerifyBatch};

/// The caller's ends of the four message queues.
#[derive(Debug)]
pub struct Queues {
    /// Submit batches.
    pub batches: mpsc::Sender<VerifyBatch>,
    /// One result per header.
    pub results: mpsc::Receiver<VerificationResult>,
    /// Ancestor fetches for the header-fetching side to serve.
    pub requests: mpsc::Receiver<AncestorRequest>,
    /// Replies to `requests`.
    pub responses: mpsc::Sender<AncestorResponse>,
}

/// A running dispatcher and sweeper pair.
pub struct VerificationService {
    shutdown: CancellationToken,
    registry: Arc<Registry>,
    dispatcher: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl VerificationService {
    /// Spawn both tasks on the current runtime.
    ///
    /// They stop when `shutdown` (or [`VerificationService::shutdown`]) fires.
    pub fn start<E, C>(
        engine: Arc<E>,
        cache: Arc<C>,
        config: VerifierConfig,
        shutdown: CancellationToken,
    ) -> (Self, Queues)
    where
        E: Engine + 'static,
        C: HeaderCache + 'static,
    {
        let shutdown = shutdown.child_token();
        let registry = Arc::new(Registry::new());

        let capacity = config.queue_capacity();
        let (batches_tx, batches_rx) = mpsc::channel(capacity);
        let (results_tx, results_rx) = mpsc::channel(capacity);
        let (requests_tx, requests_rx) = mpsc::channel(capacity);
        let (responses_tx, responses_rx) = mpsc::channel(capacity);
        let (cleanup_tx, cleanup_rx) = mpsc::channel(config.cleanup_capacity());

        let sweeper = Sweeper::new(
            registry.clone(),
            results_tx.clone(),
            config.expiry,
            config.sweep_interval(),
        );
        let dispatcher = Dispatcher::new(
            engine,
            cache,
            registry.clone(),
            config,
            results_tx,
            requests_tx,
            cleanup_tx,
        );

        let sweeper = tokio::spawn(sweeper.run(cleanup_rx, shutdown.clone()));
        let dispatcher = tokio::spawn(dispatcher.run(batches_rx, responses_rx, shutdown.clone()));
        info!(capacity, "verification service started");

        let service = Self {
            shutdown,
            registry,
            dispatcher,
            sweeper,
        };
        let queues = Queues {
            batches: batches_tx,
            results: results_rx,
            requests: requests_rx,
            responses: responses_tx,
        };
        (service, queues)
    }

    /// Headers still waiting on ancestors.
    pub fn pending(&self) -> usize {
        self.registry.pending()
    }

    /// Stop both tasks and wait for them. Entries still pending get no result.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.dispatcher.await {
            error!(err = %e, "dispatcher task failed");
        }
        if let Err(e) = self.sweeper.await {
            error!(err = %e, "sweeper task failed");
        }
        info!(pending = self.registry.pending(), "verification service stopped");
    }
}
