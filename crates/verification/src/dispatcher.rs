use std::sync::Arc;

use alloy_primitives::B256;
use chain::{HeaderCache, HeaderRef};
use consensus::Engine;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ancestors::{fold, merge_requests, resolve, BatchView, DedupIndex};
use crate::config::VerifierConfig;
use crate::error::VerifyError;
use crate::registry::{PendingVerification, Registry};
use crate::types::{
    AncestorRequest, AncestorResponse, Finished, VerificationResult, VerifyBatch,
};

/// Outcome of trying to verify one entry.
#[derive(Debug)]
enum Attempt {
    /// Not every ancestor is known yet.
    Incomplete,
    /// Every ancestor is known but one is still pending under the same id.
    Waiting,
    Done(Result<(), VerifyError>),
}

/// Drives batches and ancestor responses through resolution, the registry and
/// the rule engine.
pub struct Dispatcher<E, C> {
    engine: Arc<E>,
    cache: Arc<C>,
    registry: Arc<Registry>,
    config: VerifierConfig,
    results: mpsc::Sender<VerificationResult>,
    requests: mpsc::Sender<AncestorRequest>,
    cleanup: mpsc::Sender<Finished>,
}

impl<E, C> Dispatcher<E, C>
where
    E: Engine + 'static,
    C: HeaderCache + 'static,
{
    pub(crate) fn new(
        engine: Arc<E>,
        cache: Arc<C>,
        registry: Arc<Registry>,
        config: VerifierConfig,
        results: mpsc::Sender<VerificationResult>,
        requests: mpsc::Sender<AncestorRequest>,
        cleanup: mpsc::Sender<Finished>,
    ) -> Self {
        Self {
            engine,
            cache,
            registry,
            config,
            results,
            requests,
            cleanup,
        }
    }

    /// Serve both input queues until shutdown, or until both are closed.
    ///
    /// Responses are taken ahead of new batches. A message being handled is
    /// always finished before shutdown is observed.
    pub(crate) async fn run(
        self,
        mut batches: mpsc::Receiver<VerifyBatch>,
        mut responses: mpsc::Receiver<AncestorResponse>,
        shutdown: CancellationToken,
    ) {
        let mut batches_open = true;
        let mut responses_open = true;

        while batches_open || responses_open {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("dispatcher shutting down");
                    return;
                }
                msg = responses.recv(), if responses_open => match msg {
                    Some(response) => self.on_response(response).await,
                    None => responses_open = false,
                },
                msg = batches.recv(), if batches_open => match msg {
                    Some(batch) => self.on_batch(batch).await,
                    None => batches_open = false,
                },
            }
        }
        info!("dispatcher inputs closed");
    }

    pub(crate) async fn on_batch(&self, batch: VerifyBatch) {
        let id = batch.id;
        if batch.headers.is_empty() {
            warn!(id, "empty header batch");
            self.emit(VerificationResult::failed(id, B256::ZERO, VerifyError::EmptyBatch))
                .await;
            return;
        }
        if let Some(index) = batch.headers.iter().position(Option::is_none) {
            warn!(id, index, size = batch.headers.len(), "batch has an empty header slot");
            for slot in &batch.headers {
                let hash = slot.as_ref().map_or(B256::ZERO, |h| h.hash());
                self.emit(VerificationResult::failed(id, hash, VerifyError::MissingHeader { index }))
                    .await;
            }
            return;
        }

        let deadline = batch
            .deadline
            .unwrap_or_else(|| Instant::now() + self.config.batch_ttl());

        // our own copy; the caller's headers stay untouched
        let mut items: Vec<(HeaderRef, bool)> = batch
            .headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| h.clone().map(|h| (h, batch.seal_at(i))))
            .collect();
        items.sort_unstable_by_key(|(h, _)| h.number());
        let view = BatchView::new(items.iter().map(|(h, _)| h.clone()).collect());

        let mut requests = Vec::new();
        let (mut immediate, mut parked) = (0usize, 0usize);
        for (header, seal) in items {
            if self.cache.header(header.hash(), header.number()).is_some() {
                debug!(id, number = header.number(), "header already known");
                immediate += 1;
                self.emit(VerificationResult::ok(id, header.hash())).await;
                continue;
            }

            let resolution = resolve(self.engine.as_ref(), self.cache.as_ref(), id, &header, &view);
            requests.extend(resolution.request);
            let entry = PendingVerification::new(
                id,
                header,
                seal,
                deadline,
                resolution.parents,
                resolution.expected,
            );

            match self.attempt(&entry).await {
                Attempt::Done(outcome) => {
                    immediate += 1;
                    self.conclude_unregistered(&entry, outcome).await;
                }
                Attempt::Incomplete | Attempt::Waiting => {
                    debug!(
                        id,
                        number = entry.number(),
                        known = entry.known_parents.len(),
                        expected = entry.parents_expected,
                        "header waiting on ancestors"
                    );
                    if let Err(entry) = self.registry.put(entry) {
                        warn!(id, number = entry.number(), "another header at this height is pending");
                        self.registry.reject(id, entry.hash());
                        self.emit(VerificationResult::failed(
                            id,
                            entry.hash(),
                            VerifyError::DuplicateHeight {
                                number: entry.number(),
                            },
                        ))
                        .await;
                    } else {
                        parked += 1;
                    }
                }
            }
        }

        info!(
            id,
            from = view.from(),
            to = view.to(),
            immediate,
            parked,
            "batch accepted"
        );

        self.registry.release(id);

        match merge_requests(id, view.from(), &requests) {
            Some(request) => {
                debug!(
                    id,
                    highest = request.highest_number,
                    count = request.count,
                    "requesting ancestors"
                );
                if self.requests.send(request).await.is_err() {
                    error!(id, "ancestor request queue closed");
                }
            }
            None => debug!(id, "nothing to ask"),
        }
    }

    pub(crate) async fn on_response(&self, response: AncestorResponse) {
        let id = response.id;
        if let Some(err) = response.error {
            let failed = self.registry.remove_all(id);
            warn!(id, err = %err, pending = failed.len(), "ancestor fetch failed");
            for entry in failed {
                self.emit(VerificationResult::failed(id, entry.hash(), VerifyError::Fetch(err.clone())))
                    .await;
            }
            return;
        }

        for header in &response.headers {
            self.cache.insert(header.clone());
        }

        let numbers = self.registry.get(id);
        if numbers.is_empty() {
            debug!(id, count = response.headers.len(), "ancestors arrived for nothing pending");
            return;
        }

        // verified headers join the pool so higher entries can build on them
        let mut pool = response.headers;
        let mut index = DedupIndex::default();
        let mut resolved = 0usize;
        for number in numbers {
            let Some(mut entry) = self.registry.entry(id, number) else {
                continue;
            };
            if fold(&mut entry, &pool, &mut index) > 0 {
                self.registry
                    .set_parents(id, number, entry.known_parents.clone());
            }

            let Attempt::Done(outcome) = self.attempt(&entry).await else {
                continue;
            };
            let verified = outcome.is_ok();
            if self.conclude(&entry, outcome).await {
                resolved += 1;
                if verified {
                    pool.push(entry.header.clone());
                }
            }
        }
        info!(id, resolved, pending = self.registry.get(id).len(), "ancestors folded");
    }

    async fn attempt(&self, entry: &PendingVerification) -> Attempt {
        if !entry.is_complete() {
            return Attempt::Incomplete;
        }

        for parent in &entry.known_parents {
            if self.registry.is_pending(entry.id, parent.number(), parent.hash()) {
                return Attempt::Waiting;
            }
            if self.registry.is_rejected(entry.id, parent.hash()) {
                return Attempt::Done(Err(VerifyError::InvalidAncestor {
                    hash: parent.hash(),
                }));
            }
        }

        let mut parents = entry.known_parents.clone();
        parents.sort_unstable_by(|a, b| b.number().cmp(&a.number()));

        let engine = self.engine.clone();
        let cache = self.cache.clone();
        let header = entry.header.clone();
        let seal = entry.seal;
        let outcome = tokio::task::spawn_blocking(move || {
            engine.verify(cache.as_ref(), &header, &parents, false, seal)
        })
        .await;

        Attempt::Done(match outcome {
            Ok(result) => result.map_err(VerifyError::from),
            Err(e) => {
                error!(err = %e, number = entry.number(), "verification task failed");
                Err(VerifyError::Aborted(e.to_string()))
            }
        })
    }

    /// Resolve a registered entry. False if something else got there first.
    async fn conclude(&self, entry: &PendingVerification, outcome: Result<(), VerifyError>) -> bool {
        if self.registry.claim(entry.id, entry.number()).is_none() {
            debug!(id = entry.id, number = entry.number(), "already resolved");
            return false;
        }
        self.conclude_unregistered(entry, outcome).await;
        self.evict(entry.id, entry.number());
        true
    }

    async fn conclude_unregistered(&self, entry: &PendingVerification, outcome: Result<(), VerifyError>) {
        let result = match outcome {
            Ok(()) => {
                self.cache.insert(entry.header.clone());
                debug!(id = entry.id, number = entry.number(), "header verified");
                VerificationResult::ok(entry.id, entry.hash())
            }
            Err(e) => {
                self.registry.reject(entry.id, entry.hash());
                warn!(id = entry.id, number = entry.number(), err = %e, "header rejected");
                VerificationResult::failed(entry.id, entry.hash(), e)
            }
        };
        self.emit(result).await;
    }

    /// Hand removal to the sweeper, or do it here if its queue is full.
    fn evict(&self, id: u64, number: u64) {
        match self.cleanup.try_send(Finished { id, number }) {
            Ok(()) => {}
            Err(TrySendError::Full(f)) | Err(TrySendError::Closed(f)) => {
                debug!(id, number, "cleanup queue unavailable, removing inline");
                self.registry.remove(f.id, f.number);
            }
        }
    }

    async fn emit(&self, result: VerificationResult) {
        if self.results.send(result).await.is_err() {
            error!("result queue closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain::{BlockHeader, HeaderReader, MemoryCache, SealedHeader};
    use consensus::RuleError;

    struct Depth(u64);

    impl Engine for Depth {
        fn ancestors_needed(&self, _header: &SealedHeader) -> u64 {
            self.0
        }

        fn verify(
            &self,
            _chain: &dyn HeaderReader,
            _header: &SealedHeader,
            parents: &[HeaderRef],
            _uncle: bool,
            _seal: bool,
        ) -> Result<(), RuleError> {
            if parents.len() as u64 != self.0 {
                return Err(RuleError::AncestorCount {
                    expected: self.0 as usize,
                    got: parents.len(),
                });
            }
            Ok(())
        }
    }

    struct Harness {
        dispatcher: Dispatcher<Depth, MemoryCache>,
        registry: Arc<Registry>,
        results: mpsc::Receiver<VerificationResult>,
        requests: mpsc::Receiver<AncestorRequest>,
        cleanup: mpsc::Receiver<Finished>,
    }

    fn harness(depth: u64, cleanup_capacity: usize) -> Harness {
        let registry = Arc::new(Registry::new());
        let (results_tx, results) = mpsc::channel(64);
        let (requests_tx, requests) = mpsc::channel(64);
        let (cleanup_tx, cleanup) = mpsc::channel(cleanup_capacity);
        let dispatcher = Dispatcher::new(
            Arc::new(Depth(depth)),
            Arc::new(MemoryCache::new()),
            registry.clone(),
            VerifierConfig::default(),
            results_tx,
            requests_tx,
            cleanup_tx,
        );
        Harness {
            dispatcher,
            registry,
            results,
            requests,
            cleanup,
        }
    }

    fn chain(len: u64) -> Vec<HeaderRef> {
        let mut out: Vec<HeaderRef> = Vec::new();
        for number in 0..len {
            let parent_hash = out.last().map_or(B256::ZERO, |p| p.hash());
            out.push(SealedHeader::shared(BlockHeader {
                parent_hash,
                number,
                ..Default::default()
            }));
        }
        out
    }

    #[tokio::test]
    async fn full_cleanup_queue_evicts_inline() {
        let mut h = harness(1, 1);
        let c = chain(8);
        h.dispatcher
            .on_batch(VerifyBatch::new(1, vec![c[5].clone()]))
            .await;
        h.dispatcher
            .on_batch(VerifyBatch::new(1, vec![c[7].clone()]))
            .await;
        assert_eq!(h.registry.pending(), 2);

        h.dispatcher
            .on_response(AncestorResponse::headers(1, vec![c[4].clone(), c[6].clone()]))
            .await;

        // first eviction queued, second done inline
        assert_eq!(h.cleanup.try_recv().ok(), Some(Finished { id: 1, number: 5 }));
        assert!(h.cleanup.try_recv().is_err());
        assert_eq!(h.registry.len(), 1);
        assert_eq!(h.registry.pending(), 0);

        assert!(h.results.try_recv().unwrap().is_ok());
        assert!(h.results.try_recv().unwrap().is_ok());
        assert_eq!(h.requests.try_recv().unwrap().highest_number, 4);
    }

    #[tokio::test]
    async fn closed_cleanup_queue_evicts_inline() {
        let mut h = harness(1, 4);
        drop(h.cleanup);
        let c = chain(4);
        h.dispatcher
            .on_batch(VerifyBatch::new(9, vec![c[3].clone()]))
            .await;
        h.dispatcher
            .on_response(AncestorResponse::headers(9, vec![c[2].clone()]))
            .await;
        assert!(h.registry.is_empty());
        assert!(h.results.try_recv().unwrap().is_ok());
    }

    #[tokio::test]
    async fn duplicate_height_is_rejected() {
        let mut h = harness(1, 4);
        let a = SealedHeader::shared(BlockHeader {
            number: 5,
            ..Default::default()
        });
        let b = SealedHeader::shared(BlockHeader {
            number: 5,
            gas_limit: 1,
            ..Default::default()
        });
        h.dispatcher
            .on_batch(VerifyBatch::new(1, vec![a, b]))
            .await;

        assert_eq!(h.registry.pending(), 1);
        let first = h.results.try_recv().unwrap();
        assert!(matches!(
            first.error,
            Some(VerifyError::DuplicateHeight { number: 5 })
        ));
        // anything built on the duplicate must not verify against it
        assert!(h.registry.is_rejected(1, first.hash));
        assert!(h.results.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_response_for_resolved_id_is_ignored() {
        let mut h = harness(1, 4);
        let c = chain(4);
        h.dispatcher
            .on_batch(VerifyBatch::new(1, vec![c[3].clone()]))
            .await;
        h.dispatcher
            .on_response(AncestorResponse::failed(1, "peer went away"))
            .await;
        let failed = h.results.try_recv().unwrap();
        assert_eq!(failed.error, Some(VerifyError::Fetch("peer went away".into())));

        h.dispatcher
            .on_response(AncestorResponse::headers(1, vec![c[2].clone()]))
            .await;
        assert!(h.results.try_recv().is_err());
        assert!(h.registry.is_empty());
    }
}
