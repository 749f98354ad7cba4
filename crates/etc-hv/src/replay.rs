use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chain::{BlockHeader, HeaderCache, HeaderRef, MemoryCache, SealedHeader};
use consensus::{Engine, FamilyRules};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use verification::{Queues, VerificationResult, VerificationService, VerifierConfig, VerifyBatch, VerifyError};

use crate::config::RuntimeConfig;
use crate::fetcher::{self, HeaderStore};

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("header file parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("header file holds {len} headers, cannot verify with {anchor} anchor headers")]
    TooFew { len: usize, anchor: usize },
    #[error("verifier stopped after {received} of {expected} results")]
    Incomplete { received: usize, expected: usize },
}

/// Tally of one replay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub batches: usize,
    pub headers: usize,
    pub verified: usize,
    pub rejected: usize,
    pub timed_out: usize,
    pub fetch_failed: usize,
    pub other: usize,
}

impl Summary {
    fn record(&mut self, result: &VerificationResult) {
        match &result.error {
            None => self.verified += 1,
            Some(e) if e.is_rule_violation() => self.rejected += 1,
            Some(VerifyError::Timeout) => self.timed_out += 1,
            Some(VerifyError::Fetch(_)) => self.fetch_failed += 1,
            Some(_) => self.other += 1,
        }
    }

    pub fn all_verified(&self) -> bool {
        self.verified == self.headers
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "verified {}/{} headers in {} batches ({} rejected, {} timed out, {} fetch failures, {} other)",
            self.verified,
            self.headers,
            self.batches,
            self.rejected,
            self.timed_out,
            self.fetch_failed,
            self.other
        )
    }
}

/// Parse a JSON array of headers.
pub fn parse_headers(json: &str) -> Result<Vec<HeaderRef>, ReplayError> {
    let headers: Vec<BlockHeader> = serde_json::from_str(json)?;
    Ok(headers.into_iter().map(SealedHeader::shared).collect())
}

pub fn load_headers(path: &Path) -> Result<Vec<HeaderRef>, ReplayError> {
    let content = std::fs::read_to_string(path)?;
    parse_headers(&content)
}

/// Replay the configured header file against [`FamilyRules`].
pub async fn run(config: &RuntimeConfig) -> Result<Summary, ReplayError> {
    let headers = load_headers(&config.headers)?;
    info!(path = %config.headers.display(), count = headers.len(), "loaded headers");
    let engine = Arc::new(FamilyRules::new(config.forks.clone(), config.depth));
    run_with_headers(
        engine,
        headers,
        config.batch_size,
        config.anchor,
        config.cache_capacity,
        config.verifier.clone(),
    )
    .await
}

/// Trust the lowest `anchor` headers, then verify the rest in batches of
/// `batch_size`. Ancestor requests are served from the same headers.
///
/// At least one anchor header is needed to start the chain from.
pub async fn run_with_headers<E>(
    engine: Arc<E>,
    mut headers: Vec<HeaderRef>,
    batch_size: usize,
    anchor: usize,
    cache_capacity: Option<usize>,
    verifier: VerifierConfig,
) -> Result<Summary, ReplayError>
where
    E: Engine + 'static,
{
    headers.sort_by_key(|h| h.number());
    if anchor == 0 || headers.len() <= anchor {
        return Err(ReplayError::TooFew {
            len: headers.len(),
            anchor,
        });
    }

    let cache = Arc::new(cache_capacity.map_or_else(MemoryCache::new, MemoryCache::with_capacity));
    for header in &headers[..anchor] {
        cache.insert(header.clone());
    }
    let store = Arc::new(HeaderStore::new(headers.iter().cloned()));

    let shutdown = CancellationToken::new();
    let (service, queues) = VerificationService::start(engine, cache, verifier, shutdown.clone());
    let Queues {
        batches,
        mut results,
        requests,
        responses,
    } = queues;
    let chunks: Vec<Vec<HeaderRef>> = headers[anchor..]
        .chunks(batch_size.max(1))
        .map(<[HeaderRef]>::to_vec)
        .collect();
    let expected = headers.len() - anchor;
    let mut summary = Summary {
        batches: chunks.len(),
        headers: expected,
        ..Default::default()
    };
    info!(
        anchor = headers[anchor - 1].number(),
        headers = expected,
        batches = chunks.len(),
        servable = store.len(),
        "replay started"
    );
    let fetcher = tokio::spawn(fetcher::run(store, requests, responses, shutdown.clone()));

    let submitter = tokio::spawn(async move {
        for (i, chunk) in chunks.into_iter().enumerate() {
            let id = i as u64 + 1;
            debug!(id, size = chunk.len(), "submitting batch");
            if batches.send(VerifyBatch::new(id, chunk)).await.is_err() {
                warn!(id, "batch queue closed");
                break;
            }
        }
    });

    let mut received = 0;
    while received < expected {
        let Some(result) = results.recv().await else {
            break;
        };
        if let Some(err) = &result.error {
            debug!(id = result.id, hash = %result.hash, err = %err, "header failed");
        }
        summary.record(&result);
        received += 1;
    }

    if let Err(e) = submitter.await {
        error!(err = %e, "batch submitter failed");
    }
    shutdown.cancel();
    service.shutdown().await;
    if let Err(e) = fetcher.await {
        error!(err = %e, "header fetcher failed");
    }

    if received < expected {
        return Err(ReplayError::Incomplete { received, expected });
    }
    info!(%summary, "replay finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use consensus::difficulty::expected_difficulty;
    use consensus::ForkSchedule;

    /// A chain that satisfies the mainnet family rules, starting past the
    /// difficulty bomb.
    fn valid_chain(len: usize) -> Vec<BlockHeader> {
        let schedule = ForkSchedule::default();
        let mut parent = BlockHeader {
            uncle_hash: chain::empty_uncle_hash(),
            difficulty: U256::from(2_000_000u64),
            number: 6_000_000,
            gas_limit: 8_000_000,
            timestamp: 1_600_000_000,
            ..Default::default()
        };
        let mut out = vec![parent.clone()];
        while out.len() < len {
            let timestamp = parent.timestamp + 13;
            let child = BlockHeader {
                parent_hash: parent.hash(),
                number: parent.number + 1,
                difficulty: expected_difficulty(&schedule, &parent, timestamp),
                timestamp,
                ..parent.clone()
            };
            out.push(child.clone());
            parent = child;
        }
        out
    }

    fn shared(headers: Vec<BlockHeader>) -> Vec<HeaderRef> {
        headers.into_iter().map(SealedHeader::shared).collect()
    }

    #[tokio::test]
    async fn valid_chain_verifies() {
        let mut headers = shared(valid_chain(50));
        headers.reverse();
        let engine = Arc::new(FamilyRules::new(ForkSchedule::default(), 2));
        // two trusted headers cover the depth of the first verified one
        let summary = run_with_headers(engine, headers, 8, 2, None, VerifierConfig::default())
            .await
            .unwrap();
        assert_eq!(summary.headers, 48);
        assert_eq!(summary.batches, 6);
        assert!(summary.all_verified(), "{summary}");
    }

    #[tokio::test]
    async fn tampered_tip_is_rejected() {
        let mut chain = valid_chain(20);
        if let Some(tip) = chain.last_mut() {
            tip.gas_used = tip.gas_limit + 1;
        }
        let engine = Arc::new(FamilyRules::default());
        let summary = run_with_headers(engine, shared(chain), 5, 1, None, VerifierConfig::default())
            .await
            .unwrap();
        assert_eq!(summary.verified, 18);
        assert_eq!(summary.rejected, 1);
        assert!(!summary.all_verified());
    }

    #[tokio::test]
    async fn anchor_must_leave_work() {
        let engine = Arc::new(FamilyRules::default());
        let err = run_with_headers(engine, shared(valid_chain(3)), 4, 3, None, VerifierConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::TooFew { len: 3, anchor: 3 }));

        let engine = Arc::new(FamilyRules::default());
        let err = run_with_headers(engine, shared(valid_chain(3)), 4, 0, None, VerifierConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::TooFew { len: 3, anchor: 0 }));
    }

    #[tokio::test]
    async fn bounded_cache_verifies() {
        let engine = Arc::new(FamilyRules::new(ForkSchedule::default(), 2));
        let summary = run_with_headers(engine, shared(valid_chain(40)), 8, 2, Some(4), VerifierConfig::default())
            .await
            .unwrap();
        assert_eq!(summary.headers, 38);
        assert!(summary.all_verified(), "{summary}");
    }

    #[test]
    fn parses_header_json() {
        let chain = valid_chain(2);
        let json = serde_json::to_string(&chain).unwrap();
        let parsed = parse_headers(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].parent_hash(), parsed[0].hash());
        assert!(matches!(parse_headers("{}"), Err(ReplayError::Json(_))));
    }

    #[test]
    fn summary_tally() {
        let mut s = Summary {
            headers: 4,
            ..Default::default()
        };
        let hash = alloy_primitives::B256::ZERO;
        s.record(&VerificationResult::ok(1, hash));
        s.record(&VerificationResult::failed(1, hash, VerifyError::Timeout));
        s.record(&VerificationResult::failed(1, hash, VerifyError::InvalidAncestor { hash }));
        s.record(&VerificationResult::failed(1, hash, VerifyError::Fetch("gone".into())));
        assert_eq!((s.verified, s.timed_out, s.rejected, s.fetch_failed), (1, 1, 1, 1));
        assert!(s.to_string().starts_with("verified 1/4 headers"));
    }
}
