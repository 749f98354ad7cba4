use alloy_primitives::B256;
use chain::HeaderRef;
use tokio::time::Instant;

use crate::error::VerifyError;

/// Headers submitted for verification under one request id.
#[derive(Debug, Clone, Default)]
pub struct VerifyBatch {
    pub id: u64,
    /// `None` marks an absent header; the whole batch is rejected.
    pub headers: Vec<Option<HeaderRef>>,
    /// Per-header seal check flags, parallel to `headers`. Missing flags
    /// default to `true`.
    pub seal: Vec<bool>,
    pub deadline: Option<Instant>,
}

impl VerifyBatch {
    pub fn new(id: u64, headers: Vec<HeaderRef>) -> Self {
        let seal = vec![true; headers.len()];
        Self {
            id,
            headers: headers.into_iter().map(Some).collect(),
            seal,
            deadline: None,
        }
    }

    pub fn with_seal(mut self, seal: Vec<bool>) -> Self {
        self.seal = seal;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn seal_at(&self, index: usize) -> bool {
        self.seal.get(index).copied().unwrap_or(true)
    }
}

/// Exactly one per submitted header, or a single one for an empty batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub id: u64,
    /// `B256::ZERO` for batch-level errors and absent slots.
    pub hash: B256,
    pub error: Option<VerifyError>,
}

impl VerificationResult {
    pub fn ok(id: u64, hash: B256) -> Self {
        Self {
            id,
            hash,
            error: None,
        }
    }

    pub fn failed(id: u64, hash: B256, error: VerifyError) -> Self {
        Self {
            id,
            hash,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Ask for `count` headers walking backwards from, and including,
/// `highest_hash` at `highest_number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncestorRequest {
    pub id: u64,
    pub highest_hash: B256,
    pub highest_number: u64,
    pub count: u64,
}

impl AncestorRequest {
    /// Lowest block number this request covers.
    pub fn lowest_number(&self) -> u64 {
        (self.highest_number + 1).saturating_sub(self.count)
    }
}

/// Reply to an [`AncestorRequest`]. Headers may come in any order.
#[derive(Debug, Clone, Default)]
pub struct AncestorResponse {
    pub id: u64,
    pub headers: Vec<HeaderRef>,
    pub error: Option<String>,
}

impl AncestorResponse {
    pub fn headers(id: u64, headers: Vec<HeaderRef>) -> Self {
        Self {
            id,
            headers,
            error: None,
        }
    }

    pub fn failed(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            headers: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// A resolved entry the sweeper should evict from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Finished {
    pub id: u64,
    pub number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_span() {
        let req = AncestorRequest {
            id: 1,
            highest_hash: B256::ZERO,
            highest_number: 9,
            count: 2,
        };
        assert_eq!(req.lowest_number(), 8);

        let near_genesis = AncestorRequest { count: 20, ..req };
        assert_eq!(near_genesis.lowest_number(), 0);
    }

    #[test]
    fn short_seal_vector_defaults_to_checking() {
        let batch = VerifyBatch::default().with_seal(vec![false]);
        assert!(!batch.seal_at(0));
        assert!(batch.seal_at(3));
    }
}
