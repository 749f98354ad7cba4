use alloy_primitives::B256;
use consensus::RuleError;
use thiserror::Error;

/// Terminal outcome of a failed header verification, as carried by a
/// [`VerificationResult`](crate::VerificationResult).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("empty header batch")]
    EmptyBatch,

    #[error("empty header in batch slot {index}")]
    MissingHeader { index: usize },

    #[error("another header at height {number} is already pending under this request id")]
    DuplicateHeight { number: u64 },

    #[error("timed out waiting for ancestors")]
    Timeout,

    #[error("ancestor fetch failed: {0}")]
    Fetch(String),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("ancestor {hash} was rejected")]
    InvalidAncestor { hash: B256 },

    #[error("verification aborted: {0}")]
    Aborted(String),
}

impl VerifyError {
    /// Whether the header itself broke a consensus rule, as opposed to the
    /// batch or its ancestors failing to arrive.
    pub fn is_rule_violation(&self) -> bool {
        matches!(self, Self::Rule(_) | Self::InvalidAncestor { .. })
    }
}
