use alloy_primitives::B256;
use chain::{HeaderReader, HeaderRef, SealedHeader};
use thiserror::Error;

use crate::difficulty::DifficultyError;

/// Why a rule engine rejected a header.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("expected {expected} ancestors, got {got}")]
    AncestorCount { expected: usize, got: usize },

    #[error("ancestor {number} is not the parent of the header above it (expected {expected})")]
    BrokenLink { number: u64, expected: B256 },

    #[error("block {number} does not follow its parent {parent}")]
    NonSequential { number: u64, parent: u64 },

    #[error("timestamp {timestamp} not after parent timestamp {parent}")]
    Timestamp { timestamp: u64, parent: u64 },

    #[error("gas limit {gas_limit} out of range for parent gas limit {parent}")]
    GasLimit { gas_limit: u64, parent: u64 },

    #[error("gas used {used} exceeds gas limit {limit}")]
    GasUsed { used: u64, limit: u64 },

    #[error("extra data is {len} bytes, at most {max} allowed")]
    ExtraData { len: usize, max: usize },

    #[error(transparent)]
    Difficulty(#[from] DifficultyError),

    #[error("invalid seal: {0}")]
    Seal(String),
}

/// A pluggable set of consensus rules.
///
/// The verifier asks how many ancestors a header needs, gathers them, then
/// hands the header and its ancestors (nearest first) to [`Engine::verify`].
/// Calls may be made from blocking worker threads.
pub trait Engine: Send + Sync {
    /// Number of immediate ancestors `verify` needs. Zero means the header can
    /// be checked on its own.
    fn ancestors_needed(&self, header: &SealedHeader) -> u64;

    fn verify(
        &self,
        chain: &dyn HeaderReader,
        header: &SealedHeader,
        parents: &[HeaderRef],
        uncle: bool,
        seal: bool,
    ) -> Result<(), RuleError>;
}
