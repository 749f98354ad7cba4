use std::ops::Deref;
use std::sync::Arc;

use alloy_primitives::{Address, Bloom, Bytes, B256, B64, U256};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::rlp::ListEncoder;

/// Shared handle to a header whose hash has been computed once.
pub type HeaderRef = Arc<SealedHeader>;

/// Proof-of-work block header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub parent_hash: B256,
    pub uncle_hash: B256,
    pub coinbase: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub mix_hash: B256,
    pub nonce: B64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee: Option<U256>,
}

/// keccak256 of the RLP empty list, the uncle hash of a block without uncles.
pub fn empty_uncle_hash() -> B256 {
    B256::from_slice(&Keccak256::digest([0xc0]))
}

impl BlockHeader {
    /// keccak256 over the RLP encoding.
    pub fn hash(&self) -> B256 {
        B256::from_slice(&Keccak256::digest(self.rlp_encode()))
    }

    /// Field order follows the Ethereum header layout; `base_fee` is only
    /// appended when present.
    pub fn rlp_encode(&self) -> Vec<u8> {
        let mut list = ListEncoder::new();
        list.bytes(self.parent_hash.as_slice())
            .bytes(self.uncle_hash.as_slice())
            .bytes(self.coinbase.as_slice())
            .bytes(self.state_root.as_slice())
            .bytes(self.transactions_root.as_slice())
            .bytes(self.receipts_root.as_slice())
            .bytes(self.logs_bloom.as_slice())
            .u256(&self.difficulty)
            .uint(self.number)
            .uint(self.gas_limit)
            .uint(self.gas_used)
            .uint(self.timestamp)
            .bytes(self.extra_data.as_ref())
            .bytes(self.mix_hash.as_slice())
            .bytes(self.nonce.as_slice());
        if let Some(base_fee) = &self.base_fee {
            list.u256(base_fee);
        }
        list.finish()
    }

    pub fn has_uncles(&self) -> bool {
        self.uncle_hash != empty_uncle_hash()
    }
}

/// A header paired with its hash. Headers are immutable once observed, so the
/// hash is computed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedHeader {
    header: BlockHeader,
    hash: B256,
}

impl SealedHeader {
    pub fn seal(header: BlockHeader) -> Self {
        let hash = header.hash();
        Self { header, hash }
    }

    /// Seal and wrap in an `Arc` for sharing between batches, caches and
    /// pending verifications.
    pub fn shared(header: BlockHeader) -> HeaderRef {
        Arc::new(Self::seal(header))
    }

    pub fn hash(&self) -> B256 {
        self.hash
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> B256 {
        self.header.parent_hash
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }
}

impl Deref for SealedHeader {
    type Target = BlockHeader;

    fn deref(&self) -> &BlockHeader {
        &self.header
    }
}

impl From<BlockHeader> for SealedHeader {
    fn from(header: BlockHeader) -> Self {
        Self::seal(header)
    }
}
