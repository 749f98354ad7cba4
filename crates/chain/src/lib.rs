pub mod cache;
pub mod rlp;
pub mod types;

pub use cache::{HeaderCache, HeaderReader, MemoryCache};
pub use types::{empty_uncle_hash, BlockHeader, HeaderRef, SealedHeader};
