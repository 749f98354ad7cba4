//! Asynchronous verification of block header batches.
//!
//! Batches come in on one queue, results go out on another. Headers whose
//! ancestors are not yet at hand wait in the [`Registry`] while a single
//! coalesced [`AncestorRequest`] per batch goes out to whoever fetches
//! headers; replies are folded back in and the waiting headers verified.
//! Anything still waiting at its deadline times out.

pub mod ancestors;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod service;
pub mod sweeper;
pub mod types;

pub use config::{ExpiryScope, VerifierConfig};
pub use error::VerifyError;
pub use registry::{PendingVerification, Registry};
pub use service::{Queues, VerificationService};
pub use types::{AncestorRequest, AncestorResponse, VerificationResult, VerifyBatch};
