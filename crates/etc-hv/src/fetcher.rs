use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::B256;
use chain::HeaderRef;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use verification::{AncestorRequest, AncestorResponse};

/// Most headers returned for one request.
pub const MAX_HEADERS_SERVE: u64 = 1024;

/// Serves ancestor requests out of a fixed set of headers, standing in for
/// the peers a node would ask.
#[derive(Debug, Default)]
pub struct HeaderStore {
    by_hash: HashMap<B256, HeaderRef>,
}

impl HeaderStore {
    pub fn new(headers: impl IntoIterator<Item = HeaderRef>) -> Self {
        Self {
            by_hash: headers.into_iter().map(|h| (h.hash(), h)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// Walk back from the requested header along parent links.
    ///
    /// An unknown starting header is a failed fetch; a chain that runs out
    /// early yields what was found.
    pub fn serve(&self, request: &AncestorRequest) -> AncestorResponse {
        let limit = request.count.min(MAX_HEADERS_SERVE);
        let mut headers = Vec::new();
        let (mut hash, mut number) = (request.highest_hash, request.highest_number);

        while (headers.len() as u64) < limit {
            match self.by_hash.get(&hash) {
                Some(h) if h.number() == number => {
                    hash = h.parent_hash();
                    headers.push(h.clone());
                    if number == 0 {
                        break;
                    }
                    number -= 1;
                }
                _ => break,
            }
        }

        if headers.is_empty() && limit > 0 {
            return AncestorResponse::failed(
                request.id,
                format!("unknown header {} at {}", request.highest_hash, request.highest_number),
            );
        }
        if (headers.len() as u64) < request.count {
            debug!(
                id = request.id,
                wanted = request.count,
                served = headers.len(),
                "short ancestor response"
            );
        }
        AncestorResponse::headers(request.id, headers)
    }
}

/// Answer requests until shutdown or until either queue closes.
pub async fn run(
    store: Arc<HeaderStore>,
    mut requests: mpsc::Receiver<AncestorRequest>,
    responses: mpsc::Sender<AncestorResponse>,
    shutdown: CancellationToken,
) {
    let mut served = 0u64;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = requests.recv() => {
                let Some(request) = msg else { break };
                let response = store.serve(&request);
                if let Some(err) = &response.error {
                    warn!(id = request.id, err = %err, "cannot serve ancestors");
                }
                if responses.send(response).await.is_err() {
                    warn!("response queue closed");
                    break;
                }
                served += 1;
            }
        }
    }
    info!(served, "header fetcher stopped");
}
