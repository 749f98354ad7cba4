//! Working out which ancestors a header needs, which of them are already at
//! hand, and what is left to fetch.

use std::collections::{HashMap, HashSet};

use alloy_primitives::B256;
use chain::{HeaderReader, HeaderRef};
use consensus::Engine;
use tracing::trace;

use crate::registry::PendingVerification;
use crate::types::AncestorRequest;

/// A batch sorted ascending by number, indexed by hash.
#[derive(Debug, Clone)]
pub struct BatchView {
    sorted: Vec<HeaderRef>,
    by_hash: HashMap<B256, HeaderRef>,
}

impl BatchView {
    pub fn new(mut headers: Vec<HeaderRef>) -> Self {
        headers.sort_unstable_by_key(|h| h.number());
        let by_hash = headers.iter().map(|h| (h.hash(), h.clone())).collect();
        Self {
            sorted: headers,
            by_hash,
        }
    }

    /// Lowest block number in the batch.
    pub fn from(&self) -> u64 {
        self.sorted.first().map_or(0, |h| h.number())
    }

    /// Highest block number in the batch.
    pub fn to(&self) -> u64 {
        self.sorted.last().map_or(0, |h| h.number())
    }

    pub fn headers(&self) -> &[HeaderRef] {
        &self.sorted
    }

    fn lowest(&self) -> Option<&HeaderRef> {
        self.sorted.first()
    }
}

/// What is known about one header's ancestors.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Ancestors already at hand, from the cache or the batch.
    pub parents: Vec<HeaderRef>,
    pub expected: u64,
    /// Whatever the cache could not supply below the batch.
    pub request: Option<AncestorRequest>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.parents.len() as u64 >= self.expected
    }
}

pub fn resolve<E, C>(engine: &E, cache: &C, id: u64, header: &HeaderRef, batch: &BatchView) -> Resolution
where
    E: Engine + ?Sized,
    C: HeaderReader + ?Sized,
{
    let number = header.number();
    let expected = engine.ancestors_needed(header).min(number);
    if expected == 0 {
        return Resolution::default();
    }

    let (from, to) = (batch.from(), batch.to());
    let (origin_hash, origin_number, to_fetch) = if from < number && number <= to {
        let earliest = number - expected;
        if earliest >= from {
            (B256::ZERO, 0, 0)
        } else {
            // fetch from just below the batch so every header shares one origin
            let lowest = batch.lowest().map_or(header.parent_hash(), |h| h.parent_hash());
            (lowest, from - 1, from - earliest)
        }
    } else {
        (header.parent_hash(), number - 1, expected)
    };

    let mut parents = Vec::new();
    let mut request = None;
    if to_fetch > 0 {
        let walk = walk_cache(cache, origin_hash, origin_number, to_fetch);
        request = walk.residual(id, to_fetch);
        parents = walk.found;
    }
    parents.extend(batch_ancestors(batch, header, expected - to_fetch));

    trace!(
        id,
        number,
        expected,
        known = parents.len(),
        to_fetch,
        "resolved ancestors"
    );
    Resolution {
        parents,
        expected,
        request,
    }
}

/// Result of following parent links through the cache.
#[derive(Debug, Clone)]
pub struct CacheWalk {
    pub found: Vec<HeaderRef>,
    /// Where the walk stopped: the first link the cache could not resolve.
    pub next_hash: B256,
    pub next_number: u64,
}

impl CacheWalk {
    fn residual(&self, id: u64, wanted: u64) -> Option<AncestorRequest> {
        let count = wanted.saturating_sub(self.found.len() as u64);
        (count > 0).then_some(AncestorRequest {
            id,
            highest_hash: self.next_hash,
            highest_number: self.next_number,
            count,
        })
    }
}

/// Follow parent links backwards from `(hash, number)` for at most `count`
/// headers, stopping at the first cache miss.
pub fn walk_cache<C>(cache: &C, hash: B256, number: u64, count: u64) -> CacheWalk
where
    C: HeaderReader + ?Sized,
{
    let mut found = Vec::new();
    let (mut next_hash, mut next_number) = (hash, number);
    while (found.len() as u64) < count {
        let Some(header) = cache.header(next_hash, next_number) else {
            break;
        };
        next_hash = header.parent_hash();
        let at_genesis = next_number == 0;
        next_number = next_number.saturating_sub(1);
        found.push(header);
        if at_genesis {
            break;
        }
    }
    CacheWalk {
        found,
        next_hash,
        next_number,
    }
}

/// Up to `count` nearest ancestors of `header` found inside the batch,
/// following parent links.
pub fn batch_ancestors(batch: &BatchView, header: &HeaderRef, count: u64) -> Vec<HeaderRef> {
    let mut out = Vec::new();
    let mut next = header.parent_hash();
    while (out.len() as u64) < count {
        let Some(parent) = batch.by_hash.get(&next) else {
            break;
        };
        next = parent.parent_hash();
        out.push(parent.clone());
    }
    out
}

/// Coalesce the per-header requests of one batch into a single request.
///
/// The result starts at the highest origin below `from` and reaches down to
/// the lowest number any request asks for. `None` when nothing needs asking.
pub fn merge_requests(id: u64, from: u64, requests: &[AncestorRequest]) -> Option<AncestorRequest> {
    let mut relevant = requests.iter().filter(|r| r.id == id && r.count > 0);
    let first = relevant.next()?;

    let mut top: Option<&AncestorRequest> = (first.highest_number < from).then_some(first);
    let mut lowest = first.lowest_number();
    for req in relevant {
        lowest = lowest.min(req.lowest_number());
        if req.highest_number < from && top.map_or(true, |t| req.highest_number > t.highest_number) {
            top = Some(req);
        }
    }

    let top = top.unwrap_or(first);
    Some(AncestorRequest {
        id,
        highest_hash: top.highest_hash,
        highest_number: top.highest_number,
        count: top.highest_number - lowest + 1,
    })
}

/// Ancestors already credited to pending entries during one arrival pass,
/// per request id and ancestor hash.
#[derive(Debug, Default)]
pub struct DedupIndex {
    credited: HashMap<u64, HashMap<B256, HashSet<u64>>>,
}

impl DedupIndex {
    /// Record the parents an entry already holds.
    pub fn seed(&mut self, entry: &PendingVerification) {
        for parent in &entry.known_parents {
            self.credit(entry.id, parent.hash(), entry.number());
        }
    }

    /// Credit ancestor `hash` to the entry at `number`. False if it was
    /// already credited.
    pub fn credit(&mut self, id: u64, hash: B256, number: u64) -> bool {
        self.credited
            .entry(id)
            .or_default()
            .entry(hash)
            .or_default()
            .insert(number)
    }
}

/// Fold candidate ancestors into `entry`. Returns how many were added.
///
/// A candidate is taken only if it falls inside the entry's range, nothing at
/// its height is known yet and the entry still has room.
pub fn fold(entry: &mut PendingVerification, candidates: &[HeaderRef], index: &mut DedupIndex) -> usize {
    index.seed(entry);
    let mut added = 0;
    for candidate in candidates {
        if entry.is_complete() {
            break;
        }
        if !entry.in_range(candidate.number()) {
            continue;
        }
        if entry
            .known_parents
            .iter()
            .any(|p| p.number() == candidate.number())
        {
            continue;
        }
        if index.credit(entry.id, candidate.hash(), entry.number()) {
            entry.known_parents.push(candidate.clone());
            added += 1;
        }
    }
    added
}
