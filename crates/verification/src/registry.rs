use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy_primitives::B256;
use chain::HeaderRef;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ExpiryScope;

/// Bookkeeping for a header still waiting on ancestors.
#[derive(Debug, Clone)]
pub struct PendingVerification {
    pub id: u64,
    pub header: HeaderRef,
    pub seal: bool,
    pub deadline: Instant,
    /// Unique by hash, at most `parents_expected` long. Unordered.
    pub known_parents: Vec<HeaderRef>,
    pub parents_expected: u64,
    /// Lowest ancestor number this entry needs.
    pub range_from: u64,
    /// Highest ancestor number still missing when the entry was created.
    pub range_to: u64,
}

impl PendingVerification {
    pub fn new(
        id: u64,
        header: HeaderRef,
        seal: bool,
        deadline: Instant,
        known_parents: Vec<HeaderRef>,
        parents_expected: u64,
    ) -> Self {
        let number = header.number();
        let range_from = number.saturating_sub(parents_expected);
        let range_to = number.saturating_sub(known_parents.len() as u64 + 1);
        Self {
            id,
            header,
            seal,
            deadline,
            known_parents,
            parents_expected,
            range_from,
            range_to,
        }
    }

    pub fn number(&self) -> u64 {
        self.header.number()
    }

    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn is_complete(&self) -> bool {
        self.known_parents.len() as u64 >= self.parents_expected
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline <= now
    }

    /// Whether an ancestor at `number` may still be folded in.
    pub fn in_range(&self, number: u64) -> bool {
        self.range_from <= number && number <= self.range_to && number < self.number()
    }
}

#[derive(Debug)]
struct Slot {
    entry: PendingVerification,
    /// Set once a result has been emitted; the slot lingers until removed.
    resolved: bool,
}

#[derive(Debug, Default)]
struct State {
    slots: HashMap<u64, BTreeMap<u64, Slot>>,
    /// Hashes under each id that failed or expired, kept while the id still
    /// has slots so descendants can be failed without asking the cache.
    rejected: HashMap<u64, HashSet<B256>>,
}

impl State {
    fn forget(&mut self, id: u64) -> Option<BTreeMap<u64, Slot>> {
        self.rejected.remove(&id);
        self.slots.remove(&id)
    }
}

/// In-flight verifications keyed by request id, then block number.
///
/// At most one entry exists per `(id, number)`. Every method takes the lock
/// for the duration of a single map access; callers never hold it across
/// verification or channel I/O.
///
/// Resolution is two-step: [`Registry::claim`] marks the entry resolved so no
/// other path can resolve it again, and [`Registry::remove`] later drops the
/// slot itself.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<State>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new entry. Hands it back if an unresolved entry already holds
    /// the same `(id, number)`.
    pub fn put(&self, entry: PendingVerification) -> Result<(), PendingVerification> {
        let mut inner = self.lock();
        let slots = inner.slots.entry(entry.id).or_default();
        if slots.get(&entry.number()).is_some_and(|s| !s.resolved) {
            return Err(entry);
        }
        slots.insert(
            entry.number(),
            Slot {
                entry,
                resolved: false,
            },
        );
        Ok(())
    }

    /// Unresolved block numbers pending under `id`, ascending.
    pub fn get(&self, id: u64) -> Vec<u64> {
        let inner = self.lock();
        inner
            .slots
            .get(&id)
            .map(|slots| {
                slots
                    .iter()
                    .filter(|(_, s)| !s.resolved)
                    .map(|(n, _)| *n)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of an unresolved entry.
    pub fn entry(&self, id: u64, number: u64) -> Option<PendingVerification> {
        let inner = self.lock();
        let slot = inner.slots.get(&id)?.get(&number)?;
        (!slot.resolved).then(|| slot.entry.clone())
    }

    /// Replace the known parents of an unresolved entry.
    pub fn set_parents(&self, id: u64, number: u64, parents: Vec<HeaderRef>) -> bool {
        let mut inner = self.lock();
        match inner.slots.get_mut(&id).and_then(|slots| slots.get_mut(&number)) {
            Some(slot) if !slot.resolved => {
                slot.entry.known_parents = parents;
                true
            }
            _ => false,
        }
    }

    /// Whether `hash` at `number` is still waiting under `id`.
    pub fn is_pending(&self, id: u64, number: u64, hash: B256) -> bool {
        let inner = self.lock();
        inner
            .slots
            .get(&id)
            .and_then(|slots| slots.get(&number))
            .is_some_and(|s| !s.resolved && s.entry.hash() == hash)
    }

    /// Remember that `hash` failed under `id`.
    pub fn reject(&self, id: u64, hash: B256) {
        self.lock().rejected.entry(id).or_default().insert(hash);
    }

    pub fn is_rejected(&self, id: u64, hash: B256) -> bool {
        self.lock()
            .rejected
            .get(&id)
            .is_some_and(|hashes| hashes.contains(&hash))
    }

    /// Forget the rejections of `id` once nothing is held under it.
    pub fn release(&self, id: u64) {
        let mut inner = self.lock();
        if !inner.slots.contains_key(&id) {
            inner.rejected.remove(&id);
        }
    }

    /// Mark an entry resolved. Returns it only to the first caller.
    pub fn claim(&self, id: u64, number: u64) -> Option<PendingVerification> {
        let mut inner = self.lock();
        let slot = inner.slots.get_mut(&id)?.get_mut(&number)?;
        if slot.resolved {
            return None;
        }
        slot.resolved = true;
        Some(slot.entry.clone())
    }

    /// Drop a resolved slot, and the whole id once its last slot goes.
    ///
    /// Unresolved entries are left alone, so a late removal cannot take out a
    /// newer entry at the same height.
    pub fn remove(&self, id: u64, number: u64) -> bool {
        let mut inner = self.lock();
        let Some(slots) = inner.slots.get_mut(&id) else {
            return false;
        };
        if !slots.get(&number).is_some_and(|s| s.resolved) {
            return false;
        }
        slots.remove(&number);
        if slots.is_empty() {
            inner.forget(id);
        }
        true
    }

    /// Drop everything under `id`, handing back the entries that had not yet
    /// been resolved, ascending by number.
    pub fn remove_all(&self, id: u64) -> Vec<PendingVerification> {
        let slots = self.lock().forget(id);
        slots
            .into_iter()
            .flat_map(BTreeMap::into_values)
            .filter(|s| !s.resolved)
            .map(|s| s.entry)
            .collect()
    }

    /// Remove unresolved entries past their deadline and hand them back.
    ///
    /// With [`ExpiryScope::Request`] one overdue entry takes its whole request
    /// id with it. With [`ExpiryScope::Entry`] expired hashes count as
    /// rejected for the siblings left behind.
    pub fn drain_expired(&self, now: Instant, scope: ExpiryScope) -> Vec<PendingVerification> {
        let mut inner = self.lock();
        let mut expired = Vec::new();

        match scope {
            ExpiryScope::Request => {
                let overdue: Vec<u64> = inner
                    .slots
                    .iter()
                    .filter(|(_, slots)| {
                        slots
                            .values()
                            .any(|s| !s.resolved && s.entry.is_expired(now))
                    })
                    .map(|(id, _)| *id)
                    .collect();
                for id in overdue {
                    if let Some(slots) = inner.forget(id) {
                        expired.extend(slots.into_values().filter(|s| !s.resolved).map(|s| s.entry));
                    }
                }
            }
            ExpiryScope::Entry => {
                let State { slots, rejected } = &mut *inner;
                slots.retain(|id, slots| {
                    let overdue: Vec<u64> = slots
                        .iter()
                        .filter(|(_, s)| !s.resolved && s.entry.is_expired(now))
                        .map(|(n, _)| *n)
                        .collect();
                    for number in overdue {
                        if let Some(slot) = slots.remove(&number) {
                            rejected.entry(*id).or_default().insert(slot.entry.hash());
                            expired.push(slot.entry);
                        }
                    }
                    if slots.is_empty() {
                        rejected.remove(id);
                        return false;
                    }
                    true
                });
            }
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), ?scope, "expired pending verifications");
        }
        expired
    }

    /// Entries still waiting for a result.
    pub fn pending(&self) -> usize {
        self.lock()
            .slots
            .values()
            .flat_map(|slots| slots.values())
            .filter(|s| !s.resolved)
            .count()
    }

    /// Slots held, including resolved ones not yet removed.
    pub fn len(&self) -> usize {
        self.lock().slots.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }
}
