/*
 * This file is part of the vdtu kernel emulation.
 *
 * vdtu is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License version 2 as
 * published by the Free Software Foundation.
 *
 * vdtu is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
 * General Public License version 2 for more details.
 */

//! RevocationList (spec §4.4.4, grounded verbatim in `original_source`'s
//! `cap/Revocations.h`/`.cc`): a process-wide, open-addressed hash table of
//! in-progress revocations keyed by cap id. Fixed at 256 slots — the
//! original's documented bound ("threads * kernels in-flight revocations,
//! 256 is generous") — and panics on duplicate insert or overflow rather
//! than growing, since the revoke algorithm (spec §4.4.3) assumes exactly
//! one entry per id can exist at a time.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::ids::{CapId, KernelId};

const HASH_CAP: usize = 256;
const HASH_MASK: usize = HASH_CAP - 1;

fn hash_index(id: CapId) -> usize {
    (id.fib_hash() as usize) & HASH_MASK
}

/// A revocation waiting on this one to finish (spec §4.4.3 "subscribers").
pub struct Subscription {
    pub cap_id: CapId,
}

/// One in-progress revocation (spec §3 "RevocationList" entry shape).
pub struct Revocation {
    pub id: CapId,
    pub parent_id: CapId,
    pub origin: CapId,
    pub awaited: i64,
    /// Present only on the revocation root; used to wake the blocked
    /// caller of `revoke` once `awaited` reaches zero. Modeled as a oneshot
    /// channel rather than a raw thread id (spec §9 redesign note: "the
    /// 'thread id' in the entry becomes a task-local wake handle").
    pub waker: Option<Sender<()>>,
    pub subscribers: Vec<Subscription>,
    /// Set when this entry was opened on behalf of a [`handle_remote_batch`]
    /// call (spec §4.4.3 "Reply protocol"): the kernel that is itself
    /// waiting on our `revokeFinish`, so a non-root entry knows where to
    /// forward completion instead of treating it as purely local.
    ///
    /// [`handle_remote_batch`]: crate::core::CapabilityCore::handle_remote_batch
    pub proxy_for_kernel: Option<KernelId>,
}

impl Revocation {
    fn new(id: CapId, parent_id: CapId, origin: CapId, waker: Option<Sender<()>>) -> Self {
        Revocation {
            id,
            parent_id,
            origin,
            awaited: 0,
            waker,
            subscribers: Vec::new(),
            proxy_for_kernel: None,
        }
    }

    pub fn subscribe(&mut self, cap_id: CapId) {
        self.subscribers.push(Subscription { cap_id });
    }
}

pub struct RevocationList {
    buckets: Vec<Option<Revocation>>,
    count: usize,
}

impl Default for RevocationList {
    fn default() -> Self {
        Self::new()
    }
}

impl RevocationList {
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(HASH_CAP);
        buckets.resize_with(HASH_CAP, || None);
        RevocationList { buckets, count: 0 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `find(id)` — spec §4.4.4 ("normalises the type tag first"): cap ids
    /// here already carry a disjoint object/mapping tag (spec §4.4.1), so
    /// lookups compare the id directly; no extra normalisation step is
    /// needed beyond hashing the same id `add` was called with.
    pub fn find(&self, id: CapId) -> Option<&Revocation> {
        let mut idx = hash_index(id);
        loop {
            match &self.buckets[idx] {
                Some(rev) if rev.id == id => return Some(rev),
                Some(_) => idx = (idx + 1) & HASH_MASK,
                None => return None,
            }
        }
    }

    pub fn find_mut(&mut self, id: CapId) -> Option<&mut Revocation> {
        let mut idx = hash_index(id);
        loop {
            match &self.buckets[idx] {
                Some(rev) if rev.id == id => return self.buckets[idx].as_mut(),
                Some(_) => idx = (idx + 1) & HASH_MASK,
                None => return None,
            }
        }
    }

    /// `add(cap, parent, origin)` — spec §4.4.4. Panics if `cap` already
    /// has an entry (duplicate revocation for the same id is a caller bug,
    /// spec §7) or if the table is full.
    pub fn add(&mut self, id: CapId, parent_id: CapId, origin: CapId, is_root: bool) -> (&mut Revocation, Option<Receiver<()>>) {
        assert!(
            self.find(id).is_none(),
            "RevocationList: duplicate revocation entry for {id:?}"
        );
        assert!(self.count < HASH_CAP, "RevocationList full ({}/{HASH_CAP})", self.count);

        let (waker, rx) = if is_root {
            let (tx, rx) = mpsc::channel();
            (Some(tx), Some(rx))
        }
        else {
            (None, None)
        };

        let mut idx = hash_index(id);
        while self.buckets[idx].is_some() {
            idx = (idx + 1) & HASH_MASK;
        }
        self.buckets[idx] = Some(Revocation::new(id, parent_id, origin, waker));
        self.count += 1;
        (self.buckets[idx].as_mut().unwrap(), rx)
    }

    /// `remove(id)` — spec §4.4.4: re-inserts displaced entries in the
    /// probe run (Robin Hood back-shift), matching
    /// `RevocationList::remove`'s fixup loop in `original_source`.
    pub fn remove(&mut self, id: CapId) -> Option<Revocation> {
        let mut idx = hash_index(id);
        loop {
            match &self.buckets[idx] {
                Some(rev) if rev.id == id => break,
                Some(_) => idx = (idx + 1) & HASH_MASK,
                None => return None,
            }
        }

        let removed = self.buckets[idx].take();
        self.count -= 1;

        let mut next = (idx + 1) & HASH_MASK;
        while let Some(displaced) = self.buckets[next].take() {
            self.count -= 1;
            self.reinsert(displaced);
            next = (next + 1) & HASH_MASK;
        }

        removed
    }

    /// Ids of all entries whose cap id satisfies `pred`, used by
    /// [`crate::core::CapabilityCore::revoke_all`]'s abandoned-wait sweep
    /// (spec §4.4.5 "must additionally sweep any stale `RevocationList`
    /// entries belonging to this table").
    pub fn ids_matching(&self, pred: impl Fn(CapId) -> bool) -> Vec<CapId> {
        self.buckets
            .iter()
            .flatten()
            .map(|rev| rev.id)
            .filter(|&id| pred(id))
            .collect()
    }

    fn reinsert(&mut self, rev: Revocation) {
        let mut idx = hash_index(rev.id);
        while self.buckets[idx].is_some() {
            idx = (idx + 1) & HASH_MASK;
        }
        self.buckets[idx] = Some(rev);
        self.count += 1;
    }
}
