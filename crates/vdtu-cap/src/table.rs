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

//! CapTable (spec §3, §4.4.5): a per-VPE sparse map from selector to
//! capability. Grounded in the teacher's `cap::CapTable`/`Capability`, but
//! following the spec's §9 redesign note: parent/child/sibling links are
//! stable 64-bit [`CapId`]s resolved through [`crate::index::DistributedIndex`]
//! rather than the teacher's `NonNull` pointer list, so revocation never
//! needs unsafe aliasing and remote children are uniform with local ones.

use std::collections::{BTreeMap, HashSet};

use vdtu_core::error::{Code, Error, Result};

use crate::ids::{CapId, Selector};
use crate::kobject::KObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapState {
    Live,
    Revoking,
}

#[derive(Debug, Clone)]
pub struct Capability {
    pub id: CapId,
    pub obj: KObject,
    pub parent_id: Option<CapId>,
    pub children: HashSet<CapId>,
    pub state: CapState,
}

impl Capability {
    pub fn new_root(id: CapId, obj: KObject) -> Self {
        Capability {
            id,
            obj,
            parent_id: None,
            children: HashSet::new(),
            state: CapState::Live,
        }
    }

    pub fn new_child(id: CapId, obj: KObject, parent_id: CapId) -> Self {
        Capability {
            id,
            obj,
            parent_id: Some(parent_id),
            children: HashSet::new(),
            state: CapState::Live,
        }
    }
}

/// One VPE's table of capability slots (spec: "each VPE owns two: objects
/// and mappings" — callers hold one `CapTable` per space).
#[derive(Default)]
pub struct CapTable {
    slots: BTreeMap<Selector, Capability>,
}

impl CapTable {
    pub fn new() -> Self {
        CapTable {
            slots: BTreeMap::new(),
        }
    }

    /// `get(sel)` — spec §4.4.5: nil for empty or `Revoking` slots.
    pub fn get(&self, sel: Selector) -> Option<&Capability> {
        self.slots
            .get(&sel)
            .filter(|cap| cap.state != CapState::Revoking)
    }

    pub fn get_mut(&mut self, sel: Selector) -> Option<&mut Capability> {
        self.slots
            .get_mut(&sel)
            .filter(|cap| cap.state != CapState::Revoking)
    }

    /// Returns a slot regardless of state; used internally by revoke to
    /// mark `Revoking` before it is visible to `get`.
    pub fn get_raw_mut(&mut self, sel: Selector) -> Option<&mut Capability> {
        self.slots.get_mut(&sel)
    }

    /// `set(sel, cap)` — spec §4.4.5; installs unconditionally (callers
    /// check `unused` first when duplicate-selector semantics matter).
    pub fn set(&mut self, sel: Selector, cap: Capability) {
        self.slots.insert(sel, cap);
    }

    pub fn unused(&self, sel: Selector) -> bool {
        self.get(sel).is_none()
    }

    /// `unset(sel)` — spec §4.4.5: free slot only, does not touch children.
    pub fn unset(&mut self, sel: Selector) -> Option<Capability> {
        self.slots.remove(&sel)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Selector, &Capability)> {
        self.slots.iter()
    }

    pub fn selectors(&self) -> Vec<Selector> {
        self.slots.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

/// `create(vpe, selector, cap)` — spec §4.4.2. Installs a new root cap;
/// returns `EXISTS` if the selector is already occupied.
pub fn create(table: &mut CapTable, sel: Selector, id: CapId, obj: KObject) -> Result<()> {
    if !table.unused(sel) {
        return Err(Error::new(Code::Exists));
    }
    table.set(sel, Capability::new_root(id, obj));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::CapSpace;

    fn gate(label: u64) -> KObject {
        KObject::MessageGate {
            label,
            ep: crate::kobject::EpState::Unbound,
        }
    }

    #[test]
    fn create_twice_at_same_selector_is_exists() {
        let mut t = CapTable::new();
        let id = CapId::pack(CapSpace::Object, 0, 0, 5);
        create(&mut t, 5, id, gate(1)).unwrap();
        assert_eq!(create(&mut t, 5, id, gate(2)).unwrap_err().code(), Code::Exists);
    }

    #[test]
    fn revoking_slots_are_hidden_from_get() {
        let mut t = CapTable::new();
        let id = CapId::pack(CapSpace::Object, 0, 0, 1);
        create(&mut t, 1, id, gate(1)).unwrap();
        t.get_raw_mut(1).unwrap().state = CapState::Revoking;
        assert!(t.get(1).is_none());
    }
}
