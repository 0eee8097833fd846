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

//! The kind-specific payload a capability confers access to (spec §3
//! "Capability", `kind` / `payload`). Mirrors the shape of the teacher's
//! `cap::KObject` enum, minus the kinds this system doesn't model
//! (`Serv`/`Sess` collapse to the two named here, `Sem` is dropped — no
//! semaphore primitive in scope).

use vdtu_core::endpoint::{EpId, Perm, TileId, VpeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpState {
    Unbound,
    Bound(TileId, EpId),
}

#[derive(Debug, Clone)]
pub enum KObject {
    /// A send or receive gate: the routing label stamped into headers, and
    /// the endpoint it is currently bound to (if any).
    MessageGate { label: u64, ep: EpState },
    MemoryWindow {
        tile: TileId,
        base: u64,
        size: u64,
        perm: Perm,
    },
    Vpe { vpe: VpeId },
    Service { name: String },
    Session { service_sel: u32 },
    /// An address-space mapping; `mapped` tracks whether it is currently
    /// installed (idempotent `revoke_hook`).
    Mapping { frame: u64, pages: u32, mapped: bool },
}

impl KObject {
    pub fn kind_name(&self) -> &'static str {
        match self {
            KObject::MessageGate { .. } => "MessageGate",
            KObject::MemoryWindow { .. } => "MemoryWindow",
            KObject::Vpe { .. } => "VPE",
            KObject::Service { .. } => "Service",
            KObject::Session { .. } => "Session",
            KObject::Mapping { .. } => "Mapping",
        }
    }

    /// The kind-specific teardown action run once, idempotently, when a
    /// capability referencing this object is revoked (spec §4.4.3
    /// `c.revoke_hook()`). Returns `false` only for a `Service` whose abort
    /// failed — the one non-fatal revoke-hook failure the error policy
    /// (spec §7) allows.
    pub fn revoke_hook(&mut self) -> bool {
        match self {
            KObject::MessageGate { ep, .. } => {
                *ep = EpState::Unbound;
                true
            },
            KObject::Mapping { mapped, .. } => {
                *mapped = false;
                true
            },
            _ => true,
        }
    }
}
