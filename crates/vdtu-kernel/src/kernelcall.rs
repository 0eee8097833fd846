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

//! The kernelcall wire protocol (spec §4.4.3 "Reply protocol", §6): the
//! bytes carried in the payload of a DTU message exchanged between two
//! kernels to drive cross-kernel revocation. Routed exactly like any other
//! DTU message (through `EndpointTable::send`/fetch and, across nodes,
//! `InterNodeBridge`) — the distilled spec treats the RPC dispatcher that
//! would otherwise carry this as out of scope (spec §1), so kernels talk
//! this protocol directly over DTU gates reserved for kernel control
//! traffic.

use vdtu_cap::CapId;
use vdtu_core::error::{Code, Error, Result};

const OP_REVOKE_BATCH: u8 = 1;
const OP_REVOKE_FINISH: u8 = 2;
const OP_ADD_CHILD_REMOTE: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kernelcall {
    RevokeBatch {
        parent_id: CapId,
        origin: CapId,
        child_ids: Vec<CapId>,
    },
    RevokeFinish {
        parent_id: CapId,
    },
    /// spec §4.4.5 "obtain(sel, parent) ... otherwise the remote parent will
    /// be informed by an addChildCapPtr message after success": sent by the
    /// kernel that just installed a capability obtained from a parent hosted
    /// on a different kernel (`CapabilityCore::create_with_parent`), to the
    /// kernel owning that parent, so its `children` set picks up the new
    /// remote id before any future revoke walk needs to see it.
    AddChildRemote {
        parent_id: CapId,
        child_id: CapId,
    },
}

impl Kernelcall {
    /// `[opcode:1][parent_id:8][origin:8][count:2][child_ids: count*8]` for
    /// a batch; `[opcode:1][parent_id:8]` for a finish notice.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Kernelcall::RevokeBatch { parent_id, origin, child_ids } => {
                let mut out = Vec::with_capacity(1 + 8 + 8 + 2 + child_ids.len() * 8);
                out.push(OP_REVOKE_BATCH);
                out.extend_from_slice(&parent_id.0.to_le_bytes());
                out.extend_from_slice(&origin.0.to_le_bytes());
                out.extend_from_slice(&(child_ids.len() as u16).to_le_bytes());
                for id in child_ids {
                    out.extend_from_slice(&id.0.to_le_bytes());
                }
                out
            },
            Kernelcall::RevokeFinish { parent_id } => {
                let mut out = Vec::with_capacity(1 + 8);
                out.push(OP_REVOKE_FINISH);
                out.extend_from_slice(&parent_id.0.to_le_bytes());
                out
            },
            Kernelcall::AddChildRemote { parent_id, child_id } => {
                let mut out = Vec::with_capacity(1 + 8 + 8);
                out.push(OP_ADD_CHILD_REMOTE);
                out.extend_from_slice(&parent_id.0.to_le_bytes());
                out.extend_from_slice(&child_id.0.to_le_bytes());
                out
            },
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::with_msg(Code::InvalidArgs, "empty kernelcall payload"));
        }
        match bytes[0] {
            OP_REVOKE_BATCH => {
                if bytes.len() < 19 {
                    return Err(Error::with_msg(Code::InvalidArgs, "truncated RevokeBatch"));
                }
                let parent_id = CapId(u64::from_le_bytes(bytes[1..9].try_into().unwrap()));
                let origin = CapId(u64::from_le_bytes(bytes[9..17].try_into().unwrap()));
                let count = u16::from_le_bytes([bytes[17], bytes[18]]) as usize;
                if bytes.len() != 19 + count * 8 {
                    return Err(Error::with_msg(Code::InvalidArgs, "RevokeBatch length mismatch"));
                }
                let child_ids = bytes[19..]
                    .chunks_exact(8)
                    .map(|c| CapId(u64::from_le_bytes(c.try_into().unwrap())))
                    .collect();
                Ok(Kernelcall::RevokeBatch { parent_id, origin, child_ids })
            },
            OP_REVOKE_FINISH => {
                if bytes.len() != 9 {
                    return Err(Error::with_msg(Code::InvalidArgs, "malformed RevokeFinish"));
                }
                let parent_id = CapId(u64::from_le_bytes(bytes[1..9].try_into().unwrap()));
                Ok(Kernelcall::RevokeFinish { parent_id })
            },
            OP_ADD_CHILD_REMOTE => {
                if bytes.len() != 17 {
                    return Err(Error::with_msg(Code::InvalidArgs, "malformed AddChildRemote"));
                }
                let parent_id = CapId(u64::from_le_bytes(bytes[1..9].try_into().unwrap()));
                let child_id = CapId(u64::from_le_bytes(bytes[9..17].try_into().unwrap()));
                Ok(Kernelcall::AddChildRemote { parent_id, child_id })
            },
            op => Err(Error::with_msg(Code::InvalidArgs, format!("unknown kernelcall opcode {op}"))),
        }
    }
}
