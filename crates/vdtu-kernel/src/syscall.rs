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

//! The syscall surface consumed from external collaborators (spec §6,
//! §1 "the core only requires the *effects* these invoke on the capability
//! table"): opcodes NOOP, CREATEGATE, EXCHANGE, REVOKE, with fixed-order
//! word payloads. The syscall handler *bodies* that dispatch a raw kernel
//! message to one of these are out of scope; this module only defines the
//! wire shape and the effect each op has on [`vdtu_cap::CapabilityCore`].

use vdtu_cap::{CapSpace, Selector};
use vdtu_core::error::{Code, Error, Result};

pub const OP_NOOP: u32 = 18;
pub const OP_CREATEGATE: u32 = 4;
pub const OP_EXCHANGE: u32 = 9;
pub const OP_REVOKE: u32 = 16;

/// A capability range: `(type, start, count)` padded to 16 bytes on the
/// wire (spec §6 "Each range is `(type, start, count)` padded to 16
/// bytes."). `type` 0 selects the object space, 1 the mapping space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub space: CapSpace,
    pub start: Selector,
    pub count: Selector,
}

impl Range {
    pub const WIRE_SIZE: usize = 16;

    pub fn encode(&self, out: &mut [u8]) {
        assert!(out.len() >= Self::WIRE_SIZE);
        out.fill(0);
        out[0] = match self.space {
            CapSpace::Object => 0,
            CapSpace::Mapping => 1,
        };
        out[4..8].copy_from_slice(&self.start.to_le_bytes());
        out[8..12].copy_from_slice(&self.count.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(Error::with_msg(Code::InvalidArgs, "truncated range"));
        }
        let space = match buf[0] {
            0 => CapSpace::Object,
            1 => CapSpace::Mapping,
            t => return Err(Error::with_msg(Code::InvalidArgs, format!("unknown range type {t}"))),
        };
        let start = Selector::from_le_bytes(buf[4..8].try_into().unwrap());
        let count = Selector::from_le_bytes(buf[8..12].try_into().unwrap());
        Ok(Range { space, start, count })
    }
}

/// CREATEGATE's fixed-order payload (spec §6): `tcap, dstcap, label, epid,
/// credits`. `tcap == 0` is the sentinel for "the calling VPE's own
/// table" (see `DESIGN.md`'s Open Question decision); a nonzero `tcap`
/// must resolve to a `Vpe` capability in the caller's object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateGate {
    pub tcap: Selector,
    pub dstcap: Selector,
    pub label: u64,
    pub epid: u8,
    pub credits: u32,
}

impl CreateGate {
    pub const WIRE_SIZE: usize = 4 + 4 + 8 + 1 + 4;

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(Error::with_msg(Code::InvalidArgs, "truncated CREATEGATE payload"));
        }
        Ok(CreateGate {
            tcap: Selector::from_le_bytes(buf[0..4].try_into().unwrap()),
            dstcap: Selector::from_le_bytes(buf[4..8].try_into().unwrap()),
            label: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            epid: buf[16],
            credits: u32::from_le_bytes(buf[17..21].try_into().unwrap()),
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tcap.to_le_bytes());
        out.extend_from_slice(&self.dstcap.to_le_bytes());
        out.extend_from_slice(&self.label.to_le_bytes());
        out.push(self.epid);
        out.extend_from_slice(&self.credits.to_le_bytes());
    }
}

/// EXCHANGE's fixed-order payload: `tcap, own_range, other_range, obtain`.
/// `tcap` names the peer VPE the same way [`CreateGate::tcap`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    pub tcap: Selector,
    pub own_range: Range,
    pub other_range: Range,
    pub obtain: bool,
}

impl Exchange {
    pub const WIRE_SIZE: usize = 4 + Range::WIRE_SIZE + Range::WIRE_SIZE + 1;

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(Error::with_msg(Code::InvalidArgs, "truncated EXCHANGE payload"));
        }
        let tcap = Selector::from_le_bytes(buf[0..4].try_into().unwrap());
        let own_range = Range::decode(&buf[4..20])?;
        let other_range = Range::decode(&buf[20..36])?;
        let obtain = buf[36] != 0;
        Ok(Exchange { tcap, own_range, other_range, obtain })
    }
}

/// REVOKE's fixed-order payload: `range, own`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revoke {
    pub range: Range,
    pub own: bool,
}

impl Revoke {
    pub const WIRE_SIZE: usize = Range::WIRE_SIZE + 1;

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(Error::with_msg(Code::InvalidArgs, "truncated REVOKE payload"));
        }
        let range = Range::decode(&buf[0..16])?;
        let own = buf[16] != 0;
        Ok(Revoke { range, own })
    }
}

/// A syscall reply is a single `(error_code: u64)` word (spec §6). `0`
/// means success; nonzero values are a stable enumeration of [`Code`],
/// distinct from the in-process [`Error`] type used elsewhere in this
/// crate family (which carries a message that doesn't survive the wire).
pub fn encode_reply(result: &Result<()>) -> [u8; 8] {
    let code: u64 = match result {
        Ok(()) => 0,
        Err(e) => match e.code() {
            Code::InvalidArgs => 1,
            Code::Full => 2,
            Code::E2Big => 3,
            Code::NoSpace => 4,
            Code::NoPerm => 5,
            Code::NoDest => 6,
            Code::OutOfMem => 7,
            Code::NotFound => 8,
            Code::Exists => 9,
        },
    };
    code.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_round_trips() {
        let r = Range { space: CapSpace::Mapping, start: 20, count: 3 };
        let mut buf = [0u8; Range::WIRE_SIZE];
        r.encode(&mut buf);
        assert_eq!(Range::decode(&buf).unwrap(), r);
    }

    #[test]
    fn create_gate_round_trips() {
        let cg = CreateGate { tcap: 0, dstcap: 5, label: 0xAAAA, epid: 2, credits: 10 };
        let mut buf = Vec::new();
        cg.encode(&mut buf);
        assert_eq!(CreateGate::decode(&buf).unwrap(), cg);
    }

    #[test]
    fn encode_reply_ok_is_zero() {
        assert_eq!(u64::from_le_bytes(encode_reply(&Ok(()))), 0);
    }

    #[test]
    fn encode_reply_maps_each_code_to_a_distinct_nonzero_word() {
        let codes = [
            Code::InvalidArgs, Code::Full, Code::E2Big, Code::NoSpace,
            Code::NoPerm, Code::NoDest, Code::OutOfMem, Code::NotFound, Code::Exists,
        ];
        let mut seen = std::collections::HashSet::new();
        for c in codes {
            let word = u64::from_le_bytes(encode_reply(&Err(Error::new(c))));
            assert_ne!(word, 0);
            assert!(seen.insert(word));
        }
    }
}
