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

//! ChannelTable (spec §4.2): binds a small dense channel index to a ring
//! region or a memory window, decoupling the global channel namespace from
//! any one tile's dataport handles. Fixed sizes: 8 message channels, 4
//! memory channels (spec §3).

use crate::endpoint::Perm;
use crate::error::{Code, Error, Result};
use crate::ring::Ring;

pub const MSG_CHANNELS: usize = 8;
pub const MEM_CHANNELS: usize = 4;

/// The largest backing buffer a memory channel will allocate for the window
/// it emulates (spec §9 open question: the source leaves read/write on a
/// memory endpoint stubbed; this is the implementer decision recorded in
/// `DESIGN.md` — one page, matching the ring's own one-page clamp in §4.3).
pub const MEM_WINDOW_CAP: u64 = 4096;

/// A memory-channel region: a window of another tile's address space,
/// reachable for a configured size starting at `base`. `data` is the
/// emulated backing store for that window (spec §9: a production
/// implementation needs to enforce bounds and `perm`, which the source does
/// not; `data`'s length is the enforced bound).
#[derive(Debug, Clone)]
pub struct MemRegion {
    pub base: u64,
    pub size: u64,
    pub perm: Perm,
    data: Vec<u8>,
}

impl MemRegion {
    pub fn new(base: u64, size: u64, perm: Perm) -> Self {
        let len = size.min(MEM_WINDOW_CAP) as usize;
        MemRegion { base, size, perm, data: vec![0u8; len] }
    }

    /// `read(offset, len)` — bounds-checked against the window's backing
    /// store; `perm` must allow reads.
    pub fn read(&self, offset: u64, len: usize) -> Result<&[u8]> {
        if !matches!(self.perm, Perm::R | Perm::RW) {
            return Err(Error::new(Code::NoPerm));
        }
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| Error::with_msg(Code::InvalidArgs, "memory read out of bounds"))?;
        Ok(&self.data[start..end])
    }

    /// `write(offset, bytes)` — bounds-checked; `perm` must allow writes.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        if !matches!(self.perm, Perm::W | Perm::RW) {
            return Err(Error::new(Code::NoPerm));
        }
        let start = offset as usize;
        let end = start
            .checked_add(bytes.len())
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| Error::with_msg(Code::InvalidArgs, "memory write out of bounds"))?;
        self.data[start..end].copy_from_slice(bytes);
        Ok(())
    }
}

pub struct ChannelTable {
    msg: [Option<Ring>; MSG_CHANNELS],
    mem: [Option<MemRegion>; MEM_CHANNELS],
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTable {
    pub fn new() -> Self {
        ChannelTable {
            msg: Default::default(),
            mem: Default::default(),
        }
    }

    fn check_msg_channel(channel: usize) -> Result<()> {
        if channel >= MSG_CHANNELS {
            return Err(Error::with_msg(
                Code::InvalidArgs,
                format!("message channel {channel} out of range (0..{MSG_CHANNELS})"),
            ));
        }
        Ok(())
    }

    fn check_mem_channel(channel: usize) -> Result<()> {
        if channel >= MEM_CHANNELS {
            return Err(Error::with_msg(
                Code::InvalidArgs,
                format!("memory channel {channel} out of range (0..{MEM_CHANNELS})"),
            ));
        }
        Ok(())
    }

    /// `init_ring(channel, slot_count, slot_size)` — issued exactly once
    /// per channel, by the configuring (receiving) side.
    pub fn init_ring(&mut self, channel: usize, slot_count: u32, slot_size: u32) -> Result<()> {
        Self::check_msg_channel(channel)?;
        let ring = Ring::init(slot_count, slot_size)?;
        self.msg[channel] = Some(ring);
        Ok(())
    }

    /// `bind_msg(channel, region)` — binds a channel index directly to an
    /// already-initialized [`Ring`], as opposed to [`init_ring`] which
    /// allocates a fresh one. Used when a ring's backing bytes arrive from
    /// elsewhere (e.g. a region handed off by a peer) rather than being
    /// created locally.
    pub fn bind_msg(&mut self, channel: usize, region: Ring) -> Result<()> {
        Self::check_msg_channel(channel)?;
        self.msg[channel] = Some(region);
        Ok(())
    }

    /// `attach_ring(channel)` — idempotent; either side may call it, but
    /// here it is a no-op once the local handle already has a ring bound
    /// (channels are local-process state, so "attach" and "init" converge
    /// on the same handle for the configuring side, and the sending side
    /// looks the ring up by channel index directly via [`get_ring`]).
    pub fn attach_ring(&mut self, channel: usize) -> Result<()> {
        Self::check_msg_channel(channel)?;
        if self.msg[channel].is_none() {
            return Err(Error::with_msg(
                Code::NoDest,
                format!("channel {channel} has no ring to attach to"),
            ));
        }
        Ok(())
    }

    pub fn get_ring(&self, channel: usize) -> Result<&Ring> {
        Self::check_msg_channel(channel)?;
        self.msg[channel]
            .as_ref()
            .ok_or_else(|| Error::new(Code::NoDest))
    }

    pub fn get_ring_mut(&mut self, channel: usize) -> Result<&mut Ring> {
        Self::check_msg_channel(channel)?;
        self.msg[channel]
            .as_mut()
            .ok_or_else(|| Error::new(Code::NoDest))
    }

    pub fn bind_mem(&mut self, channel: usize, region: MemRegion) -> Result<()> {
        Self::check_mem_channel(channel)?;
        self.mem[channel] = Some(region);
        Ok(())
    }

    pub fn get_mem(&self, channel: usize) -> Result<&MemRegion> {
        Self::check_mem_channel(channel)?;
        self.mem[channel]
            .as_ref()
            .ok_or_else(|| Error::new(Code::NoDest))
    }

    pub fn get_mem_mut(&mut self, channel: usize) -> Result<&mut MemRegion> {
        Self::check_mem_channel(channel)?;
        self.mem[channel]
            .as_mut()
            .ok_or_else(|| Error::new(Code::NoDest))
    }

    /// Frees a message channel's ring, returning the slot to the pool.
    pub fn free_msg(&mut self, channel: usize) -> Result<()> {
        Self::check_msg_channel(channel)?;
        self.msg[channel] = None;
        Ok(())
    }

    pub fn free_mem(&mut self, channel: usize) -> Result<()> {
        Self::check_mem_channel(channel)?;
        self.mem[channel] = None;
        Ok(())
    }

    /// The lowest-indexed free message channel, if any.
    pub fn alloc_msg(&self) -> Option<usize> {
        self.msg.iter().position(|c| c.is_none())
    }

    pub fn alloc_mem(&self) -> Option<usize> {
        self.mem.iter().position(|c| c.is_none())
    }
}
