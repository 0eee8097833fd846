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

//! EndpointTable (spec §4.3): per-tile array of `EP_COUNT` typed endpoint
//! descriptors, backed by a shared [`ChannelTable`]. Endpoints move through
//! the state machine `Invalid -> Configured(Send|Receive|Memory) -> Invalid`
//! via the `config_*` / `invalidate_*` operations (spec §4.3 "State machine
//! per endpoint").

use std::collections::HashMap;

use crate::channel::{ChannelTable, MemRegion};
use crate::error::{Code, Error, Result};
use crate::klog;
use crate::wire::{Header, HeaderFlags, HEADER_SIZE};

pub const EP_COUNT: usize = 16;
/// EPs `[0, RESERVED_EP_BASE)` are handler-polled (application receive/send
/// gates); `[RESERVED_EP_BASE, EP_COUNT)` are reserved for ad-hoc reply
/// send-EPs created by [`EndpointTable::reply`], so a reply never reuses
/// (and thus self-overwrites) an EP the caller is actively polling.
pub const RESERVED_EP_BASE: usize = 8;

pub type TileId = u16;
pub type EpId = u8;
pub type VpeId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perm {
    R,
    W,
    RW,
}

#[derive(Debug, Clone, Copy)]
pub struct SendDescriptor {
    pub dest_tile: TileId,
    pub dest_ep: EpId,
    pub dest_vpe: VpeId,
    pub msg_size_max: u32,
    pub label: u64,
    pub credits: u32,
    /// `Some(channel)` when the destination is local and a channel was
    /// attached at configure time; `None` when the destination tile is
    /// remote, in which case [`EndpointTable::send`] hands the framed
    /// message back to the caller for the inter-node bridge.
    pub channel: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReceiveDescriptor {
    pub buf_order: u32,
    pub msg_order: u32,
    pub flags: u32,
    pub channel: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryDescriptor {
    pub dest_tile: TileId,
    pub base_addr: u64,
    pub size: u64,
    pub dest_vpe: VpeId,
    pub perm: Perm,
    pub channel: usize,
}

#[derive(Debug, Clone, Copy)]
pub enum EndpointDescriptor {
    Invalid,
    Send(SendDescriptor),
    Receive(ReceiveDescriptor),
    Memory(MemoryDescriptor),
}

impl Default for EndpointDescriptor {
    fn default() -> Self {
        EndpointDescriptor::Invalid
    }
}

/// Extra per-send fields that are not part of a configured send
/// descriptor: the EP on the sender that replies should target, the label
/// the receiver must quote back, and header flags.
///
/// `label_override`, when set, replaces the send descriptor's configured
/// label in the outgoing header. `reply` uses this to quote the original
/// message's `reply_label` as the reply's `label`, since the ad hoc
/// reply-EP `find_or_create_reply_ep` binds carries no label of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendExtras {
    pub reply_ep: EpId,
    pub reply_label: u64,
    pub flags: HeaderFlags,
    pub label_override: Option<u64>,
}

/// What [`EndpointTable::send`] (or `reply`) did with a message: delivered
/// it into a local ring directly, or handed back a framed byte buffer for a
/// remote tile that the kernel must push into the inter-node bridge's
/// outbound ring.
#[derive(Debug)]
pub enum SendOutcome {
    Delivered,
    Remote { dest_tile: TileId, frame: Vec<u8> },
}

const ONE_PAGE: u32 = 4096;
const UNLIM_CREDITS: u32 = u32::MAX;

pub struct EndpointTable {
    tiles: HashMap<TileId, [EndpointDescriptor; EP_COUNT]>,
    tile_vpe: HashMap<TileId, VpeId>,
    channels: ChannelTable,
    local_tile_count: TileId,
}

impl EndpointTable {
    pub fn new(local_tile_count: TileId) -> Self {
        EndpointTable {
            tiles: HashMap::new(),
            tile_vpe: HashMap::new(),
            channels: ChannelTable::new(),
            local_tile_count,
        }
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    fn eps_mut(&mut self, tile: TileId) -> &mut [EndpointDescriptor; EP_COUNT] {
        self.tiles
            .entry(tile)
            .or_insert_with(|| [EndpointDescriptor::Invalid; EP_COUNT])
    }

    fn eps(&self, tile: TileId) -> Option<&[EndpointDescriptor; EP_COUNT]> {
        self.tiles.get(&tile)
    }

    fn check_ep(ep: EpId) -> Result<()> {
        if ep as usize >= EP_COUNT {
            return Err(Error::with_msg(
                Code::InvalidArgs,
                format!("endpoint {ep} out of range (0..{EP_COUNT})"),
            ));
        }
        Ok(())
    }

    pub fn set_vpe_id(&mut self, tile: TileId, vpe_id: VpeId) {
        self.tile_vpe.insert(tile, vpe_id);
    }

    pub fn vpe_id(&self, tile: TileId) -> VpeId {
        self.tile_vpe.get(&tile).copied().unwrap_or(0)
    }

    pub fn is_local(&self, tile: TileId) -> bool {
        tile < self.local_tile_count
    }

    /// `config_recv(tile, ep, buf_order, msg_order, flags)` — spec §4.3.
    pub fn config_recv(
        &mut self,
        tile: TileId,
        ep: EpId,
        buf_order: u32,
        msg_order: u32,
        flags: u32,
    ) -> Result<usize> {
        Self::check_ep(ep)?;

        let mut slot_count = 1u32 << (buf_order - msg_order);
        let mut slot_size = 1u32 << msg_order;
        // clamp to one-page capacity, per spec §4.3
        while slot_count > 1 && slot_count as u64 * slot_size as u64 > ONE_PAGE as u64 {
            slot_count /= 2;
        }
        if slot_size > ONE_PAGE {
            slot_size = ONE_PAGE;
        }

        let channel = self
            .channels
            .alloc_msg()
            .ok_or_else(|| Error::new(Code::NoSpace))?;
        self.channels.init_ring(channel, slot_count, slot_size)?;

        self.eps_mut(tile)[ep as usize] = EndpointDescriptor::Receive(ReceiveDescriptor {
            buf_order,
            msg_order,
            flags,
            channel,
        });
        klog!(EPS, "tile{}:ep{} = Receive(channel={})", tile, ep, channel);
        Ok(channel)
    }

    /// `config_send(tile, ep, dest_tile, dest_ep, dest_vpe, msg_size_max,
    /// label, credits)` — spec §4.3.
    #[allow(clippy::too_many_arguments)]
    pub fn config_send(
        &mut self,
        tile: TileId,
        ep: EpId,
        dest_tile: TileId,
        dest_ep: EpId,
        dest_vpe: VpeId,
        msg_size_max: u32,
        label: u64,
        credits: u32,
    ) -> Result<Option<usize>> {
        Self::check_ep(ep)?;

        let channel = if self.is_local(dest_tile) {
            let dest_eps = self
                .eps(dest_tile)
                .ok_or_else(|| Error::new(Code::NoDest))?;
            let dest_channel = match dest_eps[dest_ep as usize] {
                EndpointDescriptor::Receive(r) => r.channel,
                _ => return Err(Error::new(Code::NoDest)),
            };
            self.channels.attach_ring(dest_channel)?;
            Some(dest_channel)
        }
        else {
            None
        };

        self.eps_mut(tile)[ep as usize] = EndpointDescriptor::Send(SendDescriptor {
            dest_tile,
            dest_ep,
            dest_vpe,
            msg_size_max,
            label,
            credits,
            channel,
        });
        Ok(channel)
    }

    /// `config_mem(tile, ep, dest_tile, base, size, dest_vpe, perm)` —
    /// spec §4.3.
    pub fn config_mem(
        &mut self,
        tile: TileId,
        ep: EpId,
        dest_tile: TileId,
        base: u64,
        size: u64,
        dest_vpe: VpeId,
        perm: Perm,
    ) -> Result<usize> {
        Self::check_ep(ep)?;
        let channel = self
            .channels
            .alloc_mem()
            .ok_or_else(|| Error::new(Code::NoSpace))?;
        self.channels
            .bind_mem(channel, MemRegion::new(base, size, perm))?;

        self.eps_mut(tile)[ep as usize] = EndpointDescriptor::Memory(MemoryDescriptor {
            dest_tile,
            base_addr: base,
            size,
            dest_vpe,
            perm,
            channel,
        });
        Ok(channel)
    }

    /// `invalidate_ep(tile, ep)` — marks the descriptor invalid and frees
    /// the channel it owned (receive and memory endpoints own a pool slot;
    /// send endpoints only attach to another tile's ring and free nothing).
    pub fn invalidate_ep(&mut self, tile: TileId, ep: EpId) -> Result<()> {
        Self::check_ep(ep)?;
        let desc = std::mem::take(&mut self.eps_mut(tile)[ep as usize]);
        klog!(EPS, "tile{}:ep{} = invalid", tile, ep);
        match desc {
            EndpointDescriptor::Receive(r) => self.channels.free_msg(r.channel)?,
            EndpointDescriptor::Memory(m) => self.channels.free_mem(m.channel)?,
            EndpointDescriptor::Send(_) | EndpointDescriptor::Invalid => {},
        }
        Ok(())
    }

    /// `invalidate_eps(tile, first)` — sweep from `first` onwards.
    pub fn invalidate_eps(&mut self, tile: TileId, first: EpId) -> Result<()> {
        for ep in first..EP_COUNT as EpId {
            self.invalidate_ep(tile, ep)?;
        }
        Ok(())
    }

    fn send_descriptor(&self, tile: TileId, ep: EpId) -> Result<SendDescriptor> {
        match self.eps(tile).map(|eps| eps[ep as usize]) {
            Some(EndpointDescriptor::Send(s)) => Ok(s),
            _ => Err(Error::with_msg(
                Code::InvalidArgs,
                "endpoint is not configured as a send endpoint",
            )),
        }
    }

    fn receive_descriptor(&self, tile: TileId, ep: EpId) -> Result<ReceiveDescriptor> {
        match self.eps(tile).map(|eps| eps[ep as usize]) {
            Some(EndpointDescriptor::Receive(r)) => Ok(r),
            _ => Err(Error::with_msg(
                Code::InvalidArgs,
                "endpoint is not configured as a receive endpoint",
            )),
        }
    }

    fn memory_descriptor(&self, tile: TileId, ep: EpId) -> Result<MemoryDescriptor> {
        match self.eps(tile).map(|eps| eps[ep as usize]) {
            Some(EndpointDescriptor::Memory(m)) => Ok(m),
            _ => Err(Error::with_msg(
                Code::InvalidArgs,
                "endpoint is not configured as a memory endpoint",
            )),
        }
    }

    /// `read_mem(tile, ep, offset, len)` — spec §9 open question: reads
    /// `len` bytes at `offset` from the window a memory endpoint was
    /// configured onto, enforcing the endpoint's `perm` and the window's
    /// bounds (see `MemRegion::read`, and `DESIGN.md` for why this resolves
    /// the source's stub).
    pub fn read_mem(&self, tile: TileId, ep: EpId, offset: u64, len: usize) -> Result<Vec<u8>> {
        Self::check_ep(ep)?;
        let desc = self.memory_descriptor(tile, ep)?;
        let region = self.channels.get_mem(desc.channel)?;
        Ok(region.read(offset, len)?.to_vec())
    }

    /// `write_mem(tile, ep, offset, bytes)` — counterpart to [`read_mem`].
    pub fn write_mem(&mut self, tile: TileId, ep: EpId, offset: u64, bytes: &[u8]) -> Result<()> {
        Self::check_ep(ep)?;
        let desc = self.memory_descriptor(tile, ep)?;
        self.channels.get_mem_mut(desc.channel)?.write(offset, bytes)
    }

    /// `send(tile, ep, payload, extras)` — spec §4.3. Resolves the channel
    /// via the send descriptor; when the destination was configured remote
    /// (see [`config_send`]), returns a framed message for the caller to
    /// hand to the inter-node bridge instead of writing to a local ring.
    pub fn send(
        &mut self,
        tile: TileId,
        ep: EpId,
        payload: &[u8],
        extras: SendExtras,
    ) -> Result<SendOutcome> {
        Self::check_ep(ep)?;
        let desc = self.send_descriptor(tile, ep)?;
        let sender_vpe = self.vpe_id(tile);

        let label = extras.label_override.unwrap_or(desc.label);
        match desc.channel {
            Some(channel) => {
                let ring = self.channels.get_ring_mut(channel)?;
                ring.send(
                    tile,
                    ep,
                    sender_vpe,
                    extras.reply_ep,
                    label,
                    extras.reply_label,
                    extras.flags,
                    payload,
                )?;
                Ok(SendOutcome::Delivered)
            },
            None => {
                if HEADER_SIZE + payload.len() > desc.msg_size_max as usize {
                    return Err(Error::new(Code::E2Big));
                }
                let header = Header {
                    flags: extras.flags,
                    sender_tile: tile,
                    sender_ep: ep,
                    reply_ep: extras.reply_ep,
                    length: payload.len() as u16,
                    sender_vpe,
                    label,
                    reply_label: extras.reply_label,
                };
                let mut frame = vec![0u8; HEADER_SIZE + payload.len()];
                header.encode(&mut frame[..HEADER_SIZE]);
                frame[HEADER_SIZE..].copy_from_slice(payload);
                Ok(SendOutcome::Remote {
                    dest_tile: desc.dest_tile,
                    frame,
                })
            },
        }
    }

    /// Pushes an already-framed (header + payload) message straight into a
    /// receive endpoint's ring, bypassing `send`'s descriptor resolution.
    /// Used to hand a message arriving over the inter-node bridge to the
    /// local endpoint the kernel's label-routing table resolved it to; the
    /// NoC hardware this emulates would have delivered it there directly.
    pub fn deliver_framed(&mut self, tile: TileId, ep: EpId, frame: &[u8]) -> Result<()> {
        Self::check_ep(ep)?;
        let desc = self.receive_descriptor(tile, ep)?;
        self.channels.get_ring_mut(desc.channel)?.send_framed(frame)
    }

    /// `fetch(tile, ep)` — returns the decoded header and a copy of the
    /// payload bytes of the message at the receive endpoint's ring tail,
    /// without consuming it.
    pub fn fetch(&self, tile: TileId, ep: EpId) -> Result<Option<(Header, Vec<u8>)>> {
        Self::check_ep(ep)?;
        let desc = self.receive_descriptor(tile, ep)?;
        let ring = self.channels.get_ring(desc.channel)?;
        Ok(ring.fetch().map(|m| (m.header, m.data.to_vec())))
    }

    /// `ack(tile, ep)` — advance past a fetched message.
    pub fn ack(&mut self, tile: TileId, ep: EpId) -> Result<()> {
        Self::check_ep(ep)?;
        let desc = self.receive_descriptor(tile, ep)?;
        self.channels.get_ring_mut(desc.channel)?.ack();
        Ok(())
    }

    /// `reply(tile, ep, payload)` — spec §4.3. Reads the not-yet-acked
    /// message at `(tile, ep)`'s ring tail, finds or creates a reserved
    /// send-EP targeting the original sender's `reply_ep`, and sends the
    /// reply with `flags.reply = 1`, quoting the original `reply_label`.
    pub fn reply(&mut self, tile: TileId, ep: EpId, payload: &[u8]) -> Result<SendOutcome> {
        Self::check_ep(ep)?;
        let desc = self.receive_descriptor(tile, ep)?;
        let ring = self.channels.get_ring(desc.channel)?;
        let msg = ring
            .fetch()
            .ok_or_else(|| Error::with_msg(Code::InvalidArgs, "no message to reply to"))?;
        let header = msg.header;

        let reply_ep = self.find_or_create_reply_ep(
            tile,
            header.sender_tile,
            header.reply_ep,
            header.sender_vpe,
            desc.buf_order,
            desc.msg_order,
        )?;

        self.send(
            tile,
            reply_ep,
            payload,
            SendExtras {
                reply_ep: 0,
                reply_label: 0,
                flags: HeaderFlags::REPLY,
                label_override: Some(header.reply_label),
            },
        )
    }

    fn find_or_create_reply_ep(
        &mut self,
        tile: TileId,
        dest_tile: TileId,
        dest_ep: EpId,
        dest_vpe: VpeId,
        _buf_order: u32,
        msg_order: u32,
    ) -> Result<EpId> {
        if let Some(eps) = self.eps(tile) {
            for (idx, desc) in eps.iter().enumerate().skip(RESERVED_EP_BASE) {
                if let EndpointDescriptor::Send(s) = desc {
                    if s.dest_tile == dest_tile && s.dest_ep == dest_ep {
                        return Ok(idx as EpId);
                    }
                }
            }
            for idx in RESERVED_EP_BASE..EP_COUNT {
                if matches!(eps[idx], EndpointDescriptor::Invalid) {
                    self.config_send(
                        tile,
                        idx as EpId,
                        dest_tile,
                        dest_ep,
                        dest_vpe,
                        1 << msg_order,
                        0,
                        UNLIM_CREDITS,
                    )?;
                    return Ok(idx as EpId);
                }
            }
        }
        Err(Error::new(Code::NoSpace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_exhaustion_then_recovery() {
        // spec §8 end-to-end scenario 2
        let _ = env_logger::try_init();
        let mut t = EndpointTable::new(64);
        for i in 0..8u8 {
            t.config_recv(1, i, 11, 9, 0).unwrap();
        }
        assert_eq!(
            t.config_recv(1, 8, 11, 9, 0).unwrap_err().code(),
            Code::NoSpace
        );

        t.invalidate_ep(1, 3).unwrap();
        t.config_recv(2, 0, 11, 9, 0).unwrap();
    }

    #[test]
    fn config_send_to_unconfigured_dest_is_no_dest() {
        let mut t = EndpointTable::new(64);
        assert_eq!(
            t.config_send(1, 0, 2, 0, 0, 512, 0xAA, 1)
                .unwrap_err()
                .code(),
            Code::NoDest
        );
    }

    #[test]
    fn local_send_then_fetch_roundtrip() {
        let mut t = EndpointTable::new(64);
        t.config_recv(2, 0, 11, 9, 0).unwrap();
        t.config_send(1, 0, 2, 0, 0, 512, 0xAAAA, 1).unwrap();

        t.send(1, 0, b"hi", SendExtras::default()).unwrap();
        let (header, data) = t.fetch(2, 0).unwrap().expect("message");
        assert_eq!(header.label, 0xAAAA);
        assert_eq!(data, b"hi");
        t.ack(2, 0).unwrap();
    }

    #[test]
    fn remote_send_returns_framed_message_instead_of_delivering() {
        let mut t = EndpointTable::new(4); // tile 10 is remote
        t.config_send(1, 0, 10, 3, 0, 512, 0x50, 1).unwrap();
        match t.send(1, 0, b"ping", SendExtras::default()).unwrap() {
            SendOutcome::Remote { dest_tile, frame } => {
                assert_eq!(dest_tile, 10);
                assert_eq!(frame.len(), HEADER_SIZE + 4);
            },
            SendOutcome::Delivered => panic!("expected remote outcome"),
        }
    }

    #[test]
    fn reply_sets_reply_flag_and_quotes_reply_label() {
        let mut t = EndpointTable::new(64);
        t.config_recv(2, 0, 11, 9, 0).unwrap();
        t.config_recv(1, 0, 11, 9, 0).unwrap();
        t.config_send(1, 1, 2, 0, 0, 512, 0xAAAA, 1).unwrap();

        t.send(
            1,
            1,
            b"req",
            SendExtras {
                reply_ep: 0,
                reply_label: 0x1234,
                flags: HeaderFlags::empty(),
                label_override: None,
            },
        )
        .unwrap();

        t.reply(2, 0, b"resp").unwrap();
        t.ack(2, 0).unwrap();

        let (header, data) = t.fetch(1, 0).unwrap().expect("reply delivered");
        assert!(header.is_reply());
        assert_eq!(header.label, 0x1234);
        assert_eq!(data, b"resp");
    }

    #[test]
    fn memory_endpoint_write_then_read_round_trips() {
        let mut t = EndpointTable::new(64);
        t.config_mem(1, 0, 2, 0x4000, 256, 0, Perm::RW).unwrap();
        t.write_mem(1, 0, 16, b"hello").unwrap();
        assert_eq!(t.read_mem(1, 0, 16, 5).unwrap(), b"hello");
    }

    #[test]
    fn memory_endpoint_enforces_perm() {
        let mut t = EndpointTable::new(64);
        t.config_mem(1, 0, 2, 0, 256, 0, Perm::R).unwrap();
        assert_eq!(
            t.write_mem(1, 0, 0, b"x").unwrap_err().code(),
            Code::NoPerm
        );
    }

    #[test]
    fn memory_endpoint_read_out_of_bounds_is_invalid_args() {
        let mut t = EndpointTable::new(64);
        t.config_mem(1, 0, 2, 0, 32, 0, Perm::RW).unwrap();
        assert_eq!(
            t.read_mem(1, 0, 30, 16).unwrap_err().code(),
            Code::InvalidArgs
        );
    }

    #[test]
    fn read_mem_on_non_memory_endpoint_is_invalid_args() {
        let mut t = EndpointTable::new(64);
        t.config_recv(1, 0, 11, 9, 0).unwrap();
        assert_eq!(
            t.read_mem(1, 0, 0, 4).unwrap_err().code(),
            Code::InvalidArgs
        );
    }
}
