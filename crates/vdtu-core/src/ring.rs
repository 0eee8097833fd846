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

//! SPSC ring-buffer message queue (spec §4.1), grounded in the original
//! `vdtu_ring.c`/`vdtu_ring.h` prototype: a 64-byte control block followed
//! by a power-of-two array of fixed-size slots, each holding a 25-byte
//! header plus payload. Only the producer writes `head`; only the consumer
//! writes `tail`. No locks; the producer never blocks.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Code, Error, Result};
use crate::wire::{Header, HeaderFlags, Message, HEADER_SIZE};

pub const CTRL_SIZE: usize = 64;

fn is_pow2(n: u32) -> bool {
    n >= 2 && (n & (n - 1)) == 0
}

/// The 64-byte control block living at the start of a ring's shared region.
/// `head` and `tail` are the only mutable fields post-init; `slot_count`,
/// `slot_size` and `slot_mask` are immutable once the ring is initialized.
#[repr(C)]
struct Ctrl {
    head: AtomicU32,
    tail: AtomicU32,
    slot_count: u32,
    slot_size: u32,
    slot_mask: u32,
    _pad: [u8; CTRL_SIZE - 5 * 4],
}

const _: () = assert!(std::mem::size_of::<Ctrl>() == CTRL_SIZE);

/// An owned ring-buffer region. In the real system this is a page of shared
/// memory between exactly two tiles; here it is a heap allocation that
/// plays the same role for two in-process handles, or is exchanged as raw
/// bytes between threads/processes in integration tests.
pub struct Ring {
    region: Box<[u8]>,
}

impl Ring {
    fn ctrl(&self) -> &Ctrl {
        unsafe { &*(self.region.as_ptr() as *const Ctrl) }
    }

    fn slots_ptr(&self) -> *const u8 {
        unsafe { self.region.as_ptr().add(CTRL_SIZE) }
    }

    fn slots_mut_ptr(&mut self) -> *mut u8 {
        unsafe { self.region.as_mut_ptr().add(CTRL_SIZE) }
    }

    pub fn total_size(slot_count: u32, slot_size: u32) -> usize {
        CTRL_SIZE + slot_count as usize * slot_size as usize
    }

    /// `init(region, slot_count, slot_size)` — spec §4.1.
    pub fn init(slot_count: u32, slot_size: u32) -> Result<Self> {
        if !is_pow2(slot_count) {
            return Err(Error::with_msg(
                Code::InvalidArgs,
                format!("slot_count {slot_count} is not a power of two >= 2"),
            ));
        }
        if slot_size < HEADER_SIZE as u32 || !is_pow2(slot_size) {
            return Err(Error::with_msg(
                Code::InvalidArgs,
                format!("slot_size {slot_size} must be a power of two >= {HEADER_SIZE}"),
            ));
        }

        let total = Self::total_size(slot_count, slot_size);
        let mut region = vec![0u8; total].into_boxed_slice();
        {
            let ctrl = unsafe { &mut *(region.as_mut_ptr() as *mut Ctrl) };
            ctrl.head = AtomicU32::new(0);
            ctrl.tail = AtomicU32::new(0);
            ctrl.slot_count = slot_count;
            ctrl.slot_size = slot_size;
            ctrl.slot_mask = slot_count - 1;
        }
        Ok(Ring { region })
    }

    /// `attach(region)` — read-only validator that treats an
    /// already-initialized control block as authoritative.
    pub fn attach(region: Box<[u8]>) -> Result<Self> {
        if region.len() < CTRL_SIZE {
            return Err(Error::new(Code::InvalidArgs));
        }
        let ring = Ring { region };
        if ring.ctrl().slot_count == 0 {
            return Err(Error::with_msg(
                Code::InvalidArgs,
                "ring region is not initialized (slot_count == 0)",
            ));
        }
        Ok(ring)
    }

    /// Hands out the raw backing bytes, e.g. to ship to a peer process or
    /// to attach a second handle from the other side.
    pub fn region(&self) -> &[u8] {
        &self.region
    }

    pub fn slot_count(&self) -> u32 {
        self.ctrl().slot_count
    }

    pub fn slot_size(&self) -> u32 {
        self.ctrl().slot_size
    }

    fn head(&self) -> u32 {
        self.ctrl().head.load(Ordering::Acquire)
    }

    fn tail(&self) -> u32 {
        self.ctrl().tail.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.head() == self.tail()
    }

    pub fn is_full(&self) -> bool {
        let mask = self.ctrl().slot_mask;
        ((self.head() + 1) & mask) == self.tail()
    }

    pub fn available(&self) -> u32 {
        (self.head().wrapping_sub(self.tail())) & self.ctrl().slot_mask
    }

    /// `send(...)` — spec §4.1. Writes a fully-formed message into the slot
    /// at `head`, then publishes it with a release store so a concurrent
    /// consumer observing the new `head` is guaranteed to see the slot
    /// contents (the compiler/publication fence the spec requires; shared
    /// memory here is always coherent host RAM, so no hardware fence is
    /// needed beyond the atomic release/acquire pair).
    #[allow(clippy::too_many_arguments)]
    pub fn send(
        &mut self,
        sender_tile: u16,
        sender_ep: u8,
        sender_vpe: u16,
        reply_ep: u8,
        label: u64,
        reply_label: u64,
        flags: HeaderFlags,
        payload: &[u8],
    ) -> Result<()> {
        let slot_size = self.slot_size();
        if HEADER_SIZE + payload.len() > slot_size as usize {
            return Err(Error::with_msg(
                Code::E2Big,
                format!(
                    "payload of {} bytes + header does not fit in a {}-byte slot",
                    payload.len(),
                    slot_size
                ),
            ));
        }

        let mask = self.ctrl().slot_mask;
        let head = self.head();
        let next_head = (head + 1) & mask;
        if next_head == self.tail() {
            return Err(Error::new(Code::Full));
        }

        let header = Header {
            flags,
            sender_tile,
            sender_ep,
            reply_ep,
            length: payload.len() as u16,
            sender_vpe,
            label,
            reply_label,
        };

        let slot_size = slot_size as usize;
        let slot_off = head as usize * slot_size;
        let slot = unsafe {
            std::slice::from_raw_parts_mut(self.slots_mut_ptr().add(slot_off), slot_size)
        };
        slot.fill(0);
        header.encode(&mut slot[..HEADER_SIZE]);
        slot[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);

        self.ctrl().head.store(next_head, Ordering::Release);
        Ok(())
    }

    /// `fetch()` — spec §4.1. Does not advance `tail`.
    pub fn fetch(&self) -> Option<Message<'_>> {
        let tail = self.tail();
        let head = self.head();
        if tail == head {
            return None;
        }
        let slot_size = self.slot_size() as usize;
        let slot_off = tail as usize * slot_size;
        let slot = unsafe { std::slice::from_raw_parts(self.slots_ptr().add(slot_off), slot_size) };
        let header = Header::decode(&slot[..HEADER_SIZE]);
        let len = header.length as usize;
        Some(Message {
            header,
            data: &slot[HEADER_SIZE..HEADER_SIZE + len],
        })
    }

    /// `send_framed(frame)` — like [`Ring::send`], but the header is
    /// already encoded into `frame`'s first [`HEADER_SIZE`] bytes (used by
    /// the inter-node bridge, which forwards an [`crate::endpoint::SendOutcome::Remote`]
    /// frame verbatim instead of re-deriving header fields).
    pub fn send_framed(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() < HEADER_SIZE {
            return Err(Error::with_msg(Code::InvalidArgs, "frame shorter than the header"));
        }
        let slot_size = self.slot_size();
        if frame.len() > slot_size as usize {
            return Err(Error::with_msg(
                Code::E2Big,
                format!("framed message of {} bytes does not fit in a {}-byte slot", frame.len(), slot_size),
            ));
        }

        let mask = self.ctrl().slot_mask;
        let head = self.head();
        let next_head = (head + 1) & mask;
        if next_head == self.tail() {
            return Err(Error::new(Code::Full));
        }

        let slot_size = slot_size as usize;
        let slot_off = head as usize * slot_size;
        let slot = unsafe {
            std::slice::from_raw_parts_mut(self.slots_mut_ptr().add(slot_off), slot_size)
        };
        slot.fill(0);
        slot[..frame.len()].copy_from_slice(frame);

        self.ctrl().head.store(next_head, Ordering::Release);
        Ok(())
    }

    /// `fetch_framed()` — like [`Ring::fetch`], but returns the exact wire
    /// bytes (header + payload) as one owned buffer instead of a decoded
    /// [`Message`]; does not advance `tail`.
    pub fn fetch_framed(&self) -> Option<Vec<u8>> {
        let tail = self.tail();
        let head = self.head();
        if tail == head {
            return None;
        }
        let slot_size = self.slot_size() as usize;
        let slot_off = tail as usize * slot_size;
        let slot = unsafe { std::slice::from_raw_parts(self.slots_ptr().add(slot_off), slot_size) };
        let header = Header::decode(&slot[..HEADER_SIZE]);
        let len = header.length as usize;
        Some(slot[..HEADER_SIZE + len].to_vec())
    }

    /// `send_bytes(bytes)` — a length-prefixed opaque write, for callers
    /// whose slot payload isn't itself a DTU message (the inter-node
    /// bridge's outbound ring tags each frame with a destination tile
    /// before the NIC/UDP layer strips it back off).
    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let slot_size = self.slot_size();
        if bytes.len() + 2 > slot_size as usize {
            return Err(Error::with_msg(Code::E2Big, format!("{} bytes do not fit in a {}-byte slot", bytes.len(), slot_size)));
        }

        let mask = self.ctrl().slot_mask;
        let head = self.head();
        let next_head = (head + 1) & mask;
        if next_head == self.tail() {
            return Err(Error::new(Code::Full));
        }

        let slot_size = slot_size as usize;
        let slot_off = head as usize * slot_size;
        let slot = unsafe {
            std::slice::from_raw_parts_mut(self.slots_mut_ptr().add(slot_off), slot_size)
        };
        slot[..2].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
        slot[2..2 + bytes.len()].copy_from_slice(bytes);

        self.ctrl().head.store(next_head, Ordering::Release);
        Ok(())
    }

    /// `fetch_bytes()` — counterpart to [`Ring::send_bytes`]; does not
    /// advance `tail`.
    pub fn fetch_bytes(&self) -> Option<Vec<u8>> {
        let tail = self.tail();
        let head = self.head();
        if tail == head {
            return None;
        }
        let slot_size = self.slot_size() as usize;
        let slot_off = tail as usize * slot_size;
        let slot = unsafe { std::slice::from_raw_parts(self.slots_ptr().add(slot_off), slot_size) };
        let len = u16::from_le_bytes([slot[0], slot[1]]) as usize;
        Some(slot[2..2 + len].to_vec())
    }

    /// `ack()` — advance `tail` past a successfully fetched message. A
    /// no-op on an empty ring.
    pub fn ack(&mut self) {
        let mask = self.ctrl().slot_mask;
        let head = self.head();
        let tail = self.tail();
        if tail == head {
            return;
        }
        self.ctrl().tail.store((tail + 1) & mask, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_slot_counts() {
        assert_eq!(Ring::init(1, 512).unwrap_err().code(), Code::InvalidArgs);
        assert_eq!(Ring::init(3, 512).unwrap_err().code(), Code::InvalidArgs);
    }

    #[test]
    fn rejects_undersized_or_non_power_of_two_slot_sizes() {
        assert_eq!(Ring::init(4, 8).unwrap_err().code(), Code::InvalidArgs);
        assert_eq!(Ring::init(4, 300).unwrap_err().code(), Code::InvalidArgs);
    }

    #[test]
    fn total_size_matches_formula() {
        assert_eq!(Ring::total_size(4, 512), 64 + 4 * 512);
    }

    #[test]
    fn ring_smoke_scenario() {
        // spec §8 end-to-end scenario 1
        let mut ring = Ring::init(4, 512).unwrap();
        ring.send(
            0,
            0,
            0,
            1,
            0xDEAD_BEEF,
            0xCAFE,
            HeaderFlags::empty(),
            b"HELLO_VPE",
        )
        .unwrap();

        let msg = ring.fetch().expect("message available");
        assert_eq!(msg.label(), 0xDEAD_BEEF);
        assert_eq!(msg.header.length, 9);
        assert_eq!(msg.data, b"HELLO_VPE");

        ring.ack();
        assert!(ring.is_empty());
    }

    #[test]
    fn becomes_full_after_slot_count_minus_one_sends() {
        let mut ring = Ring::init(4, 512).unwrap();
        for i in 0..3 {
            ring.send(0, 0, 0, 0, i, 0, HeaderFlags::empty(), &[]).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(
            ring.send(0, 0, 0, 0, 99, 0, HeaderFlags::empty(), &[])
                .unwrap_err()
                .code(),
            Code::Full
        );
    }

    #[test]
    fn payload_too_large_for_slot_is_e2big() {
        let mut ring = Ring::init(4, 32).unwrap();
        let payload = vec![0u8; 32]; // 25 + 32 > 32
        assert_eq!(
            ring.send(0, 0, 0, 0, 0, 0, HeaderFlags::empty(), &payload)
                .unwrap_err()
                .code(),
            Code::E2Big
        );
    }

    #[test]
    fn available_plus_free_equals_slot_count_minus_one() {
        let mut ring = Ring::init(8, 512).unwrap();
        let mut acked = 0u32;
        for round in 0..20 {
            if ring.is_full() {
                ring.fetch().unwrap();
                ring.ack();
                acked += 1;
            }
            else {
                ring.send(0, 0, 0, 0, round, 0, HeaderFlags::empty(), &[]).unwrap();
            }
            let free = ring.slot_count() - 1 - ring.available();
            assert_eq!(ring.available() + free, ring.slot_count() - 1);
        }
        let _ = acked;
    }

    #[test]
    fn wrap_around_scenario() {
        // spec §8 end-to-end scenario 6
        let _ = env_logger::try_init();
        let mut ring = Ring::init(4, 512).unwrap();

        ring.send(0, 0, 0, 0, 1, 0, HeaderFlags::empty(), &[]).unwrap();
        ring.send(0, 0, 0, 0, 2, 0, HeaderFlags::empty(), &[]).unwrap();
        ring.fetch().unwrap();
        ring.ack();
        ring.fetch().unwrap();
        ring.ack();
        assert!(ring.is_empty());

        ring.send(0, 0, 0, 0, 3, 0, HeaderFlags::empty(), &[]).unwrap();
        ring.send(0, 0, 0, 0, 4, 0, HeaderFlags::empty(), &[]).unwrap();
        ring.send(0, 0, 0, 0, 5, 0, HeaderFlags::empty(), &[]).unwrap();
        assert!(ring.is_full());
        ring.fetch().unwrap();
        ring.ack();
        ring.fetch().unwrap();
        ring.ack();
        ring.fetch().unwrap();
        ring.ack();
        assert!(ring.is_empty());
    }

    #[test]
    fn round_trip_wraps_head_and_tail_past_slot_count() {
        let mut ring = Ring::init(4, 512).unwrap();
        for i in 0..20u64 {
            ring.send(0, 0, 0, 0, i, 0, HeaderFlags::empty(), &[]).unwrap();
            ring.fetch().unwrap();
            ring.ack();
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn fetch_does_not_advance_tail() {
        let mut ring = Ring::init(4, 512).unwrap();
        ring.send(0, 0, 0, 0, 1, 0, HeaderFlags::empty(), &[]).unwrap();
        let _ = ring.fetch().unwrap();
        let _ = ring.fetch().unwrap();
        assert_eq!(ring.available(), 1);
    }

    #[test]
    fn ack_on_empty_ring_is_a_no_op() {
        let mut ring = Ring::init(4, 512).unwrap();
        ring.ack();
        assert!(ring.is_empty());
    }

    #[test]
    fn send_framed_then_fetch_framed_roundtrips_the_exact_bytes() {
        let mut src = Ring::init(4, 512).unwrap();
        src.send(3, 1, 0, 0, 0xA, 0, HeaderFlags::empty(), b"payload").unwrap();
        let frame = src.fetch_framed().expect("framed bytes available");
        assert_eq!(frame.len(), HEADER_SIZE + b"payload".len());

        let mut dst = Ring::init(4, 512).unwrap();
        dst.send_framed(&frame).unwrap();
        let msg = dst.fetch().expect("message available");
        assert_eq!(msg.header.sender_tile, 3);
        assert_eq!(msg.data, b"payload");
    }

    #[test]
    fn send_framed_rejects_a_buffer_shorter_than_the_header() {
        let mut ring = Ring::init(4, 512).unwrap();
        assert_eq!(ring.send_framed(&[0u8; 4]).unwrap_err().code(), Code::InvalidArgs);
    }

    #[test]
    fn send_bytes_then_fetch_bytes_roundtrips_an_opaque_payload() {
        let mut ring = Ring::init(4, 512).unwrap();
        ring.send_bytes(b"tagged-frame").unwrap();
        assert_eq!(ring.fetch_bytes().unwrap(), b"tagged-frame");
        ring.ack();
        assert!(ring.fetch_bytes().is_none());
    }
}
