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

//! `InterNodeBridge` (spec §4.5): drains the outbound ring and tunnels each
//! framed DTU message as one UDP datagram; deposits received datagrams into
//! the inbound ring for the kernel to pick up on its next poll.

use vdtu_core::endpoint::TileId;
use vdtu_core::error::{Code, Error, Result};
use vdtu_core::klog;
use vdtu_core::ring::Ring;
use vdtu_core::wire::HEADER_SIZE;

use crate::nodes::NodeTable;
use crate::transport::DatagramTransport;

/// Slot size accommodates the 25-byte header plus up to 1400 bytes of
/// payload (spec §4.5 "Structure").
pub const MAX_DATAGRAM_PAYLOAD: usize = 1400;
pub const BRIDGE_SLOT_SIZE: u32 = 2048; // next power of two >= 25 + 1400 + tile tag

/// The two SPSC rings shared with the local kernel, plus the node-id
/// routing table and a drop counter for inbound overflow (spec §4.5
/// "Failure semantics": "Ring overflow is reported by counter only; no
/// backpressure to the producer").
pub struct InterNodeBridge {
    outbound: Ring,
    inbound: Ring,
    nodes: NodeTable,
    port: u16,
    inbound_drops: u64,
    datagram_parse_errors: u64,
}

impl InterNodeBridge {
    pub fn new(slot_count: u32, nodes: NodeTable, port: u16) -> Result<Self> {
        Ok(InterNodeBridge {
            outbound: Ring::init(slot_count, BRIDGE_SLOT_SIZE)?,
            inbound: Ring::init(slot_count, BRIDGE_SLOT_SIZE)?,
            nodes,
            port,
            inbound_drops: 0,
            datagram_parse_errors: 0,
        })
    }

    /// The kernel's handle to the outbound ring: it writes framed messages
    /// here instead of delivering locally when `EndpointTable::send` (or
    /// `reply`) returns `SendOutcome::Remote`.
    pub fn outbound_ring_mut(&mut self) -> &mut Ring {
        &mut self.outbound
    }

    /// The kernel's handle to the inbound ring: it calls `fetch`/`ack` here
    /// on every poll iteration and routes delivered messages to the correct
    /// local endpoint using the header's `reply_ep`/`label`.
    pub fn inbound_ring_mut(&mut self) -> &mut Ring {
        &mut self.inbound
    }

    pub fn inbound_ring(&self) -> &Ring {
        &self.inbound
    }

    pub fn inbound_drops(&self) -> u64 {
        self.inbound_drops
    }

    pub fn datagram_parse_errors(&self) -> u64 {
        self.datagram_parse_errors
    }

    /// Pushes a framed DTU message (header + payload) bound for `dest_tile`
    /// onto the outbound ring, tagging it with the destination so
    /// [`Self::poll_outbound`] can resolve an address without re-decoding
    /// the header (the header carries only sender fields, spec §3).
    pub fn push_outbound(&mut self, dest_tile: TileId, frame: &[u8]) -> Result<()> {
        if frame.len() < HEADER_SIZE {
            return Err(Error::with_msg(Code::InvalidArgs, "frame shorter than the header"));
        }
        if frame.len() > MAX_DATAGRAM_PAYLOAD + HEADER_SIZE {
            return Err(Error::new(Code::E2Big));
        }
        let mut tagged = Vec::with_capacity(2 + frame.len());
        tagged.extend_from_slice(&dest_tile.to_le_bytes());
        tagged.extend_from_slice(frame);
        self.outbound.send_bytes(&tagged)
    }

    /// Outbound pipeline (spec §4.5): drain the outbound ring; for each
    /// message, map `dest_tile` to a node address and hand the framed
    /// bytes to the transport as one datagram body. Returns the number of
    /// messages sent.
    pub fn poll_outbound(&mut self, transport: &mut dyn DatagramTransport) -> usize {
        let mut sent = 0;
        while let Some(tagged) = self.outbound.fetch_bytes() {
            self.outbound.ack();
            if tagged.len() < 2 {
                continue;
            }
            let dest_tile = TileId::from_le_bytes([tagged[0], tagged[1]]);
            let frame = &tagged[2..];
            match self.nodes.addr_for_tile(dest_tile) {
                Some((ip, port)) => {
                    if transport.send(ip, port, frame).is_ok() {
                        sent += 1;
                    }
                },
                None => klog!(BRIDGE, "no node address for tile {}, dropping outbound frame", dest_tile),
            }
        }
        sent
    }

    /// Inbound pipeline (spec §4.5): drains everything the transport has
    /// received since the last poll and deposits each onto the inbound
    /// ring. Returns the number of messages accepted.
    pub fn poll_inbound(&mut self, transport: &mut dyn DatagramTransport) -> usize {
        let mut accepted = 0;
        for (_src_ip, _port, bytes) in transport.poll_recv() {
            if self.on_datagram(&bytes) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Validates and enqueues one received datagram body (spec §4.5
    /// "Inbound pipeline"): `length >= 25`, `length_field + 25 <=
    /// datagram_len`. Drops (counting) on a malformed datagram or a full
    /// ring. Returns whether the datagram was accepted.
    pub fn on_datagram(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() < HEADER_SIZE {
            klog!(BRIDGE, "datagram of {} bytes shorter than the header, dropping", bytes.len());
            self.datagram_parse_errors += 1;
            return false;
        }
        let length = u16::from_le_bytes([bytes[5], bytes[6]]) as usize;
        if HEADER_SIZE + length > bytes.len() {
            klog!(
                BRIDGE,
                "datagram claims {} payload bytes but is only {} bytes, dropping",
                length,
                bytes.len()
            );
            self.datagram_parse_errors += 1;
            return false;
        }
        match self.inbound.send_framed(&bytes[..HEADER_SIZE + length]) {
            Ok(()) => true,
            Err(_) => {
                klog!(BRIDGE, "inbound ring full, dropping datagram ({} drops so far)", self.inbound_drops + 1);
                self.inbound_drops += 1;
                false
            },
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
