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

//! Pinned external interfaces (spec §1, §4.5): the NIC driver and the
//! UDP/IP stack are out-of-scope collaborators. `InterNodeBridge` only
//! requires their *effects* — pushing a frame onto the wire, and handing
//! back a datagram body once one arrives — so we define the traits they
//! must satisfy rather than the drivers themselves. `original_source`'s
//! `DTUBridge.c` wires an e1000 PCI driver to lwIP to provide exactly this
//! pair of seams (`e1000_tx`/`e1000_poll_rx_lwip` underneath
//! `udp_sendto`/`dtu_udp_recv_cb`).

use std::net::Ipv4Addr;

use vdtu_core::error::Result;

/// The NIC transmit side a `DatagramTransport` implementation sits on top
/// of. Not used directly by [`crate::bridge::InterNodeBridge`] — it is the
/// seam the real UDP/IP stack would plug into underneath `send`.
pub trait FrameTx {
    fn tx(&mut self, frame: &[u8]) -> Result<()>;
}

/// The NIC receive side: a polled queue of raw frames, drained by the
/// UDP/IP stack before it dispatches datagrams up to
/// [`DatagramTransport::recv`]'s caller.
pub trait FrameRx {
    fn poll_frame(&mut self) -> Option<Vec<u8>>;
}

/// The UDP/IP stack seam `InterNodeBridge` actually drives: send one
/// datagram to `(dest, port)`, and hand back `(src, port, bytes)` for
/// datagrams it has received since the last poll.
pub trait DatagramTransport {
    fn send(&mut self, dest: Ipv4Addr, port: u16, bytes: &[u8]) -> Result<()>;

    /// Drains all datagrams received since the last call. The bridge polls
    /// this once per iteration rather than the stack invoking a callback
    /// directly, so that `InterNodeBridge` stays on the single cooperative
    /// executor of spec §5.
    fn poll_recv(&mut self) -> Vec<(Ipv4Addr, u16, Vec<u8>)>;
}
