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

//! InterNodeBridge (spec §4.5): tunnels DTU messages between kernels on
//! different hosts over a best-effort datagram transport, via an
//! outbound/inbound SPSC ring pair shared with the local kernel.

pub mod bridge;
pub mod nodes;
pub mod transport;

pub use bridge::InterNodeBridge;
pub use nodes::NodeTable;
pub use transport::{DatagramTransport, FrameRx, FrameTx};
