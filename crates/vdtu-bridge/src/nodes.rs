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

//! Static node-id -> IPv4 table (spec §4.5, §6 "Wire: inter-node
//! datagram"): addresses are drawn from a build-time table, not discovered.
//! `original_source`'s `DTUBridge.c` hardcodes this as a `NODE_ID`
//! compile-time `#define` selecting between two `MY_IP_ADDR` literals; here
//! it is runtime configuration (see `vdtu-kernel`'s `KernelConfig`) so one
//! binary can emulate any node.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use vdtu_core::endpoint::TileId;

pub type NodeId = u16;

/// Maps a tile id to the node that owns it, and a node id to its UDP
/// endpoint. `tiles_per_node` is the single divisor spec §4.5 describes:
/// `node_id = tile_id / tiles_per_node`.
pub struct NodeTable {
    tiles_per_node: TileId,
    addrs: HashMap<NodeId, (Ipv4Addr, u16)>,
}

impl NodeTable {
    pub fn new(tiles_per_node: TileId) -> Self {
        NodeTable {
            tiles_per_node: tiles_per_node.max(1),
            addrs: HashMap::new(),
        }
    }

    pub fn set_addr(&mut self, node: NodeId, addr: Ipv4Addr, port: u16) {
        self.addrs.insert(node, (addr, port));
    }

    pub fn node_of(&self, tile: TileId) -> NodeId {
        tile / self.tiles_per_node
    }

    pub fn addr_of(&self, node: NodeId) -> Option<(Ipv4Addr, u16)> {
        self.addrs.get(&node).copied()
    }

    pub fn addr_for_tile(&self, tile: TileId) -> Option<(Ipv4Addr, u16)> {
        self.addr_of(self.node_of(tile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_of_divides_by_tiles_per_node() {
        let nodes = NodeTable::new(8);
        assert_eq!(nodes.node_of(0), 0);
        assert_eq!(nodes.node_of(7), 0);
        assert_eq!(nodes.node_of(8), 1);
        assert_eq!(nodes.node_of(23), 2);
    }

    #[test]
    fn addr_for_tile_resolves_through_node_of() {
        let mut nodes = NodeTable::new(4);
        nodes.set_addr(1, Ipv4Addr::new(10, 0, 0, 2), 7654);
        assert_eq!(
            nodes.addr_for_tile(5),
            Some((Ipv4Addr::new(10, 0, 0, 2), 7654))
        );
        assert_eq!(nodes.addr_for_tile(9), None);
    }
}
