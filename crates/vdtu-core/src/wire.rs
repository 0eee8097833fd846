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

//! The DTU message header: a wire-exact, 25-byte, little-endian, packed
//! struct (spec §3). Every ring slot begins with one of these, filled in by
//! the producer at `send` time (simulating the DTU hardware's header
//! auto-fill).
//!
//! Byte offsets are pinned by the tests below; do not reorder fields.

use bitflags::bitflags;

pub const HEADER_SIZE: usize = 25;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        const REPLY = 1 << 0;
        const GRANT_CREDITS = 1 << 1;
    }
}

/// Wire-exact DTU message header (spec §3 table).
///
/// | Offset | Size | Field        |
/// |--------|------|--------------|
/// | 0      | 1    | flags        |
/// | 1      | 2    | sender_tile  |
/// | 3      | 1    | sender_ep    |
/// | 4      | 1    | reply_ep     |
/// | 5      | 2    | length       |
/// | 7      | 2    | sender_vpe   |
/// | 9      | 8    | label        |
/// | 17     | 8    | reply_label  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub flags: HeaderFlags,
    pub sender_tile: u16,
    pub sender_ep: u8,
    pub reply_ep: u8,
    pub length: u16,
    pub sender_vpe: u16,
    pub label: u64,
    pub reply_label: u64,
}

impl Default for HeaderFlags {
    fn default() -> Self {
        HeaderFlags::empty()
    }
}

impl Header {
    pub fn is_reply(&self) -> bool {
        self.flags.contains(HeaderFlags::REPLY)
    }

    /// Encode into exactly `HEADER_SIZE` little-endian bytes.
    pub fn encode(&self, out: &mut [u8]) {
        assert!(out.len() >= HEADER_SIZE);
        out[0] = self.flags.bits();
        out[1..3].copy_from_slice(&self.sender_tile.to_le_bytes());
        out[3] = self.sender_ep;
        out[4] = self.reply_ep;
        out[5..7].copy_from_slice(&self.length.to_le_bytes());
        out[7..9].copy_from_slice(&self.sender_vpe.to_le_bytes());
        out[9..17].copy_from_slice(&self.label.to_le_bytes());
        out[17..25].copy_from_slice(&self.reply_label.to_le_bytes());
    }

    /// Decode from the first `HEADER_SIZE` bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Self {
        assert!(buf.len() >= HEADER_SIZE);
        Header {
            flags: HeaderFlags::from_bits_truncate(buf[0]),
            sender_tile: u16::from_le_bytes([buf[1], buf[2]]),
            sender_ep: buf[3],
            reply_ep: buf[4],
            length: u16::from_le_bytes([buf[5], buf[6]]),
            sender_vpe: u16::from_le_bytes([buf[7], buf[8]]),
            label: u64::from_le_bytes(buf[9..17].try_into().unwrap()),
            reply_label: u64::from_le_bytes(buf[17..25].try_into().unwrap()),
        }
    }
}

/// A message as observed by a consumer: the decoded header plus a view of
/// the payload bytes that follow it in the ring slot.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub header: Header,
    pub data: &'a [u8],
}

impl<'a> Message<'a> {
    pub fn label(&self) -> u64 {
        self.header.label
    }

    pub fn reply_label(&self) -> u64 {
        self.header.reply_label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_exactly_25_bytes_on_the_wire() {
        let h = Header {
            flags: HeaderFlags::REPLY,
            sender_tile: 0x0102,
            sender_ep: 3,
            reply_ep: 4,
            length: 0x0506,
            sender_vpe: 0x0708,
            label: 0x0910_1112_1314_1516,
            reply_label: 0x1718_1920_2122_2324,
        };
        let mut buf = [0u8; HEADER_SIZE];
        h.encode(&mut buf);
        assert_eq!(buf[0], 0b01);
        assert_eq!(&buf[1..3], &[0x02, 0x01]);
        assert_eq!(buf[3], 3);
        assert_eq!(buf[4], 4);
        assert_eq!(&buf[5..7], &[0x06, 0x05]);
        assert_eq!(&buf[7..9], &[0x08, 0x07]);
        assert_eq!(u64::from_le_bytes(buf[9..17].try_into().unwrap()), h.label);
        assert_eq!(
            u64::from_le_bytes(buf[17..25].try_into().unwrap()),
            h.reply_label
        );

        let back = Header::decode(&buf);
        assert_eq!(back, h);
    }

    #[test]
    fn offsets_match_spec_table() {
        // a second, cheap regression check pinning the offsets directly
        let h = Header {
            flags: HeaderFlags::empty(),
            sender_tile: 7,
            sender_ep: 1,
            reply_ep: 2,
            length: 9,
            sender_vpe: 5,
            label: 0xDEAD_BEEF,
            reply_label: 0xCAFE_BABE,
        };
        let mut buf = [0xFFu8; HEADER_SIZE];
        h.encode(&mut buf);
        assert_eq!(u16::from_le_bytes([buf[1], buf[2]]), 7);
        assert_eq!(buf[3], 1);
        assert_eq!(buf[4], 2);
        assert_eq!(u16::from_le_bytes([buf[5], buf[6]]), 9);
        assert_eq!(u16::from_le_bytes([buf[7], buf[8]]), 5);
    }
}
