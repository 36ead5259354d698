// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! FWLINK protocol constants

use std::time::Duration;

/// Acknowledge - receiver confirms a packet passed its CRC check
pub const ACK: u8 = 0x06;

/// Total size of every packet on the wire: 1 sequence byte,
/// 128 payload bytes, 2 CRC bytes
pub const PACKET_LEN: usize = 131;

/// Payload bytes carried by each packet
pub const PAYLOAD_LEN: usize = 128;

/// Bytes reserved for the file name in the metadata packet payload
pub const NAME_LEN: usize = 60;

/// Offset of the big-endian file size within the metadata packet payload
pub const SIZE_OFFSET: usize = 60;

/// How long to wait for the single acknowledgment byte after each packet
pub const ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Attempts per packet (identical bytes) before the session aborts
pub const MAX_ATTEMPTS: u8 = 3;

/// The sequence field is one byte and 0 is reserved for the metadata
/// packet, so a session can carry at most 255 data packets
pub const MAX_DATA_PACKETS: usize = 255;
