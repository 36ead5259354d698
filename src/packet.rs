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

use crate::checksum::crc16;
use crate::protocol::*;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
pub enum PacketError {
    NameTooLong(usize),
    ChunkTooLarge(usize),
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketError::NameTooLong(len) => {
                write!(f, "file name is {} bytes, limit is {}", len, NAME_LEN)
            }
            PacketError::ChunkTooLarge(len) => {
                write!(f, "chunk is {} bytes, limit is {}", len, PAYLOAD_LEN)
            }
        }
    }
}

impl std::error::Error for PacketError {}

// ============================================================================
// Packet
// ============================================================================

/// One 131-byte wire frame: sequence byte, 128-byte payload, CRC-16
/// little-endian over the first 129 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet([u8; PACKET_LEN]);

impl Packet {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn sequence(&self) -> u8 {
        self.0[0]
    }

    pub fn payload(&self) -> &[u8] {
        &self.0[1..1 + PAYLOAD_LEN]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_le_bytes([self.0[1 + PAYLOAD_LEN], self.0[2 + PAYLOAD_LEN]])
    }

    /// Seal a frame whose sequence and payload are already in place.
    /// The CRC never covers its own two bytes.
    fn seal(mut raw: [u8; PACKET_LEN]) -> Packet {
        let crc = crc16(&raw[..1 + PAYLOAD_LEN]);
        raw[1 + PAYLOAD_LEN..].copy_from_slice(&crc.to_le_bytes());
        Packet(raw)
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Build the sequence-0 packet carrying the file name (zero-padded to 60
/// bytes) and the total image size (big-endian u32 at payload offset 60).
/// Names longer than 60 bytes are rejected rather than truncated.
pub fn build_metadata_packet(name: &[u8], size: u32) -> Result<Packet, PacketError> {
    if name.len() > NAME_LEN {
        return Err(PacketError::NameTooLong(name.len()));
    }

    let mut raw = [0u8; PACKET_LEN];
    raw[1..1 + name.len()].copy_from_slice(name);
    raw[1 + SIZE_OFFSET..1 + SIZE_OFFSET + 4].copy_from_slice(&size.to_be_bytes());
    Ok(Packet::seal(raw))
}

/// Build a data packet for the given 1-based sequence number. A short
/// chunk is zero-padded to 128 bytes; an empty chunk is valid and yields
/// the all-zero trailing packet sent when the image size is an exact
/// multiple of 128.
pub fn build_data_packet(sequence: u8, chunk: &[u8]) -> Result<Packet, PacketError> {
    if chunk.len() > PAYLOAD_LEN {
        return Err(PacketError::ChunkTooLarge(chunk.len()));
    }

    let mut raw = [0u8; PACKET_LEN];
    raw[0] = sequence;
    raw[1..1 + chunk.len()].copy_from_slice(chunk);
    Ok(Packet::seal(raw))
}

/// Number of data packets for an image of `len` bytes. The receiver
/// expects `len / 128 + 1` packets, so an image whose size is an exact
/// multiple of 128 (including an empty one) still gets a trailing
/// all-zero packet.
pub fn data_packet_count(len: usize) -> usize {
    len / PAYLOAD_LEN + 1
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_packet_layout() {
        let packet = build_metadata_packet(b"fw.bin", 300).unwrap();

        assert_eq!(packet.as_bytes().len(), PACKET_LEN);
        assert_eq!(packet.sequence(), 0);
        assert_eq!(&packet.payload()[0..6], b"fw.bin");
        assert!(packet.payload()[6..NAME_LEN].iter().all(|&b| b == 0));
        assert_eq!(&packet.payload()[60..64], &[0x00, 0x00, 0x01, 0x2C]);
        assert!(packet.payload()[64..].iter().all(|&b| b == 0));
        assert_eq!(packet.checksum(), 0x4417);
    }

    #[test]
    fn test_metadata_packet_name_limits() {
        let name = [b'a'; 60];
        let packet = build_metadata_packet(&name, 1).unwrap();
        assert_eq!(&packet.payload()[..60], &name);

        let long_name = [b'a'; 61];
        assert_eq!(
            build_metadata_packet(&long_name, 1),
            Err(PacketError::NameTooLong(61))
        );
    }

    #[test]
    fn test_data_packet_padding() {
        let packet = build_data_packet(2, &[0xAA, 0xBB]).unwrap();

        assert_eq!(packet.sequence(), 2);
        assert_eq!(&packet.payload()[..2], &[0xAA, 0xBB]);
        assert!(packet.payload()[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_data_packet_full_and_empty() {
        let chunk = [0x5A; 128];
        let packet = build_data_packet(1, &chunk).unwrap();
        assert_eq!(packet.payload(), &chunk);

        let empty = build_data_packet(3, &[]).unwrap();
        assert!(empty.payload().iter().all(|&b| b == 0));

        let oversized = [0u8; 129];
        assert_eq!(
            build_data_packet(1, &oversized),
            Err(PacketError::ChunkTooLarge(129))
        );
    }

    #[test]
    fn test_checksum_covers_sequence_and_payload_only() {
        let packet = build_data_packet(7, b"payload").unwrap();
        let recomputed = crate::checksum::crc16(&packet.as_bytes()[..129]);
        assert_eq!(recomputed, packet.checksum());

        // Same payload under a different sequence must checksum differently
        let other = build_data_packet(8, b"payload").unwrap();
        assert_ne!(other.checksum(), packet.checksum());
    }

    #[test]
    fn test_corruption_detected() {
        let packet = build_data_packet(1, b"firmware bytes").unwrap();

        for idx in 0..129 {
            let mut corrupted = packet.as_bytes().to_vec();
            corrupted[idx] ^= 0x01;
            assert_ne!(
                crate::checksum::crc16(&corrupted[..129]),
                packet.checksum(),
                "corruption at byte {} went undetected",
                idx
            );
        }
    }

    #[test]
    fn test_data_packet_count() {
        assert_eq!(data_packet_count(0), 1);
        assert_eq!(data_packet_count(1), 1);
        assert_eq!(data_packet_count(127), 1);
        assert_eq!(data_packet_count(128), 2);
        assert_eq!(data_packet_count(129), 2);
        assert_eq!(data_packet_count(130), 2);
        assert_eq!(data_packet_count(256), 3);
    }
}
