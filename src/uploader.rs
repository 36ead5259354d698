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

use std::marker::PhantomData;
use crate::packet::{build_data_packet, build_metadata_packet, data_packet_count, Packet, PacketError};
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// Error Types
// ============================================================================

/// Outcome of one bounded wait for the acknowledgment byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Acked,
    WrongByte(u8),
    TimedOut,
}

impl std::fmt::Display for AckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckStatus::Acked => write!(f, "acknowledged"),
            AckStatus::WrongByte(b) => write!(f, "wrong byte 0x{:02X}", b),
            AckStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

#[derive(Debug)]
pub enum UploaderError {
    Io(std::io::Error),
    Packet(PacketError),
    ShortWrite { expected: usize, written: usize },
    NoAck { sequence: usize, status: AckStatus },
    ImageTooLarge(usize),
    TransferComplete,
}

impl std::fmt::Display for UploaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploaderError::Io(e) => write!(f, "I/O error: {}", e),
            UploaderError::Packet(e) => write!(f, "packet error: {}", e),
            UploaderError::ShortWrite { expected, written } => {
                write!(f, "short write: port accepted {} of {} bytes", written, expected)
            }
            UploaderError::NoAck { sequence, status } => {
                write!(f, "no acknowledgment for packet #{} ({})", sequence, status)
            }
            UploaderError::ImageTooLarge(len) => {
                write!(
                    f,
                    "image is {} bytes; at most {} data packets ({} bytes) fit the one-byte sequence field",
                    len,
                    MAX_DATA_PACKETS,
                    MAX_DATA_PACKETS * PAYLOAD_LEN
                )
            }
            UploaderError::TransferComplete => write!(f, "Transfer complete"),
        }
    }
}

impl std::error::Error for UploaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UploaderError::Io(e) => Some(e),
            UploaderError::Packet(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for UploaderError {
    fn from(err: std::io::Error) -> Self {
        UploaderError::Io(err)
    }
}

impl From<PacketError> for UploaderError {
    fn from(err: PacketError) -> Self {
        UploaderError::Packet(err)
    }
}

// ============================================================================
// States
// ============================================================================

pub struct TransmitPacket;
pub struct AwaitAck;
pub struct PrepareChunk;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct UploaderFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    image: Vec<u8>,
    total_packets: usize,
    // 0 = metadata packet, 1..=total_packets = data packets
    sequence: usize,
    // Packet currently in flight; retransmissions resend these exact bytes
    packet: Packet,
    // Writes performed for the current packet
    attempts: u8,
    debug: bool,
}

// ============================================================================
// Trait
// ============================================================================

pub trait UploaderState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn UploaderState>, UploaderError>;
}

// ============================================================================
// Helpers
// ============================================================================

impl<S> UploaderFsm<S> {
    fn transition<T>(self) -> Box<UploaderFsm<T>> {
        Box::new(UploaderFsm {
            state: PhantomData,
            serial: self.serial,
            image: self.image,
            total_packets: self.total_packets,
            sequence: self.sequence,
            packet: self.packet,
            attempts: self.attempts,
            debug: self.debug,
        })
    }

    fn io_error(&self, e: std::io::Error) -> UploaderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        UploaderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    /// One bounded wait for the acknowledgment byte. Always a fresh read;
    /// the acknowledgment for one packet is never carried over to the next.
    fn read_ack(&mut self) -> Result<AckStatus, UploaderError> {
        let mut buf = [0u8; 1];
        match self.serial.read_timeout(&mut buf, ACK_TIMEOUT) {
            Ok(0) => Ok(AckStatus::TimedOut),
            Ok(_) if buf[0] == ACK => Ok(AckStatus::Acked),
            Ok(_) => Ok(AckStatus::WrongByte(buf[0])),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(AckStatus::TimedOut),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl UploaderState for UploaderFsm<TransmitPacket> {
    fn step(self: Box<Self>) -> Result<Box<dyn UploaderState>, UploaderError> {
        let mut fsm = *self;

        if fsm.attempts == 0 {
            println!("send #{} packet", fsm.sequence);
        } else {
            println!(
                "resend #{} packet (attempt {} of {})",
                fsm.sequence,
                fsm.attempts + 1,
                MAX_ATTEMPTS
            );
        }

        let written = match fsm.serial.write(fsm.packet.as_bytes()) {
            Ok(n) => n,
            Err(e) => return Err(fsm.io_error(e)),
        };
        if written != PACKET_LEN {
            return Err(UploaderError::ShortWrite { expected: PACKET_LEN, written });
        }
        if fsm.debug {
            println!(
                "Wrote {} bytes for packet #{} (CRC 0x{:04X})",
                written,
                fsm.packet.sequence(),
                fsm.packet.checksum()
            );
        }

        fsm.attempts += 1;
        let next = fsm.transition::<AwaitAck>();
        Ok(next as Box<dyn UploaderState>)
    }
}

impl UploaderState for UploaderFsm<AwaitAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn UploaderState>, UploaderError> {
        let mut fsm = *self;

        match fsm.read_ack()? {
            AckStatus::Acked => {
                if fsm.debug { println!("Received: ACK for packet #{}", fsm.sequence); }
                if fsm.sequence == fsm.total_packets {
                    Err(UploaderError::TransferComplete)
                } else {
                    fsm.sequence += 1;
                    fsm.attempts = 0;
                    let next = fsm.transition::<PrepareChunk>();
                    Ok(next as Box<dyn UploaderState>)
                }
            }
            status if fsm.attempts < MAX_ATTEMPTS => {
                if fsm.debug { println!("Packet #{}: {}", fsm.sequence, status); }
                let next = fsm.transition::<TransmitPacket>();
                Ok(next as Box<dyn UploaderState>)
            }
            status => Err(UploaderError::NoAck { sequence: fsm.sequence, status }),
        }
    }
}

impl UploaderState for UploaderFsm<PrepareChunk> {
    fn step(self: Box<Self>) -> Result<Box<dyn UploaderState>, UploaderError> {
        let mut fsm = *self;

        let start = (fsm.sequence - 1) * PAYLOAD_LEN;
        let end = std::cmp::min(start + PAYLOAD_LEN, fsm.image.len());
        // The final chunk may be short or, when the image size is an exact
        // multiple of 128, empty; the encoder zero-pads either way.
        let chunk = &fsm.image[start..end];

        // Sequence fits the wire byte: sessions needing more than 255 data
        // packets are rejected at construction.
        fsm.packet = build_data_packet(fsm.sequence as u8, chunk)?;
        if fsm.debug {
            println!(
                "Prepared chunk #{} ({} of {} payload bytes)",
                fsm.sequence,
                chunk.len(),
                fsm.packet.payload().len()
            );
        }
        let next = fsm.transition::<TransmitPacket>();
        Ok(next as Box<dyn UploaderState>)
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl UploaderFsm<TransmitPacket> {
    /// Start a session: the FSM takes exclusive ownership of the serial
    /// port and drops it on every exit path. The first packet in flight
    /// is the metadata packet (sequence 0).
    pub fn new(
        serial: Box<dyn SerialPort>,
        name: &[u8],
        image: Vec<u8>,
        debug: bool,
    ) -> Result<Box<dyn UploaderState>, UploaderError> {
        let total_packets = data_packet_count(image.len());
        if total_packets > MAX_DATA_PACKETS {
            return Err(UploaderError::ImageTooLarge(image.len()));
        }

        let packet = build_metadata_packet(name, image.len() as u32)?;

        Ok(Box::new(UploaderFsm {
            state: PhantomData::<TransmitPacket>,
            serial,
            image,
            total_packets,
            sequence: 0,
            packet,
            attempts: 0,
            debug,
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;

    fn run_uploader(mut fsm: Box<dyn UploaderState>) -> Result<(), UploaderError> {
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(UploaderError::TransferComplete) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn expect_packets(packets: &[&Packet]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for packet in packets {
            bytes.extend_from_slice(packet.as_bytes());
        }
        bytes
    }

    #[test]
    fn test_uploader_full_transfer() {
        let image: Vec<u8> = (0..130u32).map(|i| (i % 256) as u8).collect();

        let meta = build_metadata_packet(b"fw.bin", 130).unwrap();
        let data1 = build_data_packet(1, &image[..128]).unwrap();
        let data2 = build_data_packet(2, &image[128..]).unwrap();

        // Three packets, three fresh acknowledgments. The mock's drop check
        // fails if any acknowledgment read is skipped or doubled up.
        let responses = vec![Some(ACK), Some(ACK), Some(ACK)];
        let expected_writes = expect_packets(&[&meta, &data1, &data2]);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = UploaderFsm::new(mock_serial, b"fw.bin", image, true).unwrap();

        run_uploader(fsm).expect("transfer should complete");
    }

    #[test]
    fn test_uploader_final_packet_padding() {
        let mut image: Vec<u8> = vec![0x11; 128];
        image.extend_from_slice(&[0xDE, 0xAD]);

        let data2 = build_data_packet(2, &[0xDE, 0xAD]).unwrap();
        assert_eq!(&data2.payload()[..2], &[0xDE, 0xAD]);
        assert!(data2.payload()[2..].iter().all(|&b| b == 0));

        let meta = build_metadata_packet(b"pad.bin", 130).unwrap();
        let data1 = build_data_packet(1, &image[..128]).unwrap();

        let responses = vec![Some(ACK), Some(ACK), Some(ACK)];
        let expected_writes = expect_packets(&[&meta, &data1, &data2]);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = UploaderFsm::new(mock_serial, b"pad.bin", image, false).unwrap();

        run_uploader(fsm).expect("transfer should complete");
    }

    #[test]
    fn test_uploader_empty_image() {
        // A zero-length image still produces one all-zero data packet
        let meta = build_metadata_packet(b"empty.bin", 0).unwrap();
        let data1 = build_data_packet(1, &[]).unwrap();
        assert!(data1.payload().iter().all(|&b| b == 0));

        let responses = vec![Some(ACK), Some(ACK)];
        let expected_writes = expect_packets(&[&meta, &data1]);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = UploaderFsm::new(mock_serial, b"empty.bin", Vec::new(), false).unwrap();

        run_uploader(fsm).expect("transfer should complete");
    }

    #[test]
    fn test_uploader_exact_multiple_boundary() {
        // 128-byte image: full packet 1 plus the trailing all-zero packet 2
        let image = vec![0xA5; 128];

        let meta = build_metadata_packet(b"exact.bin", 128).unwrap();
        let data1 = build_data_packet(1, &image).unwrap();
        let data2 = build_data_packet(2, &[]).unwrap();

        let responses = vec![Some(ACK), Some(ACK), Some(ACK)];
        let expected_writes = expect_packets(&[&meta, &data1, &data2]);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = UploaderFsm::new(mock_serial, b"exact.bin", image, false).unwrap();

        run_uploader(fsm).expect("transfer should complete");
    }

    #[test]
    fn test_uploader_abort_after_missing_ack() {
        let image: Vec<u8> = (0..130u32).map(|i| (i % 256) as u8).collect();

        let meta = build_metadata_packet(b"fw.bin", 130).unwrap();
        let data1 = build_data_packet(1, &image[..128]).unwrap();
        let data2 = build_data_packet(2, &image[128..]).unwrap();

        // Packet 2 is never acknowledged: three identical attempts, then abort
        let responses = vec![Some(ACK), Some(ACK)];
        let expected_writes = expect_packets(&[&meta, &data1, &data2, &data2, &data2]);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = UploaderFsm::new(mock_serial, b"fw.bin", image, true).unwrap();

        match run_uploader(fsm) {
            Err(UploaderError::NoAck { sequence: 2, status: AckStatus::TimedOut }) => {}
            other => panic!("expected NoAck for packet 2, got {:?}", other),
        }
    }

    #[test]
    fn test_uploader_retry_then_success() {
        let image = b"0123456789".to_vec();

        let meta = build_metadata_packet(b"small.bin", 10).unwrap();
        let data1 = build_data_packet(1, &image).unwrap();

        // First acknowledgment wait for packet 1 times out; the retransmission
        // must carry byte-identical content
        let responses = vec![Some(ACK), None, Some(ACK)];
        let expected_writes = expect_packets(&[&meta, &data1, &data1]);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = UploaderFsm::new(mock_serial, b"small.bin", image, true).unwrap();

        run_uploader(fsm).expect("transfer should complete after retry");
    }

    #[test]
    fn test_uploader_wrong_ack_byte_aborts() {
        let meta = build_metadata_packet(b"fw.bin", 4).unwrap();

        // NAK-like byte on every attempt for the metadata packet
        let responses = vec![Some(0x15), Some(0x15), Some(0x15)];
        let expected_writes = expect_packets(&[&meta, &meta, &meta]);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = UploaderFsm::new(mock_serial, b"fw.bin", vec![1, 2, 3, 4], false).unwrap();

        match run_uploader(fsm) {
            Err(UploaderError::NoAck { sequence: 0, status: AckStatus::WrongByte(0x15) }) => {}
            other => panic!("expected NoAck for packet 0, got {:?}", other),
        }
    }

    #[test]
    fn test_uploader_rejects_oversized_image() {
        let image = vec![0u8; MAX_DATA_PACKETS * PAYLOAD_LEN];

        let mock_serial = Box::new(MockSerialPort::new(Vec::new(), Vec::new()));
        match UploaderFsm::new(mock_serial, b"big.bin", image, false) {
            Err(UploaderError::ImageTooLarge(_)) => {}
            other => panic!("expected ImageTooLarge, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_uploader_rejects_long_name() {
        let name = [b'n'; 61];

        let mock_serial = Box::new(MockSerialPort::new(Vec::new(), Vec::new()));
        match UploaderFsm::new(mock_serial, &name, vec![0u8; 8], false) {
            Err(UploaderError::Packet(PacketError::NameTooLong(61))) => {}
            other => panic!("expected NameTooLong, got {:?}", other.map(|_| ())),
        }
    }
}
