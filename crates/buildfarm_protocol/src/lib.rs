//! Binary Protocol v1: the build farm control plane wire format.
//!
//! Coordinator <-> Worker communication only. Build artifacts and logs flow
//! separately through the cache; this crate frames control messages.
//!
//! # Protocol Specification
//!
//! Header Format: !BBHQI (16 bytes, Network Byte Order / Big Endian)
//! ```text
//! [VER:1][OP:1][RES:2][BUILD_ID:8][LEN:4]
//! ```
//!
//! - VER (u8): Protocol version (0x01)
//! - OP (u8): OpCode
//! - RES (u16): Reserved for future use
//! - BUILD_ID (u64): Build ID (Q = unsigned long long, 8 bytes)
//! - LEN (u32): Payload length in bytes (I = unsigned int, 4 bytes)

pub mod config;
pub mod defaults;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod naming;
pub mod paths;
pub mod types;

pub use buildfarm_ids::WorkerId;
pub use types::{
    BuildId, BuildIdError, BuildMetrics, BuildResult, BuildState, CancelCommand,
    DispatchCommand, ErrorPayload, HeartbeatPayload, RegisterPayload, UnregisterPayload,
    WorkerLifecycle, WorkerStatus,
};

pub use fingerprint::fingerprint_build;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use error::{ProtocolError, Result};
use std::io::Cursor;

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Build farm control-plane OpCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Unknown = 0,

    // Worker -> Coordinator (Handshake)
    Register = 1, // "I am here. My capabilities are [A, B, C]."

    // Coordinator -> Worker (Command)
    Dispatch = 2, // "Build this project/task. Here are the options."

    // Coordinator -> Worker (Abort)
    Cancel = 3, // "Cancel this build."

    // Worker -> Coordinator (Keep-alive)
    Heartbeat = 4, // "Still alive, working on build X."

    // Worker -> Coordinator (Completion)
    Complete = 5, // "Build finished. Here is the receipt."

    // Bidirectional (Error)
    Err = 6, // "Something went wrong."

    // Worker -> Coordinator (Graceful drain)
    Unregister = 7, // "Draining, stop dispatching to me."
}

impl OpCode {
    /// Convert u8 to OpCode
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(OpCode::Unknown),
            1 => Ok(OpCode::Register),
            2 => Ok(OpCode::Dispatch),
            3 => Ok(OpCode::Cancel),
            4 => Ok(OpCode::Heartbeat),
            5 => Ok(OpCode::Complete),
            6 => Ok(OpCode::Err),
            7 => Ok(OpCode::Unregister),
            _ => Err(ProtocolError::InvalidOpCode(value)),
        }
    }

    /// Convert OpCode to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Protocol header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub opcode: OpCode,
    pub reserved: u16,
    pub build_id: BuildId,
    pub payload_len: u32,
}

impl Header {
    /// Create a new header
    pub fn new(opcode: OpCode, build_id: BuildId, payload_len: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            opcode,
            reserved: 0,
            build_id,
            payload_len,
        }
    }

    /// Pack header into 16-byte buffer
    ///
    /// # Format
    /// Network Byte Order (Big Endian):
    /// - Version (u8): 1 byte
    /// - OpCode (u8): 1 byte
    /// - Reserved (u16): 2 bytes
    /// - Build ID (u64): 8 bytes
    /// - Payload Length (u32): 4 bytes
    ///
    /// Total: 16 bytes
    pub fn pack(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);

        cursor.write_u8(self.version)?;
        cursor.write_u8(self.opcode.as_u8())?;
        cursor.write_u16::<BigEndian>(self.reserved)?;
        cursor.write_u64::<BigEndian>(self.build_id.as_u64())?;
        cursor.write_u32::<BigEndian>(self.payload_len)?;

        Ok(buf)
    }

    /// Unpack header from 16-byte buffer
    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::HeaderTooShort {
                expected: HEADER_SIZE,
                got: data.len(),
            });
        }

        let mut cursor = Cursor::new(&data[..HEADER_SIZE]);

        let version = cursor.read_u8()?;
        let op_raw = cursor.read_u8()?;
        let reserved = cursor.read_u16::<BigEndian>()?;
        let build_id = BuildId::new(cursor.read_u64::<BigEndian>()?);
        let payload_len = cursor.read_u32::<BigEndian>()?;

        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let opcode = OpCode::from_u8(op_raw)?;

        Ok(Self {
            version,
            opcode,
            reserved,
            build_id,
            payload_len,
        })
    }
}

/// Protocol message (header + payload)
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub payload: Vec<u8>,
}

/// Maximum payload size (4GB - 1, the max value of u32)
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

impl Message {
    /// Create a new message
    ///
    /// Returns an error if payload exceeds MAX_PAYLOAD_SIZE (4GB).
    pub fn new(opcode: OpCode, build_id: BuildId, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let header = Header::new(opcode, build_id, payload.len() as u32);
        Ok(Self { header, payload })
    }

    /// Pack message into ZMQ frames (header, payload)
    pub fn pack(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let header_bytes = self.header.pack()?.to_vec();
        Ok((header_bytes, self.payload.clone()))
    }

    /// Unpack message from ZMQ frames
    pub fn unpack(frames: &[Vec<u8>]) -> Result<Self> {
        if frames.len() < 2 {
            return Err(ProtocolError::InvalidFrameCount {
                expected: 2,
                got: frames.len(),
            });
        }

        let header = Header::unpack(&frames[0])?;
        let payload = frames[1].clone();

        // Validate payload length
        if payload.len() != header.payload_len as usize {
            return Err(ProtocolError::PayloadLengthMismatch {
                expected: header.payload_len as usize,
                got: payload.len(),
            });
        }

        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_pack_unpack() {
        let header = Header::new(OpCode::Dispatch, BuildId::new(12345), 1024);
        let packed = header.pack().unwrap();

        assert_eq!(packed.len(), HEADER_SIZE);

        let unpacked = Header::unpack(&packed).unwrap();
        assert_eq!(unpacked.version, PROTOCOL_VERSION);
        assert_eq!(unpacked.opcode, OpCode::Dispatch);
        assert_eq!(unpacked.build_id, BuildId::new(12345));
        assert_eq!(unpacked.payload_len, 1024);
    }

    #[test]
    fn test_header_roundtrip() {
        for opcode in [
            OpCode::Register,
            OpCode::Dispatch,
            OpCode::Heartbeat,
            OpCode::Complete,
        ] {
            let header = Header::new(opcode, BuildId::new(9999), 512);
            let packed = header.pack().unwrap();
            let unpacked = Header::unpack(&packed).unwrap();
            assert_eq!(header, unpacked);
        }
    }

    #[test]
    fn test_version_mismatch() {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = 0xFF; // Invalid version

        let result = Header::unpack(&buf);
        assert!(matches!(result, Err(ProtocolError::VersionMismatch { .. })));
    }

    #[test]
    fn test_header_too_short() {
        let buf = [0u8; 8]; // Only 8 bytes
        let result = Header::unpack(&buf);
        assert!(matches!(result, Err(ProtocolError::HeaderTooShort { .. })));
    }

    #[test]
    fn test_message_pack_unpack() {
        let payload = b"hello build farm".to_vec();
        let msg = Message::new(OpCode::Register, BuildId::new(42), payload.clone()).unwrap();

        let (header_bytes, payload_bytes) = msg.pack().unwrap();
        let frames = vec![header_bytes, payload_bytes];

        let unpacked = Message::unpack(&frames).unwrap();
        assert_eq!(unpacked.header.opcode, OpCode::Register);
        assert_eq!(unpacked.header.build_id, BuildId::new(42));
        assert_eq!(unpacked.payload, payload);
    }
}
