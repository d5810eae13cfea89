//! Wire format encoding and decoding.
//!
//! Implements the 12-byte yamux header:
//! ```text
//! ┌─────────┬───────┬──────────┬───────────┬──────────┐
//! │ Version │ Tag   │ Flags    │ Stream ID │ Length   │
//! │ 1 byte  │ 1 byte│ 2 bytes  │ 4 bytes   │ 4 bytes  │
//! │ uint8   │ uint8 │ uint16 BE│ uint32 BE │ uint32 BE│
//! └─────────┴───────┴──────────┴───────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. `Length` is the body length for
//! Data frames; for the other tags it carries the credit (WindowUpdate),
//! the nonce (Ping) or the shutdown code (GoAway).

use crate::error::{MuxError, Result};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// The only protocol version understood.
pub const PROTOCOL_VERSION: u8 = 0;

/// Default per-stream credit ceiling (256 KiB).
pub const DEFAULT_CREDIT: u32 = 256 * 1024;

/// Default maximum payload of a single outgoing Data frame (16 KiB).
pub const DEFAULT_SPLIT_SEND_SIZE: usize = 16 * 1024;

/// Maximum number of locally opened streams awaiting the peer's ACK.
pub const MAX_ACK_BACKLOG: usize = 256;

/// Maximum Data body accepted per frame (1 MiB).
pub const MAX_FRAME_BODY_LENGTH: usize = 1024 * 1024;

/// Flag constants for the protocol.
pub mod flags {
    /// Opens a stream.
    pub const SYN: u16 = 0x0001;
    /// Acknowledges a stream opened by the peer.
    pub const ACK: u16 = 0x0002;
    /// Half-closes the sender's side of a stream.
    pub const FIN: u16 = 0x0004;
    /// Aborts a stream.
    pub const RST: u16 = 0x0008;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u16, flag: u16) -> bool {
        flags & flag != 0
    }
}

/// Frame type carried in the header's tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameTag {
    Data = 0,
    WindowUpdate = 1,
    Ping = 2,
    GoAway = 3,
}

impl FrameTag {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Data),
            1 => Some(Self::WindowUpdate),
            2 => Some(Self::Ping),
            3 => Some(Self::GoAway),
            _ => None,
        }
    }
}

/// Reason code carried by a GoAway frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GoAwayCode {
    Normal = 0,
    ProtocolError = 1,
    InternalError = 2,
}

impl GoAwayCode {
    /// Unknown codes are reported as internal errors.
    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => Self::Normal,
            1 => Self::ProtocolError,
            _ => Self::InternalError,
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version (always [`PROTOCOL_VERSION`]).
    pub version: u8,
    /// Frame type.
    pub tag: FrameTag,
    /// Flag bits (see `flags` module).
    pub flags: u16,
    /// Stream identifier (0 for connection-level Ping/GoAway).
    pub stream_id: u32,
    /// Body length, credit, nonce or GoAway code depending on `tag`.
    pub length: u32,
}

impl Header {
    /// Create a new header with the supported protocol version.
    pub fn new(tag: FrameTag, flags: u16, stream_id: u32, length: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            tag,
            flags,
            stream_id,
            length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use muxwire::protocol::{flags, FrameTag, Header};
    ///
    /// let header = Header::new(FrameTag::Data, flags::SYN, 1, 5);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 12);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.version;
        buf[1] = self.tag as u8;
        buf[2..4].copy_from_slice(&self.flags.to_be_bytes());
        buf[4..8].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[8..12].copy_from_slice(&self.length.to_be_bytes());
    }

    /// Decode and validate a header from bytes (Big Endian).
    ///
    /// Fails with `InvalidFormat` if the buffer is too short and with
    /// `Protocol` on an unsupported version or unknown tag.
    ///
    /// # Example
    ///
    /// ```
    /// use muxwire::protocol::{FrameTag, Header};
    ///
    /// let bytes = [0, 1, 0, 0x02, 0, 0, 0, 7, 0, 0, 0x10, 0];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.tag, FrameTag::WindowUpdate);
    /// assert_eq!(header.stream_id, 7);
    /// assert_eq!(header.length, 4096);
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(MuxError::InvalidFormat(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                buf.len()
            )));
        }

        let version = buf[0];
        if version != PROTOCOL_VERSION {
            return Err(MuxError::Protocol(format!(
                "Unsupported version: {}",
                version
            )));
        }

        let tag = FrameTag::from_u8(buf[1])
            .ok_or_else(|| MuxError::Protocol(format!("Unknown frame tag: {}", buf[1])))?;

        Ok(Self {
            version,
            tag,
            flags: u16::from_be_bytes([buf[2], buf[3]]),
            stream_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    #[inline]
    pub fn is_syn(&self) -> bool {
        flags::has_flag(self.flags, flags::SYN)
    }

    #[inline]
    pub fn is_ack(&self) -> bool {
        flags::has_flag(self.flags, flags::ACK)
    }

    #[inline]
    pub fn is_fin(&self) -> bool {
        flags::has_flag(self.flags, flags::FIN)
    }

    #[inline]
    pub fn is_rst(&self) -> bool {
        flags::has_flag(self.flags, flags::RST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let tags = [
            FrameTag::Data,
            FrameTag::WindowUpdate,
            FrameTag::Ping,
            FrameTag::GoAway,
        ];
        let boundaries = [0u32, 1, 2, 0xDEAD_BEEF, u32::MAX - 1, u32::MAX];
        let all_flags = flags::SYN | flags::ACK | flags::FIN | flags::RST;

        for tag in tags {
            for frame_flags in 0..=all_flags {
                for &stream_id in &boundaries {
                    for &length in &boundaries {
                        let original = Header::new(tag, frame_flags, stream_id, length);
                        let decoded = Header::decode(&original.encode()).unwrap();
                        assert_eq!(original, decoded);
                    }
                }
            }
        }
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = Header::new(
            FrameTag::Data,
            flags::SYN | flags::ACK,
            0x0102_0304,
            0x0A0B_0C0D,
        );
        let bytes = header.encode();

        assert_eq!(
            bytes,
            [0x00, 0x00, 0x00, 0x03, 0x01, 0x02, 0x03, 0x04, 0x0A, 0x0B, 0x0C, 0x0D]
        );
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 11];
        let result = Header::decode(&buf);
        assert!(matches!(result, Err(MuxError::InvalidFormat(_))));
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let mut bytes = Header::new(FrameTag::Ping, 0, 0, 1).encode();
        bytes[0] = 1;
        let err = Header::decode(&bytes).unwrap_err();
        assert!(matches!(err, MuxError::Protocol(_)));
        assert!(err.to_string().contains("Unsupported version"));
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let mut bytes = Header::new(FrameTag::Ping, 0, 0, 1).encode();
        bytes[1] = 4;
        let err = Header::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("Unknown frame tag: 4"));
    }

    #[test]
    fn test_flag_accessors() {
        let header = Header::new(FrameTag::WindowUpdate, flags::ACK | flags::RST, 3, 0);
        assert!(header.is_ack());
        assert!(header.is_rst());
        assert!(!header.is_syn());
        assert!(!header.is_fin());
    }

    #[test]
    fn test_flag_values() {
        assert_eq!(flags::SYN, 0x1);
        assert_eq!(flags::ACK, 0x2);
        assert_eq!(flags::FIN, 0x4);
        assert_eq!(flags::RST, 0x8);
    }

    #[test]
    fn test_go_away_code_from_u32() {
        assert_eq!(GoAwayCode::from_u32(0), GoAwayCode::Normal);
        assert_eq!(GoAwayCode::from_u32(1), GoAwayCode::ProtocolError);
        assert_eq!(GoAwayCode::from_u32(2), GoAwayCode::InternalError);
        assert_eq!(GoAwayCode::from_u32(77), GoAwayCode::InternalError);
    }

    #[test]
    fn test_constants() {
        assert_eq!(HEADER_SIZE, 12);
        assert_eq!(DEFAULT_CREDIT, 262_144);
        assert_eq!(DEFAULT_SPLIT_SEND_SIZE, 16_384);
        assert_eq!(MAX_FRAME_BODY_LENGTH, 1_048_576);
    }
}
