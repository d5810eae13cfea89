//! Frame struct with typed constructors and accessors.
//!
//! Represents a complete protocol frame with header and body.
//! Uses `bytes::Bytes` for zero-copy body sharing.
//!
//! # Example
//!
//! ```
//! use muxwire::protocol::{flags, Frame, FrameTag};
//! use bytes::Bytes;
//!
//! let frame = Frame::data(1, flags::SYN, Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.tag(), FrameTag::Data);
//! assert_eq!(frame.header.length, 5);
//! assert_eq!(frame.body(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{FrameTag, GoAwayCode, Header};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Body bytes; only Data frames carry one.
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame from header and body.
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Data frame whose header length is the body length.
    ///
    /// Bodies are bounded by the split-send size long before they reach
    /// `u32::MAX`.
    pub fn data(stream_id: u32, flags: u16, body: Bytes) -> Self {
        let header = Header::new(FrameTag::Data, flags, stream_id, body.len() as u32);
        Self { header, body }
    }

    /// Window update granting `credit` bytes on `stream_id`.
    pub fn window_update(stream_id: u32, credit: u32, flags: u16) -> Self {
        Self::control(Header::new(FrameTag::WindowUpdate, flags, stream_id, credit))
    }

    /// Connection-level ping carrying `nonce`.
    pub fn ping(nonce: u32, flags: u16) -> Self {
        Self::control(Header::new(FrameTag::Ping, flags, 0, nonce))
    }

    /// Connection-level shutdown notice.
    pub fn go_away(code: GoAwayCode) -> Self {
        Self::control(Header::new(FrameTag::GoAway, 0, 0, code as u32))
    }

    fn control(header: Header) -> Self {
        Self {
            header,
            body: Bytes::new(),
        }
    }

    #[inline]
    pub fn tag(&self) -> FrameTag {
        self.header.tag
    }

    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    #[inline]
    pub fn flags(&self) -> u16 {
        self.header.flags
    }

    /// Get a reference to the body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::flags;

    #[test]
    fn test_data_frame_length_tracks_body() {
        let frame = Frame::data(7, flags::ACK | flags::FIN, Bytes::from_static(b"abc"));

        assert_eq!(frame.tag(), FrameTag::Data);
        assert_eq!(frame.stream_id(), 7);
        assert_eq!(frame.flags(), flags::ACK | flags::FIN);
        assert_eq!(frame.header.length, 3);
        assert_eq!(frame.body(), b"abc");
    }

    #[test]
    fn test_empty_data_frame() {
        let frame = Frame::data(1, flags::FIN, Bytes::new());
        assert_eq!(frame.header.length, 0);
        assert!(frame.body.is_empty());
    }

    #[test]
    fn test_window_update_carries_credit() {
        let frame = Frame::window_update(9, 131_072, flags::SYN);

        assert_eq!(frame.tag(), FrameTag::WindowUpdate);
        assert_eq!(frame.header.length, 131_072);
        assert!(frame.header.is_syn());
        assert!(frame.body.is_empty());
    }

    #[test]
    fn test_ping_and_go_away_use_stream_zero() {
        let ping = Frame::ping(0xA1B2_C3D4, flags::ACK);
        assert_eq!(ping.stream_id(), 0);
        assert_eq!(ping.header.length, 0xA1B2_C3D4);
        assert!(ping.header.is_ack());

        let go_away = Frame::go_away(GoAwayCode::ProtocolError);
        assert_eq!(go_away.tag(), FrameTag::GoAway);
        assert_eq!(go_away.stream_id(), 0);
        assert_eq!(go_away.header.length, 1);
        assert_eq!(go_away.flags(), 0);
    }
}
