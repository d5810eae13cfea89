//! Protocol module - wire format, frames, and the frame codec.
//!
//! This module implements the yamux framing used by the session:
//! - 12-byte header encoding/decoding
//! - Frame struct with typed constructors
//! - Async read/write of single frames over the transport

mod codec;
mod frame;
mod wire_format;

pub use codec::{read_frame, write_frame};
pub use frame::Frame;
pub use wire_format::{
    flags, FrameTag, GoAwayCode, Header, DEFAULT_CREDIT, DEFAULT_SPLIT_SEND_SIZE, HEADER_SIZE,
    MAX_ACK_BACKLOG, MAX_FRAME_BODY_LENGTH, PROTOCOL_VERSION,
};
