//! # muxwire
//!
//! Stream multiplexer speaking the yamux wire protocol.
//!
//! One reliable, ordered byte-stream transport (a TCP connection, a pipe,
//! anything `AsyncRead + AsyncWrite`) carries many independent,
//! flow-controlled, bidirectional [`Stream`]s.
//!
//! ## Architecture
//!
//! - **Session**: owns the transport; a read loop dispatches incoming frames
//!   and a writer task serializes outgoing ones.
//! - **Stream**: per-stream credit-based flow control, independent
//!   half-close, reset.
//! - **Wire format**: 12-byte big-endian header followed by the body of Data
//!   frames.
//!
//! ## Example
//!
//! ```ignore
//! use muxwire::MuxListener;
//!
//! #[tokio::main]
//! async fn main() -> muxwire::Result<()> {
//!     let listener = MuxListener::bind("127.0.0.1:7000", None).await?;
//!     let (server, _peer) = listener.accept().await?;
//!
//!     while let Some(stream) = server.accept_stream().await {
//!         tokio::spawn(async move {
//!             while let Ok(chunk) = stream.read(4096).await {
//!                 if chunk.is_empty() || stream.write_bytes(chunk).await.is_err() {
//!                     break;
//!                 }
//!             }
//!             let _ = stream.close().await;
//!         });
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod transport;

mod incoming;
mod signal;
mod writer;

pub use config::Config;
pub use error::{MuxError, Result};
pub use session::{Mode, Session};
pub use stream::{Stream, StreamState};
pub use transport::{connect, MuxListener};
