//! TCP transport.
//!
//! The dialing side of a connection is the [`Mode::Initiator`] (odd stream
//! ids), the accepting side the [`Mode::Responder`] (even stream ids).
//!
//! # Example
//!
//! ```ignore
//! use muxwire::transport::{connect, MuxListener};
//!
//! let listener = MuxListener::bind("127.0.0.1:0", None).await?;
//! let addr = listener.local_addr()?;
//!
//! let client = connect(addr, None).await?;
//! let (server, _peer) = listener.accept().await?;
//! ```

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::session::{Mode, Session};

/// Dial `addr` and run an initiator session over the connection.
pub async fn connect<A: ToSocketAddrs>(addr: A, config: Option<Config>) -> Result<Session> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    debug!(peer = ?stream.peer_addr().ok(), "tcp transport connected");

    Session::with_config(stream, Mode::Initiator, config.unwrap_or_default())
}

/// TCP listener producing responder sessions.
pub struct MuxListener {
    listener: TcpListener,
    config: Config,
}

impl MuxListener {
    /// Bind a listening socket.
    ///
    /// The config is validated up front so that `accept` cannot fail on it.
    pub async fn bind<A: ToSocketAddrs>(addr: A, config: Option<Config>) -> Result<Self> {
        let config = config.unwrap_or_default();
        config.validate()?;

        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config })
    }

    /// Accept one connection and start a responder session on it.
    pub async fn accept(&self) -> Result<(Session, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        debug!(%peer, "tcp transport accepted");

        let session = Session::with_config(stream, Mode::Responder, self.config.clone())?;
        Ok((session, peer))
    }

    /// Get the bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
