//! Session configuration.
//!
//! [`Config`] holds the tunables shared by a session and all of its streams.
//! Every value is validated when set, so a `Config` that exists is a valid
//! one; a session re-validates on construction for configs that were built
//! through deserialization.
//!
//! # Example
//!
//! ```
//! use muxwire::Config;
//!
//! let config = Config::default()
//!     .with_max_num_streams(64)
//!     .unwrap()
//!     .with_split_send_size(8 * 1024)
//!     .unwrap();
//! assert_eq!(config.max_num_streams(), 64);
//!
//! // 512 streams x 256 KiB does not fit in a 1 MiB connection window.
//! assert!(Config::default()
//!     .with_max_connection_receive_window(Some(1024 * 1024))
//!     .is_err());
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};
use crate::protocol::{DEFAULT_CREDIT, DEFAULT_SPLIT_SEND_SIZE, MAX_FRAME_BODY_LENGTH};

/// Default connection-wide receive window ceiling (1 GiB).
pub const DEFAULT_MAX_CONNECTION_RECEIVE_WINDOW: u64 = 1024 * 1024 * 1024;

/// Default maximum number of concurrent streams.
pub const DEFAULT_MAX_NUM_STREAMS: usize = 512;

/// Multiplexer tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection-wide receive window ceiling; `None` means unbounded.
    max_connection_receive_window: Option<u64>,
    /// Maximum number of concurrent streams (either direction).
    max_num_streams: usize,
    /// Keep delivering buffered bytes after the connection is torn down.
    read_after_close: bool,
    /// Maximum payload of a single outgoing Data frame.
    split_send_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connection_receive_window: Some(DEFAULT_MAX_CONNECTION_RECEIVE_WINDOW),
            max_num_streams: DEFAULT_MAX_NUM_STREAMS,
            read_after_close: true,
            split_send_size: DEFAULT_SPLIT_SEND_SIZE,
        }
    }
}

impl Config {
    /// Parse and validate a JSON configuration document.
    ///
    /// Missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the connection-wide receive window ceiling.
    pub fn with_max_connection_receive_window(mut self, value: Option<u64>) -> Result<Self> {
        self.max_connection_receive_window = value;
        self.validate()?;
        Ok(self)
    }

    /// Set the maximum number of concurrent streams.
    pub fn with_max_num_streams(mut self, value: usize) -> Result<Self> {
        self.max_num_streams = value;
        self.validate()?;
        Ok(self)
    }

    /// Choose whether buffered bytes stay readable after the connection closes.
    pub fn with_read_after_close(mut self, value: bool) -> Result<Self> {
        self.read_after_close = value;
        Ok(self)
    }

    /// Set the maximum payload of a single outgoing Data frame.
    pub fn with_split_send_size(mut self, value: usize) -> Result<Self> {
        self.split_send_size = value;
        self.validate()?;
        Ok(self)
    }

    pub fn max_connection_receive_window(&self) -> Option<u64> {
        self.max_connection_receive_window
    }

    pub fn max_num_streams(&self) -> usize {
        self.max_num_streams
    }

    pub fn read_after_close(&self) -> bool {
        self.read_after_close
    }

    pub fn split_send_size(&self) -> usize {
        self.split_send_size
    }

    /// Check every tunable.
    ///
    /// The connection window, when bounded, must cover the full per-stream
    /// credit of every stream that may be open at once.
    pub fn validate(&self) -> Result<()> {
        if self.max_num_streams == 0 {
            return Err(MuxError::InvalidConfig(
                "max_num_streams must be > 0".to_string(),
            ));
        }

        if self.split_send_size == 0 {
            return Err(MuxError::InvalidConfig(
                "split_send_size must be > 0".to_string(),
            ));
        }

        // Larger Data frames would be refused by every peer's frame reader.
        if self.split_send_size > MAX_FRAME_BODY_LENGTH {
            return Err(MuxError::InvalidConfig(format!(
                "split_send_size must be <= {} ({} given)",
                MAX_FRAME_BODY_LENGTH, self.split_send_size
            )));
        }

        if let Some(window) = self.max_connection_receive_window {
            if window == 0 {
                return Err(MuxError::InvalidConfig(
                    "max_connection_receive_window must be > 0".to_string(),
                ));
            }

            let required = (self.max_num_streams as u64).saturating_mul(u64::from(DEFAULT_CREDIT));
            if window < required {
                return Err(MuxError::InvalidConfig(format!(
                    "max_connection_receive_window must be >= 256KiB * max_num_streams ({} < {})",
                    window, required
                )));
            }
        }

        Ok(())
    }
}
