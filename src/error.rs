// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for the Bluetooth link.

use std::time::Duration;
use thiserror::Error;

/// Result alias for link operations.
pub type Result<T, E = SppError> = std::result::Result<T, E>;

/// Failures raised inside the link.
///
/// The connection manager never hands these to its callers; they end up in
/// the log and, for setup stages, in a [`crate::events::BluetoothEvent`].
#[derive(Error, Debug)]
pub enum SppError {
    #[error("Invalid hardware address: {0}")]
    InvalidAddress(String),

    #[error("Bluetooth adapter not available")]
    AdapterUnavailable,

    #[error("Failed to resolve remote device {address}: {reason}")]
    Resolve { address: String, reason: String },

    #[error("Failed to open channel: {0}")]
    ChannelOpen(String),

    #[error("Channel open timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to obtain {which} stream: {reason}")]
    StreamSetup { which: &'static str, reason: String },

    #[error("Failed to send sync message: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "bluez")]
    #[error("BlueZ error: {0}")]
    Bluez(#[from] bluer::Error),
}

impl SppError {
    /// Short stage label used in logs and failure events.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "address",
            Self::AdapterUnavailable => "adapter",
            Self::Resolve { .. } => "resolve",
            Self::ChannelOpen(_) | Self::Timeout(_) => "open",
            Self::StreamSetup { .. } => "streams",
            Self::Handshake(_) => "sync",
            Self::Io(_) => "io",
            #[cfg(feature = "bluez")]
            Self::Bluez(_) => "bluez",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_labels() {
        assert_eq!(SppError::ChannelOpen("refused".into()).stage(), "open");
        assert_eq!(SppError::Timeout(Duration::from_secs(3)).stage(), "open");
        assert_eq!(
            SppError::StreamSetup {
                which: "output",
                reason: "closed".into()
            }
            .stage(),
            "streams"
        );
    }

    #[test]
    fn test_display_includes_reason() {
        let err = SppError::Resolve {
            address: "00:16:38:3A:3B:A8".into(),
            reason: "unknown device".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to resolve remote device 00:16:38:3A:3B:A8: unknown device"
        );
    }
}
