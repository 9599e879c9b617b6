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

//! Platform seam for the local Bluetooth radio.
//!
//! Everything the adapter tracker and the connection manager need from the
//! host stack goes through [`Radio`]. BlueZ and the in-memory loopback radio
//! both implement it.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use super::address::{Address, Endpoint};
use crate::error::Result;

/// Readable half of an open serial channel.
pub type ChannelReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable half of an open serial channel.
pub type ChannelWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Raw power-state broadcast, as reported by the platform.
///
/// Uses the BlueZ `PowerState` vocabulary (`off`, `off-enabling`, `on`,
/// `on-disabling`). Codes outside it are passed through untouched and
/// ignored by the tracker.
pub type RawPowerState = String;

/// A connected, stream-oriented channel to a remote peer.
pub trait SerialChannel: Send {
    /// Address of the remote end.
    fn peer(&self) -> Address;

    /// Obtain the readable and writable streams.
    ///
    /// Consumes the channel; on failure it is dropped, which releases the
    /// underlying socket.
    fn into_streams(self: Box<Self>) -> Result<(ChannelReader, ChannelWriter)>;
}

/// The local Bluetooth radio.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Whether the host exposes a radio at all.
    fn is_available(&self) -> bool;

    /// Whether the radio is currently powered on.
    async fn is_powered(&self) -> bool;

    /// Ask the platform to power the radio on.
    ///
    /// Returns once the request is issued; the state change arrives later
    /// through [`Radio::power_states`].
    async fn request_power_on(&self) -> Result<()>;

    /// Stream of raw power-state broadcasts.
    async fn power_states(&self) -> Result<BoxStream<'static, RawPowerState>>;

    /// Friendly name of the local adapter.
    async fn local_name(&self) -> Result<String>;

    /// Hardware address of the local adapter.
    async fn local_address(&self) -> Result<Address>;

    /// Resolve an address to a remote device, filling in its name if known.
    async fn resolve(&self, address: Address) -> Result<Endpoint>;

    async fn is_discovering(&self) -> bool;

    async fn start_discovery(&self) -> Result<()>;

    async fn cancel_discovery(&self) -> Result<()>;

    /// Open a channel to `address` for the service identified by `service`.
    ///
    /// May block for several seconds while the stack pages the peer.
    async fn open_channel(&self, address: Address, service: Uuid)
        -> Result<Box<dyn SerialChannel>>;

    /// Devices the platform already knows about (bonded or cached).
    async fn known_devices(&self) -> Result<Vec<KnownDevice>>;
}

/// A device the platform has seen before.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct KnownDevice {
    pub endpoint: Endpoint,
    pub paired: bool,
}
