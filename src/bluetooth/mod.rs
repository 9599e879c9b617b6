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

//! Bluetooth communication module.
//!
//! Tracks the local adapter's power state and manages a single outbound
//! SPP link to a remote serial peer.

mod adapter;
mod address;
#[cfg(feature = "bluez")]
mod bluez;
mod connection;
mod loopback;
pub mod protocol;
mod radio;

pub use adapter::{AdapterTracker, RadioState};
pub use address::{Address, Endpoint, UNNAMED};
#[cfg(feature = "bluez")]
pub use bluez::BluezRadio;
pub use connection::{ConnectionManager, LinkSettings, LinkState};
pub use loopback::{Fault, LoopbackRadio};
pub use protocol::SPP_UUID;
pub use radio::{
    ChannelReader, ChannelWriter, KnownDevice, Radio, RawPowerState, SerialChannel,
};
