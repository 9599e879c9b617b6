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

//! In-memory radio.
//!
//! Every opened channel is a `tokio::io::duplex` pipe; the far end is kept
//! so the caller can play the remote peer. Each setup stage can be made to
//! fail, which is what the connection tests lean on.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::DuplexStream;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::address::{Address, Endpoint};
use super::radio::{ChannelReader, ChannelWriter, KnownDevice, Radio, RawPowerState, SerialChannel};
use crate::error::{Result, SppError};

/// Pipe capacity for loopback channels.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Setup stage a [`LoopbackRadio`] can be told to break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Resolving the remote device fails.
    Resolve,
    /// Opening the channel is refused.
    Open,
    /// Opening the channel never completes.
    Hang,
    /// The readable stream cannot be obtained.
    InputStream,
    /// The writable stream cannot be obtained.
    OutputStream,
    /// The peer hangs up before the sync preamble is written.
    PeerGone,
}

struct LoopbackInner {
    available: bool,
    powered: bool,
    discovering: bool,
    auto_power: bool,
    name: String,
    address: Address,
    devices: BTreeMap<Address, KnownDevice>,
    faults: Vec<Fault>,
    peers: HashMap<Address, DuplexStream>,
}

/// Radio backed entirely by memory.
pub struct LoopbackRadio {
    inner: Mutex<LoopbackInner>,
    broadcasts: broadcast::Sender<RawPowerState>,
    power_on_requests: AtomicUsize,
    discovery_cancels: AtomicUsize,
    channels_opened: AtomicUsize,
}

impl Default for LoopbackRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackRadio {
    /// A powered-on radio named `loopback` at `02:00:00:00:00:01`.
    pub fn new() -> Self {
        let (broadcasts, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(LoopbackInner {
                available: true,
                powered: true,
                discovering: false,
                auto_power: true,
                name: "loopback".to_string(),
                address: Address::new([0x02, 0, 0, 0, 0, 0x01]),
                devices: BTreeMap::new(),
                faults: Vec::new(),
                peers: HashMap::new(),
            }),
            broadcasts,
            power_on_requests: AtomicUsize::new(0),
            discovery_cancels: AtomicUsize::new(0),
            channels_opened: AtomicUsize::new(0),
        }
    }

    /// A host without any radio.
    pub fn unavailable() -> Self {
        let radio = Self::new();
        {
            let mut inner = radio.inner.lock();
            inner.available = false;
            inner.powered = false;
        }
        radio
    }

    pub fn with_identity(self, name: impl Into<String>, address: Address) -> Self {
        {
            let mut inner = self.inner.lock();
            inner.name = name.into();
            inner.address = address;
        }
        self
    }

    /// Register a remote device, optionally named and paired.
    pub fn add_device(&self, address: Address, name: Option<&str>, paired: bool) {
        let endpoint = Endpoint {
            address,
            name: name.map(str::to_string),
        };
        self.inner
            .lock()
            .devices
            .insert(address, KnownDevice { endpoint, paired });
    }

    /// Whether a power-on request completes by itself (default `true`).
    pub fn set_auto_power(&self, auto_power: bool) {
        self.inner.lock().auto_power = auto_power;
    }

    /// Flip the power state and broadcast it.
    pub fn set_powered(&self, powered: bool) {
        self.inner.lock().powered = powered;
        self.broadcast_power_state(if powered { "on" } else { "off" });
    }

    /// Deliver a raw power-state broadcast to subscribers.
    pub fn broadcast_power_state(&self, code: &str) {
        // No subscribers is fine.
        let _ = self.broadcasts.send(code.to_string());
    }

    pub fn set_discovering(&self, discovering: bool) {
        self.inner.lock().discovering = discovering;
    }

    /// Arm a fault for the following connect attempts.
    pub fn inject(&self, fault: Fault) {
        self.inner.lock().faults.push(fault);
    }

    /// Take the remote end of the latest channel opened to `address`.
    pub fn take_peer(&self, address: Address) -> Option<DuplexStream> {
        self.inner.lock().peers.remove(&address)
    }

    pub fn power_on_requests(&self) -> usize {
        self.power_on_requests.load(Ordering::SeqCst)
    }

    pub fn discovery_cancels(&self) -> usize {
        self.discovery_cancels.load(Ordering::SeqCst)
    }

    pub fn channels_opened(&self) -> usize {
        self.channels_opened.load(Ordering::SeqCst)
    }

    fn has_fault(&self, fault: Fault) -> bool {
        self.inner.lock().faults.contains(&fault)
    }
}

#[async_trait]
impl Radio for LoopbackRadio {
    fn is_available(&self) -> bool {
        self.inner.lock().available
    }

    async fn is_powered(&self) -> bool {
        let inner = self.inner.lock();
        inner.available && inner.powered
    }

    async fn request_power_on(&self) -> Result<()> {
        self.power_on_requests.fetch_add(1, Ordering::SeqCst);
        let auto_power = {
            let inner = self.inner.lock();
            if !inner.available {
                return Err(SppError::AdapterUnavailable);
            }
            inner.auto_power
        };

        if auto_power {
            self.broadcast_power_state("off-enabling");
            self.set_powered(true);
        }
        Ok(())
    }

    async fn power_states(&self) -> Result<BoxStream<'static, RawPowerState>> {
        let rx = self.broadcasts.subscribe();
        let states = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(code) => return Some((code, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Power-state subscriber lagged by {}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(states.boxed())
    }

    async fn local_name(&self) -> Result<String> {
        Ok(self.inner.lock().name.clone())
    }

    async fn local_address(&self) -> Result<Address> {
        Ok(self.inner.lock().address)
    }

    async fn resolve(&self, address: Address) -> Result<Endpoint> {
        if self.has_fault(Fault::Resolve) {
            return Err(SppError::Resolve {
                address: address.to_string(),
                reason: "injected fault".to_string(),
            });
        }

        let inner = self.inner.lock();
        Ok(inner
            .devices
            .get(&address)
            .map(|known| known.endpoint.clone())
            .unwrap_or_else(|| Endpoint::new(address)))
    }

    async fn is_discovering(&self) -> bool {
        self.inner.lock().discovering
    }

    async fn start_discovery(&self) -> Result<()> {
        self.inner.lock().discovering = true;
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        self.inner.lock().discovering = false;
        self.discovery_cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open_channel(
        &self,
        address: Address,
        service: Uuid,
    ) -> Result<Box<dyn SerialChannel>> {
        if self.has_fault(Fault::Hang) {
            futures::future::pending::<()>().await;
        }
        if !self.is_powered().await {
            return Err(SppError::ChannelOpen("radio is off".to_string()));
        }
        if self.has_fault(Fault::Open) {
            return Err(SppError::ChannelOpen("connection refused".to_string()));
        }

        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        self.channels_opened.fetch_add(1, Ordering::SeqCst);
        debug!("Loopback channel to {} for service {}", address, service);

        let mut inner = self.inner.lock();
        if inner.faults.contains(&Fault::PeerGone) {
            drop(remote);
        } else {
            inner.peers.insert(address, remote);
        }

        Ok(Box::new(LoopbackChannel {
            peer: address,
            pipe: local,
            fail_input: inner.faults.contains(&Fault::InputStream),
            fail_output: inner.faults.contains(&Fault::OutputStream),
        }))
    }

    async fn known_devices(&self) -> Result<Vec<KnownDevice>> {
        Ok(self.inner.lock().devices.values().cloned().collect())
    }
}

struct LoopbackChannel {
    peer: Address,
    pipe: DuplexStream,
    fail_input: bool,
    fail_output: bool,
}

impl SerialChannel for LoopbackChannel {
    fn peer(&self) -> Address {
        self.peer
    }

    fn into_streams(self: Box<Self>) -> Result<(ChannelReader, ChannelWriter)> {
        if self.fail_input {
            return Err(SppError::StreamSetup {
                which: "input",
                reason: "injected fault".to_string(),
            });
        }
        if self.fail_output {
            return Err(SppError::StreamSetup {
                which: "output",
                reason: "injected fault".to_string(),
            });
        }

        let (reader, writer) = tokio::io::split(self.pipe);
        Ok((Box::new(reader), Box::new(writer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_power_on_request_broadcasts() {
        let radio = LoopbackRadio::new();
        radio.set_powered(false);
        let mut states = radio.power_states().await.unwrap();

        radio.request_power_on().await.unwrap();
        assert_eq!(states.next().await.as_deref(), Some("off-enabling"));
        assert_eq!(states.next().await.as_deref(), Some("on"));
        assert!(radio.is_powered().await);
    }

    #[tokio::test]
    async fn test_manual_power() {
        let radio = LoopbackRadio::new();
        radio.set_powered(false);
        radio.set_auto_power(false);

        radio.request_power_on().await.unwrap();
        assert_eq!(radio.power_on_requests(), 1);
        assert!(!radio.is_powered().await);
    }

    #[tokio::test]
    async fn test_open_requires_power() {
        let radio = LoopbackRadio::new();
        radio.set_powered(false);
        let addr = Address::new([1, 2, 3, 4, 5, 6]);
        assert!(radio.open_channel(addr, Uuid::nil()).await.is_err());
        assert_eq!(radio.channels_opened(), 0);
    }

    #[tokio::test]
    async fn test_known_devices_sorted() {
        let radio = LoopbackRadio::new();
        radio.add_device(Address::new([9, 0, 0, 0, 0, 0]), Some("b"), false);
        radio.add_device(Address::new([1, 0, 0, 0, 0, 0]), Some("a"), true);

        let devices = radio.known_devices().await.unwrap();
        assert_eq!(devices[0].endpoint.display_name(), "a");
        assert!(devices[0].paired);
        assert_eq!(devices[1].endpoint.display_name(), "b");
    }
}
