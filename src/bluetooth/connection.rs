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

//! Single-connection lifecycle manager.
//!
//! At most one [`Connection`] exists at a time. Every public operation takes
//! the manager lock for its whole duration, so a `connect` running on one
//! task and a `send` issued from another never interleave.
//!
//! Nothing here returns an error to the caller: setup failures leave the
//! manager idle and are reported through logs and [`BluetoothEvent`]s.

use parking_lot::Mutex as StateLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::address::Endpoint;
use super::protocol::{self, SPP_UUID};
use super::radio::{ChannelReader, ChannelWriter, Radio};
use crate::error::{Result, SppError};
use crate::events::{BluetoothEvent, EventSink};

/// Lifecycle state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// Tunables for establishing a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Service identifier both ends rendezvous on.
    pub service_uuid: Uuid,
    /// Upper bound for opening the channel. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            service_uuid: SPP_UUID,
            connect_timeout: None,
        }
    }
}

/// The live link to a remote peer.
struct Connection {
    endpoint: Endpoint,
    reader: Option<ChannelReader>,
    writer: Option<ChannelWriter>,
}

/// Owns the single active connection and relays outbound lines over it.
pub struct ConnectionManager {
    radio: Arc<dyn Radio>,
    events: EventSink,
    settings: LinkSettings,
    connection: Mutex<Option<Connection>>,
    state: StateLock<LinkState>,
}

impl ConnectionManager {
    pub fn new(radio: Arc<dyn Radio>, events: EventSink, settings: LinkSettings) -> Self {
        Self {
            radio,
            events,
            settings,
            connection: Mutex::new(None),
            state: StateLock::new(LinkState::Idle),
        }
    }

    /// Current lifecycle state. Does not wait for an operation in flight.
    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    fn set_state(&self, state: LinkState) {
        *self.state.lock() = state;
    }

    /// Connect to `endpoint`, replacing any existing connection.
    ///
    /// May block for as long as the stack takes to page the peer. The
    /// outcome is observable through [`Self::is_connected`] and events.
    pub async fn connect(&self, endpoint: Endpoint) {
        let mut connection = self.connection.lock().await;
        self.teardown(&mut connection).await;

        self.set_state(LinkState::Connecting);
        info!("Connecting to {}", endpoint.address);

        match self.establish(&endpoint).await {
            Ok(established) => {
                info!(
                    "Connected to {} ({})",
                    established.endpoint.display_name(),
                    established.endpoint.address
                );
                let address = established.endpoint.address;
                *connection = Some(established);
                self.set_state(LinkState::Connected);
                self.events.emit(BluetoothEvent::Connected { address });
            }
            Err(e) => {
                error!("Connect to {} failed: {}", endpoint.address, e);
                self.events.emit(BluetoothEvent::ConnectFailed {
                    address: endpoint.address,
                    stage: e.stage().to_string(),
                    reason: e.to_string(),
                });
                self.set_state(LinkState::Idle);
            }
        }
    }

    /// Run the setup stages in order. Anything acquired by a failing stage
    /// is dropped on the way out.
    async fn establish(&self, endpoint: &Endpoint) -> Result<Connection> {
        let mut remote = self.radio.resolve(endpoint.address).await?;
        if remote.name.is_none() {
            remote.name = endpoint.name.clone();
        }
        info!(
            "Bluetooth device selected: {}; {}",
            remote.display_name(),
            remote.address
        );

        self.events.emit(BluetoothEvent::ConnectedTo {
            name: remote.display_name().to_string(),
            address: remote.address,
        });

        if self.radio.is_discovering().await {
            debug!("Cancelling discovery before connect");
            if let Err(e) = self.radio.cancel_discovery().await {
                warn!("Failed to cancel discovery: {}", e);
            }
        }

        let open = self
            .radio
            .open_channel(remote.address, self.settings.service_uuid);
        let channel = match self.settings.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, open)
                .await
                .map_err(|_| SppError::Timeout(limit))??,
            None => open.await?,
        };
        debug!("Channel open to {}", channel.peer());

        let (reader, mut writer) = channel.into_streams()?;

        if let Err(e) = self.send_sync(&mut writer).await {
            warn!("{}", e);
            self.events.emit(BluetoothEvent::HandshakeFailed {
                address: remote.address,
                reason: e.to_string(),
            });
        }

        Ok(Connection {
            endpoint: remote,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    async fn send_sync(&self, writer: &mut ChannelWriter) -> Result<()> {
        let name = match self.radio.local_name().await {
            Ok(name) => name,
            Err(e) => {
                warn!("Local adapter name unavailable: {}", e);
                super::address::UNNAMED.to_string()
            }
        };
        let address = self.radio.local_address().await.unwrap_or_else(|e| {
            warn!("Local adapter address unavailable: {}", e);
            super::address::Address::any()
        });

        let sync = protocol::sync_message(&name, &address);
        debug!("Sending: {}", sync);
        protocol::write_line(writer, &sync)
            .await
            .map_err(SppError::Handshake)
    }

    /// Tear down the current connection. Safe to call when idle.
    pub async fn disconnect(&self) {
        let mut connection = self.connection.lock().await;
        self.teardown(&mut connection).await;
    }

    /// Release every resource of the connection, step by step.
    ///
    /// Each step is attempted even if an earlier one failed.
    async fn teardown(&self, slot: &mut Option<Connection>) {
        let Some(mut connection) = slot.take() else {
            self.set_state(LinkState::Idle);
            return;
        };
        self.set_state(LinkState::Disconnecting);
        let address = connection.endpoint.address;
        debug!("Disconnecting from {}", address);

        if let Some(mut writer) = connection.writer.take() {
            if let Err(e) = writer.flush().await {
                warn!("Failed to flush output stream: {}", e);
            }
            if let Err(e) = writer.shutdown().await {
                warn!("Failed to close output stream: {}", e);
            }
        }

        if connection.reader.take().is_some() {
            debug!("Input stream closed");
        }

        // Both halves are gone, so the socket is released here.
        drop(connection);
        info!("Disconnected from {}", address);

        self.events.emit(BluetoothEvent::Disconnected { address });
        self.set_state(LinkState::Idle);
    }

    /// Whether a channel with a writable stream currently exists.
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.writer.is_some())
    }

    /// Peer of the current connection, if any.
    pub async fn peer(&self) -> Option<Endpoint> {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|c| c.endpoint.clone())
    }

    /// Send one line to the peer.
    ///
    /// A no-op when not connected. Write failures are logged and otherwise
    /// ignored; the connection stays in place until disconnected.
    pub async fn send(&self, message: &str) {
        let mut connection = self.connection.lock().await;
        let Some(writer) = connection.as_mut().and_then(|c| c.writer.as_mut()) else {
            debug!("Not connected, dropping message");
            return;
        };

        if let Err(e) = protocol::write_line(writer, message).await {
            debug!("Send failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{Address, Fault, LoopbackRadio};
    use crate::events::{self, EventReceiver};
    use tokio::io::AsyncReadExt;

    fn target() -> Address {
        "00:16:38:3A:3B:A8".parse().unwrap()
    }

    fn setup() -> (Arc<LoopbackRadio>, ConnectionManager, EventReceiver) {
        let radio = Arc::new(LoopbackRadio::new());
        let (sink, rx) = events::channel();
        let manager = ConnectionManager::new(radio.clone(), sink, LinkSettings::default());
        (radio, manager, rx)
    }

    fn drain(rx: &EventReceiver) -> Vec<BluetoothEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn test_connect_sends_sync() {
        let (radio, manager, rx) = setup();
        manager.connect(Endpoint::new(target())).await;

        assert!(manager.is_connected().await);
        assert_eq!(manager.state(), LinkState::Connected);

        let mut peer = radio.take_peer(target()).unwrap();
        let mut buf = vec![0u8; 64];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"SYNC from loopback 02:00:00:00:00:01\r\n");

        assert_eq!(
            drain(&rx),
            vec![
                BluetoothEvent::ConnectedTo {
                    name: "unnamed".into(),
                    address: target(),
                },
                BluetoothEvent::Connected { address: target() },
            ]
        );
    }

    #[tokio::test]
    async fn test_open_failure_stays_idle() {
        let (radio, manager, rx) = setup();
        radio.inject(Fault::Open);
        manager.connect(Endpoint::new(target())).await;

        assert!(!manager.is_connected().await);
        assert_eq!(manager.state(), LinkState::Idle);

        let events = drain(&rx);
        // Target selection is announced before the channel is tried.
        assert!(matches!(events[0], BluetoothEvent::ConnectedTo { .. }));
        assert!(matches!(
            &events[1],
            BluetoothEvent::ConnectFailed { stage, .. } if stage == "open"
        ));
    }

    #[tokio::test]
    async fn test_resolve_failure_skips_notification() {
        let (radio, manager, rx) = setup();
        radio.inject(Fault::Resolve);
        manager.connect(Endpoint::new(target())).await;

        assert!(!manager.is_connected().await);
        assert_eq!(radio.channels_opened(), 0);
        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            BluetoothEvent::ConnectFailed { stage, .. } if stage == "resolve"
        ));
    }

    #[tokio::test]
    async fn test_stream_failure_releases_channel() {
        let (radio, manager, _rx) = setup();
        radio.inject(Fault::OutputStream);
        manager.connect(Endpoint::new(target())).await;

        assert!(!manager.is_connected().await);
        assert_eq!(radio.channels_opened(), 1);

        // The channel was dropped, so the peer sees EOF.
        let mut peer = radio.take_peer(target()).unwrap();
        let mut buf = Vec::new();
        peer.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_sync_failure_keeps_connection() {
        let (radio, manager, rx) = setup();
        radio.inject(Fault::PeerGone);
        manager.connect(Endpoint::new(target())).await;

        assert!(manager.is_connected().await);
        let events = drain(&rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, BluetoothEvent::HandshakeFailed { .. })));

        // Sends keep failing quietly.
        manager.send("1;2;3").await;
        assert!(manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_cancels_discovery() {
        let (radio, manager, _rx) = setup();
        radio.set_discovering(true);
        manager.connect(Endpoint::new(target())).await;

        assert_eq!(radio.discovery_cancels(), 1);
        assert!(!radio.is_discovering().await);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let radio = Arc::new(LoopbackRadio::new());
        let (sink, rx) = events::channel();
        let settings = LinkSettings {
            connect_timeout: Some(Duration::from_millis(20)),
            ..LinkSettings::default()
        };
        let manager = ConnectionManager::new(radio.clone(), sink, settings);
        radio.inject(Fault::Hang);

        manager.connect(Endpoint::new(target())).await;
        assert!(!manager.is_connected().await);
        assert!(drain(&rx).iter().any(|e| matches!(
            e,
            BluetoothEvent::ConnectFailed { stage, .. } if stage == "open"
        )));
    }

    #[tokio::test]
    async fn test_send_when_idle_is_noop() {
        let (_radio, manager, rx) = setup();
        manager.send("ignored").await;
        assert!(!manager.is_connected().await);
        assert_eq!(manager.state(), LinkState::Idle);
        assert!(drain(&rx).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_twice() {
        let (_radio, manager, rx) = setup();
        manager.connect(Endpoint::new(target())).await;
        manager.disconnect().await;
        manager.disconnect().await;

        assert!(!manager.is_connected().await);
        assert_eq!(manager.state(), LinkState::Idle);
        assert!(manager.peer().await.is_none());

        let disconnects = drain(&rx)
            .into_iter()
            .filter(|e| matches!(e, BluetoothEvent::Disconnected { .. }))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_resolved_name_is_used() {
        let (radio, manager, rx) = setup();
        radio.add_device(target(), Some("RN42"), true);
        manager.connect(Endpoint::new(target())).await;

        assert_eq!(manager.peer().await.unwrap().display_name(), "RN42");
        assert_eq!(
            drain(&rx)[0],
            BluetoothEvent::ConnectedTo {
                name: "RN42".into(),
                address: target(),
            }
        );
    }
}
