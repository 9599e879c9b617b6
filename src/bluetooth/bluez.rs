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

//! BlueZ radio implementation.

use async_trait::async_trait;
use bluer::rfcomm::{Profile, Role, SocketAddr, Stream};
use bluer::{Adapter, AdapterEvent, AdapterProperty, Session};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::address::{Address, Endpoint};
use super::radio::{ChannelReader, ChannelWriter, KnownDevice, Radio, RawPowerState, SerialChannel};
use crate::error::{Result, SppError};

/// Local radio driven through the BlueZ daemon.
pub struct BluezRadio {
    session: Session,
    adapter: Option<Adapter>,
    rfcomm_channel: Option<u8>,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl BluezRadio {
    /// Connect to BlueZ and pick the default adapter.
    ///
    /// A missing adapter is not an error here; it shows up as
    /// [`Radio::is_available`] returning `false`.
    pub async fn new(rfcomm_channel: Option<u8>) -> Result<Self> {
        info!("Initializing Bluetooth...");

        // Create BlueZ session
        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = match session.default_adapter().await {
            Ok(adapter) => {
                info!("Using Bluetooth adapter: {}", adapter.name());
                Some(adapter)
            }
            Err(e) => {
                warn!("No Bluetooth adapter: {}", e);
                None
            }
        };

        Ok(Self {
            session,
            adapter,
            rfcomm_channel,
            discovery: Mutex::new(None),
        })
    }

    fn adapter(&self) -> Result<&Adapter> {
        self.adapter.as_ref().ok_or(SppError::AdapterUnavailable)
    }

    /// Open an RFCOMM channel by resolving `service` through a client profile.
    async fn connect_profile(&self, address: Address, service: Uuid) -> Result<Stream> {
        let profile = Profile {
            uuid: service,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let requests = self.session.register_profile(profile).await?;
        let device = self.adapter()?.device(address.into())?;

        let connect = device.connect_profile(&service);
        tokio::pin!(requests, connect);
        let mut connect_done = false;

        loop {
            tokio::select! {
                res = &mut connect, if !connect_done => {
                    connect_done = true;
                    if let Err(e) = res {
                        return Err(SppError::ChannelOpen(e.to_string()));
                    }
                }
                req = requests.next() => {
                    let Some(req) = req else {
                        return Err(SppError::ChannelOpen("profile unregistered".to_string()));
                    };
                    debug!("Profile connection from {}", req.device());
                    return req.accept().map_err(|e| SppError::ChannelOpen(e.to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl Radio for BluezRadio {
    fn is_available(&self) -> bool {
        self.adapter.is_some()
    }

    async fn is_powered(&self) -> bool {
        match &self.adapter {
            Some(adapter) => adapter.is_powered().await.unwrap_or_else(|e| {
                warn!("Failed to read adapter power: {}", e);
                false
            }),
            None => false,
        }
    }

    async fn request_power_on(&self) -> Result<()> {
        let adapter = self.adapter()?.clone();
        tokio::spawn(async move {
            info!("Powering on Bluetooth adapter...");
            if let Err(e) = adapter.set_powered(true).await {
                warn!("Failed to power on adapter: {}", e);
            }
        });
        Ok(())
    }

    async fn power_states(&self) -> Result<BoxStream<'static, RawPowerState>> {
        let adapter = self.adapter()?.clone();
        let (tx, rx) = async_channel::unbounded();

        tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => Box::pin(events),
                Err(e) => {
                    warn!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while let Some(event) = events.next().await {
                if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(on)) = event {
                    let code = if on { "on" } else { "off" };
                    if tx.send(code.to_string()).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok(rx.boxed())
    }

    async fn local_name(&self) -> Result<String> {
        Ok(self.adapter()?.alias().await?)
    }

    async fn local_address(&self) -> Result<Address> {
        Ok(self.adapter()?.address().await?.into())
    }

    async fn resolve(&self, address: Address) -> Result<Endpoint> {
        let device = self
            .adapter()?
            .device(address.into())
            .map_err(|e| SppError::Resolve {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        // Unknown devices have no D-Bus object yet; they can still be paged.
        let name = match device.name().await {
            Ok(name) => name,
            Err(e) => {
                debug!("No name for {}: {}", address, e);
                None
            }
        };
        Ok(Endpoint { address, name })
    }

    async fn is_discovering(&self) -> bool {
        match &self.adapter {
            Some(adapter) => adapter.is_discovering().await.unwrap_or(false),
            None => false,
        }
    }

    async fn start_discovery(&self) -> Result<()> {
        let adapter = self.adapter()?.clone();
        let mut discovery = self.discovery.lock();
        if discovery.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        *discovery = Some(tokio::spawn(async move {
            let events = match adapter.discover_devices().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Failed to start discovery: {}", e);
                    return;
                }
            };
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                if let AdapterEvent::DeviceAdded(addr) = event {
                    debug!("Discovered {}", addr);
                }
            }
        }));
        info!("Discovery started");
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        match self.discovery.lock().take() {
            Some(handle) => {
                // Dropping the discovery stream stops the scan.
                handle.abort();
                info!("Discovery cancelled");
            }
            None => debug!("Discovery owned by another client, leaving it running"),
        }
        Ok(())
    }

    async fn open_channel(
        &self,
        address: Address,
        service: Uuid,
    ) -> Result<Box<dyn SerialChannel>> {
        let stream = match self.rfcomm_channel {
            Some(channel) => {
                info!("Connecting socket to {} channel {}", address, channel);
                Stream::connect(SocketAddr::new(address.into(), channel))
                    .await
                    .map_err(|e| SppError::ChannelOpen(e.to_string()))?
            }
            None => {
                info!("Connecting socket to {} service {}", address, service);
                self.connect_profile(address, service).await?
            }
        };

        Ok(Box::new(RfcommChannel {
            peer: address,
            stream,
        }))
    }

    async fn known_devices(&self) -> Result<Vec<KnownDevice>> {
        let adapter = self.adapter()?;
        let mut devices = Vec::new();

        for addr in adapter.device_addresses().await? {
            let device = adapter.device(addr)?;
            let name = device.alias().await.ok();
            let paired = device.is_paired().await.unwrap_or(false);
            devices.push(KnownDevice {
                endpoint: Endpoint {
                    address: addr.into(),
                    name,
                },
                paired,
            });
        }

        devices.sort_by_key(|d| d.endpoint.address);
        Ok(devices)
    }
}

/// RFCOMM stream to a remote SPP service.
struct RfcommChannel {
    peer: Address,
    stream: Stream,
}

impl SerialChannel for RfcommChannel {
    fn peer(&self) -> Address {
        self.peer
    }

    fn into_streams(self: Box<Self>) -> Result<(ChannelReader, ChannelWriter)> {
        // A socket whose peer has already gone reports no peer address.
        self.stream
            .peer_addr()
            .map_err(|e| SppError::StreamSetup {
                which: "input",
                reason: e.to_string(),
            })?;

        let (reader, writer) = self.stream.into_split();
        Ok((Box::new(reader), Box::new(writer)))
    }
}
