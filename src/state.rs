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

//! Application state management.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

use crate::bluetooth::{Endpoint, RadioState};
use crate::events::BluetoothEvent;

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Last reported radio state.
    pub radio_state: RwLock<RadioState>,

    /// Current connection status.
    pub connection_status: RwLock<ConnectionStatus>,

    /// Selected peer.
    pub peer: RwLock<Option<Endpoint>>,

    /// When the current link came up.
    pub connected_at: RwLock<Option<DateTime<Local>>>,

    /// Lines relayed since startup.
    pub lines_sent: RwLock<u64>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            radio_state: RwLock::new(RadioState::Unknown),
            connection_status: RwLock::new(ConnectionStatus::Disconnected),
            peer: RwLock::new(None),
            connected_at: RwLock::new(None),
            lines_sent: RwLock::new(0),
        }
    }
}

/// Point-in-time copy of [`AppState`].
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub radio: RadioState,
    pub connection: ConnectionStatus,
    pub peer: Option<Endpoint>,
    pub connected_at: Option<DateTime<Local>>,
    pub lines_sent: u64,
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fold a notification into the state.
    pub fn apply(&self, event: &BluetoothEvent) {
        match event {
            BluetoothEvent::AdapterEnabling => self.set_radio_state(RadioState::TurningOn),
            BluetoothEvent::AdapterEnabled => self.set_radio_state(RadioState::On),
            BluetoothEvent::AdapterDisabling => self.set_radio_state(RadioState::TurningOff),
            BluetoothEvent::AdapterDisabled => self.set_radio_state(RadioState::Off),
            BluetoothEvent::ConnectedTo { name, address } => {
                *self.connection_status.write() = ConnectionStatus::Connecting;
                *self.peer.write() = Some(Endpoint::with_name(*address, name.clone()));
            }
            BluetoothEvent::Connected { .. } => self.set_connected(),
            BluetoothEvent::ConnectFailed { .. } => self.set_error(),
            BluetoothEvent::HandshakeFailed { .. } => {}
            BluetoothEvent::Disconnected { .. } => self.set_disconnected(),
        }
    }

    pub fn set_radio_state(&self, state: RadioState) {
        *self.radio_state.write() = state;
    }

    pub fn set_connected(&self) {
        *self.connection_status.write() = ConnectionStatus::Connected;
        *self.connected_at.write() = Some(Local::now());
    }

    pub fn set_disconnected(&self) {
        *self.connection_status.write() = ConnectionStatus::Disconnected;
        *self.peer.write() = None;
        *self.connected_at.write() = None;
    }

    pub fn set_error(&self) {
        *self.connection_status.write() = ConnectionStatus::Error;
    }

    pub fn record_sent(&self) {
        *self.lines_sent.write() += 1;
    }

    pub fn radio_state(&self) -> RadioState {
        *self.radio_state.read()
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    pub fn get_peer(&self) -> Option<Endpoint> {
        self.peer.read().clone()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            radio: self.radio_state(),
            connection: self.get_status(),
            peer: self.get_peer(),
            connected_at: *self.connected_at.read(),
            lines_sent: *self.lines_sent.read(),
        }
    }
}
