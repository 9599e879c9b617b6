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

//! Event delivery from the Bluetooth core to its consumer.
//!
//! Producers push into an [`EventSink`] and return immediately. The consumer
//! drains the matching [`EventReceiver`] on its own task, so callbacks never
//! run on the thread that observed the change.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bluetooth::Address;
use crate::state::AppState;

/// Notifications raised by the adapter tracker and the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BluetoothEvent {
    /// Radio is powering on.
    AdapterEnabling,
    /// Radio is on.
    AdapterEnabled,
    /// Radio is powering off.
    AdapterDisabling,
    /// Radio is off.
    AdapterDisabled,
    /// A connect target was selected. Fires before the channel is open.
    ConnectedTo { name: String, address: Address },
    /// The channel is open and the link is usable.
    Connected { address: Address },
    /// A connect attempt was aborted during setup.
    ConnectFailed {
        address: Address,
        stage: String,
        reason: String,
    },
    /// The sync preamble could not be sent; the link stays up.
    HandshakeFailed { address: Address, reason: String },
    /// An established link was torn down.
    Disconnected { address: Address },
}

/// Receiving end of the event stream.
pub type EventReceiver = async_channel::Receiver<BluetoothEvent>;

/// Create a connected sink/receiver pair.
pub fn channel() -> (EventSink, EventReceiver) {
    let (tx, rx) = async_channel::unbounded();
    (EventSink { tx }, rx)
}

/// Fire-and-forget sender shared by every event producer.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: async_channel::Sender<BluetoothEvent>,
}

impl EventSink {
    /// Queue an event. Never blocks; a closed receiver only gets logged.
    pub fn emit(&self, event: BluetoothEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!("Dropping event, no receiver: {:?}", e.into_inner());
        }
    }
}

/// Consumes events, mirrors them into [`AppState`] and reports them.
pub struct EventProcessor {
    state: Arc<AppState>,
    json: bool,
}

impl EventProcessor {
    pub fn new(state: Arc<AppState>, json: bool) -> Self {
        Self { state, json }
    }

    /// Process a single event.
    pub fn process_event(&mut self, event: &BluetoothEvent) {
        self.state.apply(event);

        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode event: {}", e),
            }
            return;
        }

        match event {
            BluetoothEvent::AdapterEnabling => info!("Bluetooth is being enabled"),
            BluetoothEvent::AdapterEnabled => info!("Bluetooth enabled"),
            BluetoothEvent::AdapterDisabling => info!("Bluetooth is being disabled"),
            BluetoothEvent::AdapterDisabled => info!("Bluetooth disabled"),
            BluetoothEvent::ConnectedTo { name, address } => {
                info!("Target selected: {} ({})", name, address)
            }
            BluetoothEvent::Connected { address } => info!("Link up to {}", address),
            BluetoothEvent::ConnectFailed {
                address,
                stage,
                reason,
            } => warn!("Connect to {} failed at {}: {}", address, stage, reason),
            BluetoothEvent::HandshakeFailed { address, reason } => {
                warn!("Sync to {} failed: {}", address, reason)
            }
            BluetoothEvent::Disconnected { address } => info!("Disconnected from {}", address),
        }
    }

    /// Drain `events` until every sink is dropped.
    pub async fn run(mut self, events: EventReceiver) {
        while let Ok(event) = events.recv().await {
            self.process_event(&event);
        }
        debug!("Event stream closed");
    }
}
