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

//! Owner of the Bluetooth core for one application run.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

use crate::bluetooth::{AdapterTracker, ConnectionManager, LinkSettings, Radio};
use crate::error::{Result, SppError};
use crate::events::{self, EventReceiver};

/// Interval between power-state polls while waiting for the radio.
const ENABLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Ties the radio, the adapter tracker and the connection manager together.
///
/// Both components share one event sink; the receiving end is held here
/// until the application takes it.
pub struct Session {
    tracker: AdapterTracker,
    link: ConnectionManager,
    events: EventReceiver,
}

impl Session {
    /// Build the session. Fails once if the host has no radio.
    pub async fn initialize(radio: Arc<dyn Radio>, settings: LinkSettings) -> Result<Self> {
        if !radio.is_available() {
            error!("No Bluetooth radio available");
            return Err(SppError::AdapterUnavailable);
        }

        let (sink, events) = events::channel();
        let tracker = AdapterTracker::new(radio.clone(), sink.clone()).await;
        let link = ConnectionManager::new(radio, sink, settings);
        info!("Bluetooth session initialized");

        Ok(Self {
            tracker,
            link,
            events,
        })
    }

    pub fn tracker(&self) -> &AdapterTracker {
        &self.tracker
    }

    pub fn link(&self) -> &ConnectionManager {
        &self.link
    }

    /// Event stream shared by the tracker and the link.
    pub fn events(&self) -> EventReceiver {
        self.events.clone()
    }

    /// Subscribe to adapter broadcasts, request power and wait for it.
    ///
    /// Returns whether the radio is on before `wait` elapses.
    pub async fn ensure_enabled(&self, wait: Duration) -> Result<bool> {
        self.tracker.subscribe().await?;
        if !self.tracker.request_enable().await {
            return Ok(self.tracker.is_enabled().await);
        }

        let deadline = Instant::now() + wait;
        while Instant::now() < deadline {
            if self.tracker.is_enabled().await {
                return Ok(true);
            }
            tokio::time::sleep(ENABLE_POLL_INTERVAL).await;
        }
        Ok(self.tracker.is_enabled().await)
    }

    /// Tear down the link and stop listening to the adapter.
    pub async fn shutdown(&self) {
        self.link.disconnect().await;
        self.tracker.unsubscribe().await;
        info!("Bluetooth session closed");
    }
}
