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

//! Adapter power-state tracking.

use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::radio::Radio;
use crate::error::Result;
use crate::events::{BluetoothEvent, EventSink};

/// Power state of the local radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioState {
    Unknown,
    Off,
    TurningOn,
    On,
    TurningOff,
}

impl RadioState {
    /// Map a raw platform code. Unknown codes yield `None`.
    pub fn from_raw(code: &str) -> Option<Self> {
        match code {
            "off" => Some(Self::Off),
            "off-enabling" => Some(Self::TurningOn),
            "on" => Some(Self::On),
            "on-disabling" => Some(Self::TurningOff),
            _ => None,
        }
    }

    /// Notification raised when entering this state.
    fn event(self) -> Option<BluetoothEvent> {
        match self {
            Self::TurningOn => Some(BluetoothEvent::AdapterEnabling),
            Self::On => Some(BluetoothEvent::AdapterEnabled),
            Self::TurningOff => Some(BluetoothEvent::AdapterDisabling),
            Self::Off => Some(BluetoothEvent::AdapterDisabled),
            Self::Unknown => None,
        }
    }

}

/// Observes the radio's power state and raises adapter notifications.
pub struct AdapterTracker {
    radio: Arc<dyn Radio>,
    events: EventSink,
    state: Arc<Mutex<RadioState>>,
    subscription: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AdapterTracker {
    /// Create a tracker, seeding its state from the radio.
    pub async fn new(radio: Arc<dyn Radio>, events: EventSink) -> Self {
        let initial = current_state(radio.as_ref()).await;
        debug!("Adapter tracker starting in state {:?}", initial);

        Self {
            radio,
            events,
            state: Arc::new(Mutex::new(initial)),
            subscription: tokio::sync::Mutex::new(None),
        }
    }

    pub fn is_available(&self) -> bool {
        self.radio.is_available()
    }

    pub async fn is_enabled(&self) -> bool {
        self.radio.is_available() && self.radio.is_powered().await
    }

    /// Last state seen by the tracker.
    pub fn radio_state(&self) -> RadioState {
        *self.state.lock()
    }

    /// Ask the platform to power the radio on.
    ///
    /// Returns `false` without issuing anything when the radio is already
    /// enabled (or absent). The outcome arrives later as adapter events.
    pub async fn request_enable(&self) -> bool {
        if !self.radio.is_available() {
            warn!("Cannot enable Bluetooth: no adapter");
            return false;
        }
        if self.is_enabled().await {
            return false;
        }

        info!("Requesting Bluetooth power on");
        if let Err(e) = self.radio.request_power_on().await {
            warn!("Power-on request failed: {}", e);
        }
        true
    }

    /// Start receiving raw power-state broadcasts. Subscribing twice is a no-op.
    pub async fn subscribe(&self) -> Result<()> {
        let mut subscription = self.subscription.lock().await;
        if subscription.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Already subscribed to adapter broadcasts");
            return Ok(());
        }

        let mut broadcasts = self.radio.power_states().await?;

        // Changes made while unsubscribed went unseen.
        let current = current_state(self.radio.as_ref()).await;
        {
            let mut state = self.state.lock();
            if *state != current {
                debug!("Adapter state resynced: {:?} --> {:?}", *state, current);
                *state = current;
            }
        }

        let state = self.state.clone();
        let events = self.events.clone();

        *subscription = Some(tokio::spawn(async move {
            while let Some(code) = broadcasts.next().await {
                apply_raw_state(&state, &events, &code);
            }
            debug!("Adapter broadcast stream ended");
        }));
        info!("Subscribed to adapter broadcasts");
        Ok(())
    }

    /// Stop receiving broadcasts. Safe to call when not subscribed.
    pub async fn unsubscribe(&self) {
        match self.subscription.lock().await.take() {
            Some(handle) => {
                handle.abort();
                info!("Unsubscribed from adapter broadcasts");
            }
            None => debug!("Unsubscribe without active subscription"),
        }
    }

    /// Feed one raw broadcast through the tracker.
    pub fn handle_raw_state(&self, code: &str) {
        apply_raw_state(&self.state, &self.events, code);
    }
}

impl Drop for AdapterTracker {
    fn drop(&mut self) {
        if let Some(handle) = self.subscription.get_mut().take() {
            handle.abort();
        }
    }
}

async fn current_state(radio: &dyn Radio) -> RadioState {
    if !radio.is_available() {
        RadioState::Unknown
    } else if radio.is_powered().await {
        RadioState::On
    } else {
        RadioState::Off
    }
}

fn apply_raw_state(state: &Mutex<RadioState>, events: &EventSink, code: &str) {
    let Some(next) = RadioState::from_raw(code) else {
        debug!("Ignoring unknown adapter state: {}", code);
        return;
    };

    let mut current = state.lock();
    if *current == next {
        return;
    }
    debug!("Adapter state change: {:?} --> {:?}", *current, next);
    *current = next;

    if let Some(event) = next.event() {
        events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::LoopbackRadio;
    use crate::events::{self, EventReceiver};

    fn drain(rx: &EventReceiver) -> Vec<BluetoothEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_raw_mapping() {
        assert_eq!(RadioState::from_raw("off"), Some(RadioState::Off));
        assert_eq!(RadioState::from_raw("off-enabling"), Some(RadioState::TurningOn));
        assert_eq!(RadioState::from_raw("on"), Some(RadioState::On));
        assert_eq!(RadioState::from_raw("on-disabling"), Some(RadioState::TurningOff));
        assert_eq!(RadioState::from_raw("off-blocked"), None);
        assert_eq!(RadioState::from_raw(""), None);
    }

    #[tokio::test]
    async fn test_transitions_fire_in_order() {
        let radio = Arc::new(LoopbackRadio::new());
        radio.set_powered(false);
        let (sink, rx) = events::channel();
        let tracker = AdapterTracker::new(radio, sink).await;
        assert_eq!(tracker.radio_state(), RadioState::Off);

        for code in ["off", "off-enabling", "on", "bogus", "on-disabling", "off"] {
            tracker.handle_raw_state(code);
        }

        assert_eq!(
            drain(&rx),
            vec![
                BluetoothEvent::AdapterEnabling,
                BluetoothEvent::AdapterEnabled,
                BluetoothEvent::AdapterDisabling,
                BluetoothEvent::AdapterDisabled,
            ]
        );
        assert_eq!(tracker.radio_state(), RadioState::Off);
    }

    #[tokio::test]
    async fn test_repeated_state_is_not_renotified() {
        let radio = Arc::new(LoopbackRadio::new());
        let (sink, rx) = events::channel();
        let tracker = AdapterTracker::new(radio, sink).await;
        assert_eq!(tracker.radio_state(), RadioState::On);

        tracker.handle_raw_state("on");
        tracker.handle_raw_state("on");
        assert!(drain(&rx).is_empty());
    }

    #[tokio::test]
    async fn test_request_enable_when_already_on() {
        let radio = Arc::new(LoopbackRadio::new());
        let (sink, _rx) = events::channel();
        let tracker = AdapterTracker::new(radio.clone(), sink).await;

        assert!(tracker.is_enabled().await);
        assert!(!tracker.request_enable().await);
        assert_eq!(radio.power_on_requests(), 0);
    }

    #[tokio::test]
    async fn test_request_enable_when_off() {
        let radio = Arc::new(LoopbackRadio::new());
        radio.set_powered(false);
        let (sink, _rx) = events::channel();
        let tracker = AdapterTracker::new(radio.clone(), sink).await;

        assert!(tracker.request_enable().await);
        assert_eq!(radio.power_on_requests(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_radio() {
        let radio = Arc::new(LoopbackRadio::unavailable());
        let (sink, _rx) = events::channel();
        let tracker = AdapterTracker::new(radio.clone(), sink).await;

        assert!(!tracker.is_available());
        assert!(!tracker.is_enabled().await);
        assert_eq!(tracker.radio_state(), RadioState::Unknown);
        assert!(!tracker.request_enable().await);
        assert_eq!(radio.power_on_requests(), 0);
    }

    #[tokio::test]
    async fn test_subscription_delivers_broadcasts_once() {
        let radio = Arc::new(LoopbackRadio::new());
        radio.set_powered(false);
        let (sink, rx) = events::channel();
        let tracker = AdapterTracker::new(radio.clone(), sink).await;

        tracker.subscribe().await.unwrap();
        tracker.subscribe().await.unwrap();
        radio.broadcast_power_state("off-enabling");
        radio.broadcast_power_state("on");

        let first = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, BluetoothEvent::AdapterEnabling);
        assert_eq!(second, BluetoothEvent::AdapterEnabled);

        tracker.unsubscribe().await;
        tracker.unsubscribe().await;
        radio.broadcast_power_state("on-disabling");
        tokio::task::yield_now().await;
        assert!(drain(&rx).is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_resyncs_unseen_power_change() {
        let radio = Arc::new(LoopbackRadio::new());
        radio.set_powered(false);
        let (sink, rx) = events::channel();
        let tracker = AdapterTracker::new(radio.clone(), sink).await;
        assert_eq!(tracker.radio_state(), RadioState::Off);

        // Powered on while nobody listens.
        radio.set_powered(true);
        tracker.subscribe().await.unwrap();
        assert_eq!(tracker.radio_state(), RadioState::On);

        radio.set_powered(false);
        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, BluetoothEvent::AdapterDisabled);
        assert_eq!(tracker.radio_state(), RadioState::Off);
        assert!(drain(&rx).is_empty());

        tracker.unsubscribe().await;
    }
}
