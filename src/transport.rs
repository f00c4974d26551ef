// src/transport.rs
//
// Thin adapter over an ordered best-effort broadcast bus. The session only
// needs send plus message/state subscriptions; callbacks may arrive on a
// transport thread, so subscribers are expected to hand messages off into
// their own control queue before touching session state.

use crate::error::RaceError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

pub type MessageHandler = Box<dyn Fn(&str) + Send + Sync>;
pub type StateHandler = Box<dyn Fn(LinkState) + Send + Sync>;

/// Handle returned by a subscription; pass it back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(pub u64);

pub trait Transport: Send {
    /// Join a broadcast channel. Implicitly leaves any previous one.
    fn connect(&mut self, channel: &str) -> Result<(), RaceError>;

    /// Leave the current channel. Idempotent.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Broadcast a payload to every other endpoint on the channel.
    /// Returns false (without raising) when not connected; delivery is
    /// at-most-once, ordered per channel.
    fn send(&mut self, payload: &str) -> bool;

    fn subscribe_messages(&mut self, handler: MessageHandler) -> Subscription;
    fn subscribe_state(&mut self, handler: StateHandler) -> Subscription;
    fn unsubscribe(&mut self, subscription: Subscription);
}

// ============================================================================
// In-process loopback bus
// ============================================================================

/// Channel registry shared by every loopback endpoint. Delivery is
/// synchronous in send order, which preserves per-channel ordering; there is
/// no retry, matching the at-most-once contract.
#[derive(Default)]
struct HubInner {
    channels: HashMap<String, Vec<EndpointShared>>,
}

#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self) -> LoopbackEndpoint {
        LoopbackEndpoint {
            hub: self.clone(),
            shared: Arc::new(Mutex::new(EndpointInner::default())),
            channel: None,
        }
    }

    fn join(&self, channel: &str, endpoint: &EndpointShared) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(endpoint.clone());
    }

    fn leave(&self, channel: &str, endpoint: &EndpointShared) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(members) = inner.channels.get_mut(channel) {
            members.retain(|m| !Arc::ptr_eq(m, endpoint));
            if members.is_empty() {
                inner.channels.remove(channel);
            }
        }
    }

    fn broadcast(&self, channel: &str, sender: &EndpointShared, payload: &str) {
        let peers: Vec<EndpointShared> = {
            let inner = self.inner.lock().unwrap();
            match inner.channels.get(channel) {
                Some(members) => members
                    .iter()
                    .filter(|m| !Arc::ptr_eq(m, sender))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };
        for peer in peers {
            peer.lock().unwrap().deliver(payload);
        }
    }
}

type EndpointShared = Arc<Mutex<EndpointInner>>;

#[derive(Default)]
struct EndpointInner {
    next_subscription: u64,
    message_handlers: Vec<(u64, MessageHandler)>,
    state_handlers: Vec<(u64, StateHandler)>,
}

impl EndpointInner {
    fn deliver(&mut self, payload: &str) {
        for (_, handler) in &self.message_handlers {
            handler(payload);
        }
    }

    fn notify_state(&mut self, state: LinkState) {
        for (_, handler) in &self.state_handlers {
            handler(state);
        }
    }
}

pub struct LoopbackEndpoint {
    hub: LoopbackHub,
    shared: EndpointShared,
    channel: Option<String>,
}

impl Transport for LoopbackEndpoint {
    fn connect(&mut self, channel: &str) -> Result<(), RaceError> {
        self.disconnect();
        self.hub.join(channel, &self.shared);
        self.channel = Some(channel.to_string());
        debug!("Loopback endpoint joined channel {}", channel);
        self.shared.lock().unwrap().notify_state(LinkState::Connected);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(channel) = self.channel.take() {
            self.hub.leave(&channel, &self.shared);
            self.shared
                .lock()
                .unwrap()
                .notify_state(LinkState::Disconnected);
        }
    }

    fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    fn send(&mut self, payload: &str) -> bool {
        let Some(channel) = self.channel.clone() else {
            warn!("Send attempted while disconnected, dropping");
            return false;
        };
        self.hub.broadcast(&channel, &self.shared, payload);
        true
    }

    fn subscribe_messages(&mut self, handler: MessageHandler) -> Subscription {
        let mut inner = self.shared.lock().unwrap();
        let id = inner.next_subscription;
        inner.next_subscription += 1;
        inner.message_handlers.push((id, handler));
        Subscription(id)
    }

    fn subscribe_state(&mut self, handler: StateHandler) -> Subscription {
        let mut inner = self.shared.lock().unwrap();
        let id = inner.next_subscription;
        inner.next_subscription += 1;
        inner.state_handlers.push((id, handler));
        Subscription(id)
    }

    fn unsubscribe(&mut self, subscription: Subscription) {
        let mut inner = self.shared.lock().unwrap();
        inner.message_handlers.retain(|(id, _)| *id != subscription.0);
        inner.state_handlers.retain(|(id, _)| *id != subscription.0);
    }
}
