//! Single-owner routing hub.
//!
//! One task owns the [`Registry`] and applies events from a bounded mailbox
//! strictly in arrival order. Everything else talks to it through a cloned
//! [`HubHandle`]. Delivery never waits on a client: a full outbound queue
//! evicts that client and closes its connection.

pub mod client;
pub mod registry;

use std::sync::Arc;

use metrics::{counter, gauge};
use relay_core::{Payload, RoutedMessage};
use relay_settings::HubSettings;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{
    HUB_CLIENTS, HUB_DELIVERIES_TOTAL, HUB_DROPS_TOTAL, HUB_EVICTIONS_TOTAL,
    HUB_MESSAGES_ROUTED_TOTAL, HUB_SUPERSEDED_TOTAL,
};
use crate::websocket::connection::SendOutcome;

pub use client::Client;
pub use registry::{Registry, RegistryStats};

/// Hub sizing.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Mailbox capacity. Submitters wait when it is full.
    pub event_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { event_buffer: 1024 }
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(settings: &HubSettings) -> Self {
        Self {
            event_buffer: settings.event_buffer,
        }
    }
}

/// Errors returned by [`HubHandle`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The hub task has exited or was never started.
    #[error("hub is not running")]
    Stopped,
}

/// Events applied by the hub task.
#[derive(Debug)]
pub enum HubEvent {
    /// Index a newly connected client.
    Register(Arc<Client>),
    /// Remove a client if it is still the registered one.
    Unregister(Arc<Client>),
    /// Deliver to every client.
    Broadcast(Payload),
    /// Deliver to a resolved destination set.
    Emit(RoutedMessage),
    /// Report registry sizes.
    Stats(oneshot::Sender<RegistryStats>),
}

/// Cheap, cloneable entry point into a running hub.
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
    stop: CancellationToken,
}

impl HubHandle {
    /// Register a client. Called once per upgraded connection.
    pub async fn register(&self, client: Arc<Client>) -> Result<(), HubError> {
        self.submit(HubEvent::Register(client)).await
    }

    /// Unregister a client. A no-op if it was already removed or superseded.
    pub async fn unregister(&self, client: Arc<Client>) -> Result<(), HubError> {
        self.submit(HubEvent::Unregister(client)).await
    }

    /// Deliver `payload` to every connected client.
    pub async fn broadcast(&self, payload: Payload) -> Result<(), HubError> {
        self.submit(HubEvent::Broadcast(payload)).await
    }

    /// Deliver a routed message.
    pub async fn emit(&self, message: RoutedMessage) -> Result<(), HubError> {
        self.submit(HubEvent::Emit(message)).await
    }

    /// Submit a routed message as a broadcast or an emit, by its kind.
    pub async fn route(&self, message: RoutedMessage) -> Result<(), HubError> {
        match message {
            RoutedMessage::Broadcast { payload } => self.broadcast(payload).await,
            targeted @ RoutedMessage::Targeted { .. } => self.emit(targeted).await,
        }
    }

    /// Current registry sizes, once every earlier event from this caller
    /// has been applied.
    pub async fn stats(&self) -> Result<RegistryStats, HubError> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubEvent::Stats(tx)).await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Ask the hub task to stop. Every registered connection is closed.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether the hub task is gone.
    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }

    async fn submit(&self, event: HubEvent) -> Result<(), HubError> {
        self.tx.send(event).await.map_err(|_| HubError::Stopped)
    }
}

/// A hub that has not been started yet.
pub struct Hub {
    tx: mpsc::Sender<HubEvent>,
    rx: mpsc::Receiver<HubEvent>,
}

impl Hub {
    /// Create a hub with an empty registry.
    pub fn new(config: &HubConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        Self { tx, rx }
    }

    /// Spawn the hub task.
    ///
    /// The task runs until `cancel` fires or every handle is dropped, then
    /// closes all registered connections.
    pub fn start(self, cancel: CancellationToken) -> (HubHandle, JoinHandle<()>) {
        let handle = HubHandle {
            tx: self.tx,
            stop: cancel.clone(),
        };
        let task = HubTask {
            registry: Registry::new(),
            rx: self.rx,
            cancel,
        };
        (handle, tokio::spawn(task.run()))
    }
}

struct HubTask {
    registry: Registry,
    rx: mpsc::Receiver<HubEvent>,
    cancel: CancellationToken,
}

impl HubTask {
    #[tracing::instrument(skip_all, name = "hub")]
    async fn run(mut self) {
        info!("hub started");
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                event = self.rx.recv() => match event {
                    Some(event) => self.apply(event),
                    None => break,
                },
            }
        }
        self.rx.close();
        let remaining = self.registry.drain();
        for client in &remaining {
            client.connection().close();
        }
        gauge!(HUB_CLIENTS).set(0.0);
        info!(closed = remaining.len(), "hub stopped");
    }

    fn apply(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(client) => self.register(client),
            HubEvent::Unregister(client) => {
                if self.registry.unregister(&client) {
                    debug!(conn_id = %client.id(), user_id = %client.user_id(), "client unregistered");
                    self.record_clients();
                }
            }
            HubEvent::Broadcast(payload) => self.deliver(&RoutedMessage::Broadcast { payload }),
            HubEvent::Emit(message) => self.deliver(&message),
            HubEvent::Stats(reply) => {
                let _ = reply.send(self.registry.stats());
            }
        }
    }

    fn register(&mut self, client: Arc<Client>) {
        if client.connection().is_closed() {
            // Both pumps may already have exited and sent their unregister.
            debug!(conn_id = %client.id(), "ignoring register of closed connection");
            return;
        }
        debug!(
            conn_id = %client.id(),
            user_id = %client.user_id(),
            org = %client.organization(),
            "client registered"
        );
        if let Some(previous) = self.registry.register(client) {
            info!(
                conn_id = %previous.id(),
                user_id = %previous.user_id(),
                "closing connection superseded by reconnect"
            );
            previous.connection().close();
            counter!(HUB_SUPERSEDED_TOTAL).increment(1);
        }
        self.record_clients();
    }

    fn deliver(&mut self, message: &RoutedMessage) {
        let targets = self.registry.resolve(message);
        counter!(HUB_MESSAGES_ROUTED_TOTAL, "kind" => message.kind()).increment(1);

        let payload = message.payload();
        let mut delivered = 0_u64;
        let mut evicted = Vec::new();
        for client in targets {
            match client.connection().send(payload.clone()) {
                SendOutcome::Queued => delivered += 1,
                SendOutcome::Dropped => evicted.push(client),
            }
        }
        debug!(
            kind = message.kind(),
            recipients = delivered,
            dropped = evicted.len(),
            bytes = payload.len(),
            "message routed"
        );
        counter!(HUB_DELIVERIES_TOTAL).increment(delivered);

        if evicted.is_empty() {
            return;
        }
        counter!(HUB_DROPS_TOTAL).increment(evicted.len() as u64);
        for client in evicted {
            warn!(
                conn_id = %client.id(),
                user_id = %client.user_id(),
                dropped_total = client.connection().drop_count(),
                "outbound queue full, evicting client"
            );
            let _ = self.registry.unregister(&client);
            client.connection().close();
            counter!(HUB_EVICTIONS_TOTAL).increment(1);
        }
        self.record_clients();
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_clients(&self) {
        gauge!(HUB_CLIENTS).set(self.registry.len() as f64);
    }
}
