//! Control messages and connected clients.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, trace, warn};
use url::Url;

use crate::store::VersionTag;

// ==================== Clients ====================

/// Messages pushed from the worker to a client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Ask the client to resynchronize its data now.
    SyncNow {
        /// ms since epoch
        timestamp: u64,
    },
}

/// A connected application session.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub url: Url,
    /// Whether the session was opened by the worker and holds focus.
    pub focused: bool,
    /// Version controlling this session, once claimed.
    pub controller: Option<VersionTag>,
    sender: mpsc::UnboundedSender<ClientMessage>,
}

impl Client {
    /// Post message to client. Fails once the session has gone away.
    pub fn post_message(&self, message: ClientMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// Sessions the worker can reach.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Client>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. The receiver yields everything posted to it.
    pub async fn connect(&self, url: Url) -> (String, mpsc::UnboundedReceiver<ClientMessage>) {
        self.insert(url, false).await
    }

    /// Open a focused window at `url`.
    pub async fn open_window(&self, url: Url) -> (String, mpsc::UnboundedReceiver<ClientMessage>) {
        self.insert(url, true).await
    }

    async fn insert(&self, url: Url, focused: bool) -> (String, mpsc::UnboundedReceiver<ClientMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = format!("client-{}", uuid_simple());
        debug!(client = %id, url = %url, focused, "Client connected");
        let client = Client {
            id: id.clone(),
            url,
            focused,
            controller: None,
            sender,
        };
        self.clients.write().await.insert(id.clone(), client);
        (id, receiver)
    }

    /// Get a client by ID.
    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Remove a client.
    pub async fn remove(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Take control of every open session. Returns how many were claimed.
    pub async fn claim(&self, version: &VersionTag) -> usize {
        let mut clients = self.clients.write().await;
        for client in clients.values_mut() {
            client.controller = Some(version.clone());
        }
        debug!(version = %version, count = clients.len(), "Claimed clients");
        clients.len()
    }

    /// Post a message to every session, dropping sessions that are gone.
    /// Returns how many received it.
    pub async fn broadcast(&self, message: &ClientMessage) -> usize {
        let mut clients = self.clients.write().await;
        let before = clients.len();
        clients.retain(|id, client| {
            let delivered = client.post_message(message.clone());
            if !delivered {
                trace!(client = %id, "Dropping disconnected client");
            }
            delivered
        });
        let delivered = clients.len();
        if delivered < before {
            debug!(dropped = before - delivered, "Pruned disconnected clients");
        }
        delivered
    }
}

// ==================== Control messages ====================

/// Messages a client sends to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate the installing or waiting version now.
    SkipWaiting,
    /// Broadcast a resync request to every client.
    SyncNow,
    #[serde(other)]
    Unknown,
}

/// Acknowledgement sent on a message's reply channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub status: String,
    pub version: VersionTag,
}

impl ControlReply {
    pub fn ok(version: VersionTag) -> Self {
        Self {
            status: "OK".to_string(),
            version,
        }
    }
}

/// Decodes control messages and fans out to clients.
#[derive(Debug, Clone)]
pub struct ControlChannel {
    clients: Arc<ClientRegistry>,
    version: VersionTag,
}

impl ControlChannel {
    pub fn new(clients: Arc<ClientRegistry>, version: VersionTag) -> Self {
        Self { clients, version }
    }

    /// Decode a message. Anything unrecognized is [`ControlMessage::Unknown`].
    pub fn parse(payload: &serde_json::Value) -> ControlMessage {
        match ControlMessage::deserialize(payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed control message");
                ControlMessage::Unknown
            }
        }
    }

    /// Broadcast `SYNC_NOW` to every client. Best effort: no ack, no retry.
    pub async fn broadcast_sync(&self) -> usize {
        let message = ClientMessage::SyncNow {
            timestamp: now_millis(),
        };
        self.clients.broadcast(&message).await
    }

    /// Answer a reply channel, if the sender supplied one.
    pub fn acknowledge(&self, reply: Option<oneshot::Sender<ControlReply>>) {
        if let Some(reply) = reply {
            if reply.send(ControlReply::ok(self.version.clone())).is_err() {
                warn!("Control reply channel closed before acknowledgement");
            }
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Generate a simple UUID-like string.
fn uuid_simple() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    format!("{:016x}-{:04x}", nanos, COUNTER.fetch_add(1, Ordering::Relaxed))
}
