use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::extract::ws::Message as WsMessage;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    RwLock,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{error::SendErr, message::Message};

pub type ClientId = Uuid;
pub type Outbox = mpsc::Receiver<WsMessage>;

/// Frames a client may have queued before it counts as stalled.
pub const OUTBOX_CAP: usize = 100;

/* ------------ one connected socket ------------ */

/// Handle for one connection. The sender feeds the socket's writer task;
/// once every handle is dropped the writer closes the socket. `closed`
/// ends the connection's receive loop.
#[derive(Clone, Debug)]
pub struct Client {
    id:     ClientId,
    peer:   SocketAddr,
    tx:     mpsc::Sender<WsMessage>,
    closed: CancellationToken,
}

impl Client {
    pub fn new(peer: SocketAddr) -> (Self, Outbox) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAP);
        let closed = CancellationToken::new();
        (Self { id: Uuid::new_v4(), peer, tx, closed }, rx)
    }

    pub fn id(&self) -> ClientId { self.id }
    pub fn peer(&self) -> SocketAddr { self.peer }

    /// Queues a frame without waiting on the socket. A full outbox means
    /// the peer stopped reading.
    pub fn push(&self, frame: WsMessage) -> Result<(), SendErr> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendErr::Full,
            TrySendError::Closed(_) => SendErr::Gone,
        })
    }

    /// Tells the connection to stop receiving and shut down.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/* ------------ membership set ------------ */

#[derive(Clone, Default)]
pub struct Registry {
    pub(crate) clients: Arc<RwLock<HashMap<ClientId, Client>>>,
}

impl Registry {
    /// No-op when the client is already a member.
    pub async fn add(&self, client: Client) {
        self.clients.write().await.entry(client.id).or_insert(client);
    }

    /// Returns whether the client was still a member.
    pub async fn remove(&self, id: ClientId) -> bool {
        self.clients.write().await.remove(&id).is_some()
    }

    /// Cloned handles; the lock is released before the caller sends anything.
    pub async fn snapshot(&self) -> Vec<Client> {
        self.clients.read().await.values().cloned().collect()
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        self.clients.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

/* ------------ last chat message ------------ */

#[derive(Clone, Default)]
pub struct LastState(Arc<RwLock<Option<Message>>>);

impl LastState {
    /// Stores `msg` if it is a chat message. Cursor moves are never kept.
    pub async fn record(&self, msg: &Message) -> bool {
        match msg {
            Message::Chat { .. } => {
                *self.0.write().await = Some(msg.clone());
                true
            }
            Message::CursorMove { .. } => false,
        }
    }

    pub async fn current(&self) -> Option<Message> {
        self.0.read().await.clone()
    }
}
