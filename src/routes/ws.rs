use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::{
        ws::{close_code, Message as WsMessage, WebSocket, WebSocketUpgrade},
        ConnectInfo, Extension,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::LinkErr,
    message::{self, Inbound, Message},
    relay::Relay,
    state::{Client, ClientId, Outbox, Registry},
};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Extension(relay): Extension<Relay>,
) -> impl IntoResponse {
    ws.on_failed_upgrade(move |e| warn!(%peer, "upgrade failed: {e}"))
        .on_upgrade(move |sock| user_ws(sock, peer, relay))
}

/// How long a closing socket gets to flush its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/* ---------------- per socket ---------------- */
async fn user_ws(sock: WebSocket, peer: SocketAddr, relay: Relay) {
    info!(%peer, "connected");
    let (sink, stream) = sock.split();
    let (client, outbox) = Client::new(peer);

    let writer = tokio::spawn(pump(sink, outbox, client.closed(), peer));
    let _ = serve_client(&relay, client, stream).await;
    let _ = writer.await;
}

/// Drains the outbox into the socket until the outbox empties out or the
/// client is closed. A write error closes the client, which ends its
/// receive loop; returning drops the outbox, so later sends fail.
async fn pump<S>(mut sink: S, mut outbox: Outbox, closed: CancellationToken, peer: SocketAddr)
where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = outbox.recv() => match frame {
                Some(f) => f,
                None => break,
            },
        };
        let res = tokio::select! {
            _ = closed.cancelled() => break,
            res = sink.send(frame) => res,
        };
        if let Err(e) = res {
            debug!(%peer, "write failed: {e}");
            closed.cancel();
            return;
        }
    }
    let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
}

/// Removes the client from the registry when the lifecycle ends. `leave`
/// covers the normal path; `Drop` covers panics and cancelled tasks.
struct Membership {
    registry: Registry,
    id:       ClientId,
    left:     bool,
}

impl Membership {
    async fn leave(mut self) {
        self.registry.remove(self.id).await;
        self.left = true;
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        if self.left {
            return;
        }
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let (registry, id) = (self.registry.clone(), self.id);
            rt.spawn(async move { registry.remove(id).await });
        }
    }
}

/// Runs one connection from admission to cleanup.
///
/// Admits `client` (register + replay), then relays every decoded message
/// until the inbound stream closes or fails. `Ok` means the peer closed
/// with 1000 or 1001. The client is out of the registry and closed when
/// this returns.
pub async fn serve_client<S>(relay: &Relay, client: Client, mut inbound: S) -> Result<(), LinkErr>
where
    S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    let (id, peer, closed) = (client.id(), client.peer(), client.closed());
    let seat = Membership { registry: relay.registry.clone(), id, left: false };

    let res = match relay.admit(client).await {
        Ok(()) => receive(relay, id, peer, &closed, &mut inbound).await,
        Err(e) => Err(e.into()),
    };
    seat.leave().await;
    closed.cancel();

    match &res {
        Ok(()) => info!(%peer, "client disconnected"),
        Err(e) => error!(%peer, "client dropped: {e}"),
    }
    res
}

async fn receive<S>(
    relay: &Relay,
    id: ClientId,
    peer: SocketAddr,
    closed: &CancellationToken,
    inbound: &mut S,
) -> Result<(), LinkErr>
where
    S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    let skip = relay.skip_for(id);
    loop {
        let next = tokio::select! {
            biased;
            _ = closed.cancelled() => return Err(LinkErr::Evicted),
            next = inbound.next() => next,
        };
        let raw = match next {
            Some(Ok(WsMessage::Text(t))) => t.into_bytes(),
            Some(Ok(WsMessage::Binary(b))) => b,
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
            Some(Ok(WsMessage::Close(frame))) => {
                return match frame.map(|f| f.code) {
                    Some(close_code::NORMAL | close_code::AWAY) => Ok(()),
                    Some(code) => Err(LinkErr::Abnormal(code)),
                    None => Err(LinkErr::Abnormal(close_code::STATUS)),
                };
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(LinkErr::Dropped),
        };

        match message::decode(&raw)? {
            Inbound::Relay(msg) => {
                match &msg {
                    Message::Chat { text } => {
                        info!(%peer, "chat: {text}");
                        relay.last.record(&msg).await;
                    }
                    Message::CursorMove { x, y } => debug!(%peer, x, y, "cursor moved"),
                }
                relay.broadcast(&msg, skip).await;
            }
            Inbound::Unknown(kind) => warn!(%peer, "unknown message type: {kind:?}"),
        }
    }
}
