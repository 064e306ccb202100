//! Broadcast engine: fan-out over the registry with per-recipient failure
//! isolation, and admission of new clients with state replay.

use axum::extract::ws::Message as WsMessage;
use tracing::{error, warn};

use crate::{
    error::SendErr,
    message::{self, Message},
    state::{Client, ClientId, LastState, Registry},
};

/// Shared core handed to every connection task.
#[derive(Clone, Default)]
pub struct Relay {
    pub registry: Registry,
    pub last:     LastState,
    echo:         bool,
}

/// Outcome of one `broadcast` call.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped:   Vec<ClientId>,
}

impl Relay {
    /// `echo` also delivers a client's messages back to itself.
    pub fn new(echo: bool) -> Self {
        Self { echo, ..Default::default() }
    }

    /// Who a broadcast from `origin` should leave out.
    pub fn skip_for(&self, origin: ClientId) -> Option<ClientId> {
        (!self.echo).then_some(origin)
    }

    /// Registers `client` and queues the current state as its first frame.
    ///
    /// Both happen under the registry's write lock, so a concurrent
    /// broadcast either sees the client after its replay is queued or not
    /// at all. If the replay cannot be queued the client is not registered.
    pub async fn admit(&self, client: Client) -> Result<(), SendErr> {
        let mut clients = self.registry.clients.write().await;
        let frame = message::state_frame(self.last.current().await.as_ref())?;
        // not a member yet, so a failure has nothing to remove
        offer(&client, frame)?;
        clients.entry(client.id()).or_insert(client);
        Ok(())
    }

    /// Single-recipient send for callers outside the receive loop, e.g. a
    /// server notice. Same failure handling as one leg of `broadcast`.
    pub async fn send_to(&self, client: &Client, msg: &Message) -> Result<(), SendErr> {
        let frame = msg.encode()?;
        self.deliver(client, frame).await
    }

    /// Delivers `msg` to every current member except `skip`. A failed
    /// recipient is dropped from the registry; the rest still get it.
    pub async fn broadcast(&self, msg: &Message, skip: Option<ClientId>) -> Delivery {
        let mut report = Delivery::default();
        let frame = match msg.encode() {
            Ok(f) => f,
            Err(e) => {
                error!("encode failed: {e}");
                return report;
            }
        };

        for client in self.registry.snapshot().await {
            if Some(client.id()) == skip {
                continue;
            }
            match self.deliver(&client, frame.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(_) => report.dropped.push(client.id()),
            }
        }
        report
    }

    async fn deliver(&self, client: &Client, frame: String) -> Result<(), SendErr> {
        if let Err(e) = offer(client, frame) {
            self.registry.remove(client.id()).await;
            return Err(e);
        }
        Ok(())
    }
}

/// Queues `frame` for `client`. On failure the client is closed: its
/// receive loop stops and the lifecycle tears the connection down.
fn offer(client: &Client, frame: String) -> Result<(), SendErr> {
    client.push(WsMessage::Text(frame)).map_err(|e| {
        warn!(client = %client.id(), peer = %client.peer(), "send failed: {e}");
        client.close();
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Outbox, OUTBOX_CAP};
    use std::net::SocketAddr;

    fn join() -> (Client, Outbox) {
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        Client::new(peer)
    }

    fn text(frame: WsMessage) -> String {
        match frame {
            WsMessage::Text(t) => t,
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_survives_one_failing_recipient() {
        let relay = Relay::default();
        let mut live = Vec::new();
        for _ in 0..4 {
            let (c, rx) = join();
            relay.registry.add(c).await;
            live.push(rx);
        }
        let (dead, dead_rx) = join();
        relay.registry.add(dead.clone()).await;
        drop(dead_rx);

        let msg = Message::chat("hi");
        let report = relay.broadcast(&msg, None).await;

        assert_eq!(report.delivered, 4);
        assert_eq!(report.dropped, vec![dead.id()]);
        assert!(!relay.registry.contains(dead.id()).await);
        assert!(dead.is_closed());
        assert_eq!(relay.registry.len().await, 4);
        for rx in &mut live {
            assert_eq!(text(rx.try_recv().unwrap()), msg.encode().unwrap());
        }
    }

    #[tokio::test]
    async fn broadcast_leaves_out_skipped_client() {
        let relay = Relay::default();
        let (a, mut a_rx) = join();
        let (b, mut b_rx) = join();
        relay.registry.add(a.clone()).await;
        relay.registry.add(b).await;

        let report = relay.broadcast(&Message::chat("x"), relay.skip_for(a.id())).await;
        assert_eq!(report.delivered, 1);
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn echo_includes_origin() {
        let relay = Relay::new(true);
        let (a, mut a_rx) = join();
        relay.registry.add(a.clone()).await;

        relay.broadcast(&Message::chat("me"), relay.skip_for(a.id())).await;
        assert!(a_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn admit_replays_state_first() {
        let relay = Relay::default();
        let (a, mut a_rx) = join();
        relay.admit(a).await.unwrap();
        assert_eq!(text(a_rx.try_recv().unwrap()), r#"{"type":""}"#);

        let m = Message::chat("hello");
        relay.last.record(&m).await;
        relay.broadcast(&m, None).await;

        let (b, mut b_rx) = join();
        relay.admit(b.clone()).await.unwrap();
        assert!(relay.registry.contains(b.id()).await);
        assert_eq!(text(b_rx.try_recv().unwrap()), m.encode().unwrap());
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn admit_failure_leaves_registry_untouched() {
        let relay = Relay::default();
        let (c, rx) = join();
        drop(rx);
        assert!(relay.admit(c.clone()).await.is_err());
        assert!(!relay.registry.contains(c.id()).await);
        assert!(c.is_closed());
    }

    #[tokio::test]
    async fn stalled_reader_is_dropped_once_outbox_fills() {
        let relay = Relay::default();
        let (stalled, _never_read) = join();
        let (ok, mut ok_rx) = join();
        relay.registry.add(stalled.clone()).await;
        relay.registry.add(ok).await;

        let mut dropped = Vec::new();
        for i in 0..=OUTBOX_CAP {
            let mv = Message::CursorMove { x: i as i64, y: 0 };
            dropped.extend(relay.broadcast(&mv, None).await.dropped);
            ok_rx.recv().await.unwrap();
        }

        assert_eq!(dropped, vec![stalled.id()]);
        assert!(stalled.is_closed());
        assert!(!relay.registry.contains(stalled.id()).await);
        assert_eq!(relay.registry.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn replay_precedes_racing_broadcasts() {
        const CHATS: usize = 50;
        const JOINERS: usize = 64;

        let relay = Relay::default();
        let r = relay.clone();
        let talker = tokio::spawn(async move {
            for i in 0..CHATS {
                let m = Message::chat(i.to_string());
                r.last.record(&m).await;
                r.broadcast(&m, None).await;
                tokio::task::yield_now().await;
            }
        });

        let mut joins = Vec::new();
        for _ in 0..JOINERS {
            let r = relay.clone();
            joins.push(tokio::spawn(async move {
                let (c, rx) = join();
                r.admit(c).await.unwrap();
                rx
            }));
        }
        let mut outboxes = Vec::new();
        for j in joins {
            outboxes.push(j.await.unwrap());
        }
        talker.await.unwrap();

        for mut rx in outboxes {
            // sentinel is -1; a broadcast overtaking the replay would show
            // up as a newer chat followed by an older one
            let mut seen = Vec::new();
            while let Ok(frame) = rx.try_recv() {
                let v: serde_json::Value = serde_json::from_str(&text(frame)).unwrap();
                let n = v["text"].as_str().map_or(-1, |t| t.parse::<i64>().unwrap());
                seen.push(n);
            }
            assert!(!seen.is_empty(), "newcomer got no replay");
            assert!(seen.windows(2).all(|w| w[0] <= w[1]), "out of order: {seen:?}");
        }
        assert_eq!(relay.registry.len().await, JOINERS);
    }

    #[tokio::test]
    async fn send_to_failure_removes_recipient() {
        let relay = Relay::default();
        let (c, rx) = join();
        relay.registry.add(c.clone()).await;
        drop(rx);

        let res = relay.send_to(&c, &Message::chat("x")).await;
        assert!(matches!(res, Err(SendErr::Gone)));
        assert!(relay.registry.is_empty().await);
        assert!(c.is_closed());
    }

    #[tokio::test]
    async fn cursor_moves_do_not_replace_replayed_state() {
        let relay = Relay::default();
        let m = Message::chat("M");
        relay.last.record(&m).await;
        for i in 0..3 {
            let mv = Message::CursorMove { x: i, y: i };
            relay.last.record(&mv).await;
            relay.broadcast(&mv, None).await;
        }

        let (c, mut rx) = join();
        relay.admit(c).await.unwrap();
        assert_eq!(text(rx.try_recv().unwrap()), m.encode().unwrap());
    }

    #[tokio::test]
    async fn removing_from_registry_closes_outbox() {
        let relay = Relay::default();
        let (c, mut rx) = join();
        let id = c.id();
        relay.admit(c).await.unwrap();
        rx.recv().await.unwrap();

        relay.registry.remove(id).await;
        assert!(rx.recv().await.is_none());
    }
}
