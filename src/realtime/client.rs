// realtime/client.rs
//! Device-side subscription manager.
//!
//! One background task owns the socket and the set of live subscriptions.
//! Screens hold a [`SubscriptionHandle`] per concern; dropping the handle
//! retires the subscription. After a dropped connection the task waits
//! according to its [`ReconnectPolicy`] and resubscribes every entry from
//! the last sequence number it delivered.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
    time::Instant,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};

use super::{
    policy::ReconnectPolicy,
    protocol::{ChangeEvent, ClientFrame, ServerFrame, Table},
};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    Socket(#[from] tungstenite::Error),

    #[error("Could not encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What a subscription handle yields.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Change(ChangeEvent),
    /// Events were lost; refetch the current state.
    ResyncRequired { cursor: u64 },
    /// The server refused the subscription; no more deliveries follow.
    Rejected(String),
}

struct Entry {
    table: Table,
    filter: Option<String>,
    cursor: Option<u64>,
    sender: mpsc::UnboundedSender<Delivery>,
}

impl Entry {
    fn subscribe_frame(&self, id: &str) -> ClientFrame {
        ClientFrame::Subscribe {
            id: id.to_string(),
            table: self.table,
            filter: self.filter.clone(),
            since: self.cursor,
        }
    }
}

/// Subscriptions known to the client, each with the last sequence number delivered.
#[derive(Default)]
pub struct SubscriptionSet {
    entries: HashMap<String, Entry>,
}

impl SubscriptionSet {
    pub fn insert(
        &mut self,
        id: String,
        table: Table,
        filter: Option<String>,
        sender: mpsc::UnboundedSender<Delivery>,
    ) -> ClientFrame {
        let entry = Entry {
            table,
            filter,
            cursor: None,
            sender,
        };
        let frame = entry.subscribe_frame(&id);
        self.entries.insert(id, entry);
        frame
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn cursor(&self, id: &str) -> Option<u64> {
        self.entries.get(id).and_then(|entry| entry.cursor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscribe frames that pick every entry up where it left off.
    pub fn resume_frames(&self) -> Vec<ClientFrame> {
        let mut frames: Vec<ClientFrame> = self
            .entries
            .iter()
            .map(|(id, entry)| entry.subscribe_frame(id))
            .collect();
        frames.sort_by(|a, b| frame_id(a).cmp(frame_id(b)));
        frames
    }

    pub fn handle(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Subscribed { id, cursor } => {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.cursor.get_or_insert(cursor);
                }
            }
            ServerFrame::Change { id, event } => {
                let Some(entry) = self.entries.get_mut(&id) else {
                    return;
                };
                if entry.cursor.is_some_and(|cursor| event.seq <= cursor) {
                    tracing::debug!("Dropping duplicate change #{} for {}", event.seq, id);
                    return;
                }
                entry.cursor = Some(event.seq);
                if entry.sender.send(Delivery::Change(event)).is_err() {
                    self.entries.remove(&id);
                }
            }
            ServerFrame::ResyncRequired { id, cursor } => {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.cursor = Some(cursor);
                    let _ = entry.sender.send(Delivery::ResyncRequired { cursor });
                }
            }
            ServerFrame::Error { id: Some(id), message } => {
                tracing::warn!("Subscription {} rejected: {}", id, message);
                if let Some(entry) = self.entries.remove(&id) {
                    let _ = entry.sender.send(Delivery::Rejected(message));
                }
            }
            ServerFrame::Error { id: None, message } => {
                tracing::warn!("Realtime server error: {}", message);
            }
            ServerFrame::HeartbeatAck { cursors } => {
                for (id, cursor) in cursors {
                    if let Some(entry) = self.entries.get_mut(&id) {
                        // Change frames up to `cursor` were written before this ack.
                        if entry.cursor.map_or(true, |seen| seen < cursor) {
                            entry.cursor = Some(cursor);
                        }
                    }
                }
            }
        }
    }
}

fn frame_id(frame: &ClientFrame) -> &str {
    match frame {
        ClientFrame::Subscribe { id, .. } | ClientFrame::Unsubscribe { id } => id,
        ClientFrame::Heartbeat => "",
    }
}

enum Command {
    Subscribe {
        id: String,
        table: Table,
        filter: Option<String>,
        sender: mpsc::UnboundedSender<Delivery>,
    },
    Unsubscribe {
        id: String,
    },
}

impl Command {
    fn apply_offline(self, set: &mut SubscriptionSet) {
        match self {
            Command::Subscribe { id, table, filter, sender } => {
                set.insert(id, table, filter, sender);
            }
            Command::Unsubscribe { id } => {
                set.remove(&id);
            }
        }
    }
}

enum Exit {
    Dropped,
    Shutdown,
}

#[derive(Clone)]
pub struct SubscriptionManager {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

pub struct SubscriptionHandle {
    id: String,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    commands: mpsc::UnboundedSender<Command>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn next(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe {
            id: self.id.clone(),
        });
    }
}

impl SubscriptionManager {
    /// Spawns the connection task. It runs until the manager and every
    /// handle have been dropped.
    pub fn connect(
        ws_url: &str,
        token: &str,
        policy: ReconnectPolicy,
    ) -> (SubscriptionManager, JoinHandle<()>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let url = format!("{}?token={}", ws_url, urlencoding::encode(token));
        let task = tokio::spawn(run(url, policy, receiver));

        (
            SubscriptionManager {
                commands,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            task,
        )
    }

    pub fn subscribe(&self, table: Table, filter: Option<String>) -> SubscriptionHandle {
        let id = format!("{}-{}", table.as_str(), self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, deliveries) = mpsc::unbounded_channel();

        if self
            .commands
            .send(Command::Subscribe {
                id: id.clone(),
                table,
                filter,
                sender,
            })
            .is_err()
        {
            tracing::warn!("Realtime task is gone; subscription {} will stay silent", id);
        }

        SubscriptionHandle {
            id,
            deliveries,
            commands: self.commands.clone(),
        }
    }
}

async fn run(url: String, mut policy: ReconnectPolicy, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut set = SubscriptionSet::default();

    loop {
        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                tracing::info!("Realtime connected");
                policy.reset();
                match drive(socket, &mut set, &mut commands).await {
                    Ok(Exit::Shutdown) => return,
                    Ok(Exit::Dropped) => tracing::warn!("Realtime connection lost"),
                    Err(e) => tracing::warn!("Realtime connection failed: {}", e),
                }
            }
            Err(e) => tracing::warn!("Realtime connect failed: {}", e),
        }

        let delay = policy.next_delay();
        tracing::debug!("Reconnecting in {:?} (attempt {})", delay, policy.attempt());

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = commands.recv() => match command {
                    Some(command) => command.apply_offline(&mut set),
                    None => return,
                },
            }
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &ClientFrame) -> Result<(), ConnectionError>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(frame)?;
    sink.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

async fn drive(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    set: &mut SubscriptionSet,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Result<Exit, ConnectionError> {
    let (mut sink, mut stream) = socket.split();

    for frame in set.resume_frames() {
        send_frame(&mut sink, &frame).await?;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= IDLE_TIMEOUT {
                    tracing::warn!("No traffic for {:?}; treating connection as dead", IDLE_TIMEOUT);
                    return Ok(Exit::Dropped);
                }
                send_frame(&mut sink, &ClientFrame::Heartbeat).await?;
            }
            command = commands.recv() => match command {
                Some(Command::Subscribe { id, table, filter, sender }) => {
                    let frame = set.insert(id, table, filter, sender);
                    send_frame(&mut sink, &frame).await?;
                }
                Some(Command::Unsubscribe { id }) => {
                    if set.remove(&id) {
                        send_frame(&mut sink, &ClientFrame::Unsubscribe { id }).await?;
                    }
                }
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok(Exit::Shutdown);
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(message)) => {
                    last_seen = Instant::now();
                    match message {
                        WsMessage::Text(text) => match serde_json::from_str::<ServerFrame>(text.as_str()) {
                            Ok(frame) => set.handle(frame),
                            Err(e) => tracing::warn!("Unreadable realtime frame: {}", e),
                        },
                        WsMessage::Close(_) => return Ok(Exit::Dropped),
                        _ => {}
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(Exit::Dropped),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::protocol::ChangeKind;
    use axum::{
        extract::{ws::Message as AxumMessage, WebSocketUpgrade},
        response::Response,
        routing::get,
        Extension, Router,
    };
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn event(seq: u64) -> ChangeEvent {
        ChangeEvent {
            seq,
            table: Table::Messages,
            kind: ChangeKind::Insert,
            record: json!({ "seq": seq }),
            committed_at: Utc::now(),
        }
    }

    fn change(id: &str, seq: u64) -> ServerFrame {
        ServerFrame::Change {
            id: id.to_string(),
            event: event(seq),
        }
    }

    fn seqs(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Vec<u64> {
        let mut out = Vec::new();
        while let Ok(delivery) = rx.try_recv() {
            if let Delivery::Change(event) = delivery {
                out.push(event.seq);
            }
        }
        out
    }

    #[test]
    fn test_set_delivers_in_sequence_without_duplicates() {
        let mut set = SubscriptionSet::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        set.insert("a".to_string(), Table::Messages, None, tx);

        set.handle(ServerFrame::Subscribed { id: "a".to_string(), cursor: 4 });
        for seq in [3, 5, 5, 6, 4, 7] {
            set.handle(change("a", seq));
        }

        assert_eq!(seqs(&mut rx), vec![5, 6, 7]);
        assert_eq!(set.cursor("a"), Some(7));
    }

    #[test]
    fn test_heartbeat_ack_moves_quiet_subscription_forward() {
        let mut set = SubscriptionSet::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        set.insert("chat".to_string(), Table::Messages, Some("chat_id=eq.1".to_string()), tx);
        set.handle(ServerFrame::Subscribed { id: "chat".to_string(), cursor: 10 });

        set.handle(ServerFrame::HeartbeatAck {
            cursors: BTreeMap::from([("chat".to_string(), 2000), ("gone".to_string(), 5)]),
        });
        assert_eq!(set.cursor("chat"), Some(2000));
        assert!(seqs(&mut rx).is_empty());

        // never moves backwards
        set.handle(ServerFrame::HeartbeatAck {
            cursors: BTreeMap::from([("chat".to_string(), 1500)]),
        });
        assert_eq!(set.cursor("chat"), Some(2000));
        assert!(matches!(
            set.resume_frames().as_slice(),
            [ClientFrame::Subscribe { since: Some(2000), .. }]
        ));
    }

    #[test]
    fn test_resume_frames_carry_cursor() {
        let mut set = SubscriptionSet::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let frame = set.insert(
            "chat".to_string(),
            Table::Messages,
            Some("chat_id=eq.1".to_string()),
            tx,
        );
        assert!(matches!(frame, ClientFrame::Subscribe { since: None, .. }));

        set.handle(ServerFrame::Subscribed { id: "chat".to_string(), cursor: 10 });
        set.handle(change("chat", 12));

        assert_eq!(
            set.resume_frames(),
            vec![ClientFrame::Subscribe {
                id: "chat".to_string(),
                table: Table::Messages,
                filter: Some("chat_id=eq.1".to_string()),
                since: Some(12),
            }]
        );
    }

    #[test]
    fn test_resync_moves_cursor_and_notifies() {
        let mut set = SubscriptionSet::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        set.insert("jobs".to_string(), Table::Jobs, None, tx);

        set.handle(ServerFrame::ResyncRequired { id: "jobs".to_string(), cursor: 90 });
        assert_eq!(rx.try_recv().unwrap(), Delivery::ResyncRequired { cursor: 90 });
        assert_eq!(set.cursor("jobs"), Some(90));
    }

    #[test]
    fn test_rejected_subscription_is_retired() {
        let mut set = SubscriptionSet::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        set.insert("x".to_string(), Table::Messages, None, tx);

        set.handle(ServerFrame::error(Some("x".to_string()), "chat_id filter required"));
        assert!(matches!(rx.try_recv().unwrap(), Delivery::Rejected(_)));
        assert!(set.is_empty());
    }

    async fn scripted_socket(
        ws: WebSocketUpgrade,
        Extension(seen): Extension<mpsc::UnboundedSender<ClientFrame>>,
    ) -> Response {
        ws.on_upgrade(move |mut socket| async move {
            while let Some(Ok(message)) = socket.recv().await {
                let AxumMessage::Text(text) = message else { continue };
                let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else { continue };
                let ClientFrame::Subscribe { id, since, .. } = &frame else { continue };

                let _ = seen.send(frame.clone());
                let mut replies = vec![ServerFrame::Subscribed { id: id.clone(), cursor: 0 }];
                replies.push(change(id, 1));
                if since.is_some() {
                    replies.push(change(id, 2));
                }

                for reply in replies {
                    let text = serde_json::to_string(&reply).unwrap();
                    if socket.send(AxumMessage::Text(text)).await.is_err() {
                        return;
                    }
                }
                let _ = socket.send(AxumMessage::Close(None)).await;
                return;
            }
        })
    }

    #[tokio::test]
    async fn test_reconnect_resumes_from_last_seen_sequence() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let app = Router::new()
            .route("/realtime", get(scripted_socket))
            .layer(Extension(seen_tx));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let policy = ReconnectPolicy::new(Duration::from_millis(10), 2, Duration::from_millis(50));
        let (manager, _task) =
            SubscriptionManager::connect(&format!("ws://{}/realtime", addr), "token", policy);
        let mut handle = manager.subscribe(Table::Messages, Some("chat_id=eq.1".to_string()));

        let wait = Duration::from_secs(5);

        let first = tokio::time::timeout(wait, seen_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(first, ClientFrame::Subscribe { since: None, .. }));

        let delivered = tokio::time::timeout(wait, handle.next()).await.unwrap().unwrap();
        assert!(matches!(delivered, Delivery::Change(ref e) if e.seq == 1));

        let second = tokio::time::timeout(wait, seen_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(second, ClientFrame::Subscribe { since: Some(1), .. }));

        // seq 1 is replayed by the server again but only seq 2 comes through
        let delivered = tokio::time::timeout(wait, handle.next()).await.unwrap().unwrap();
        assert!(matches!(delivered, Delivery::Change(ref e) if e.seq == 2));
    }
}
