use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Extension, Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::{
    db::labourdb::LaborExt,
    middleware::JWTAuthMiddeware,
    models::usermodel::Profile,
    realtime::{
        filter::Filter,
        hub::HubError,
        protocol::{ChangeEvent, ClientFrame, ServerFrame, Table},
    },
    service::error::ServiceError,
    AppState,
};

pub const PING_INTERVAL: Duration = Duration::from_secs(15);

pub fn realtime_handler() -> Router {
    Router::new().route("/", get(realtime_socket))
}

pub async fn realtime_socket(
    ws: WebSocketUpgrade,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, app_state, auth.user))
}

#[derive(Debug, Clone)]
struct ActiveSubscription {
    table: Table,
    filter: Option<Filter>,
    cursor: u64,
}

/// Whether a row of `table` may be shown to `viewer` at all.
pub fn visible_to(viewer: &Profile, table: Table, record: &Value) -> bool {
    if viewer.is_admin() {
        return true;
    }

    let me = viewer.id.to_string();
    let field_is_me = |column: &str| record.get(column).and_then(Value::as_str) == Some(me.as_str());

    match table {
        Table::Jobs => {
            record.get("status").and_then(Value::as_str) == Some("open")
                || field_is_me("client_id")
                || field_is_me("worker_id")
        }
        // Checked at subscribe time against the chat's participants.
        Table::Messages => true,
        Table::Profiles | Table::WorkerProfiles | Table::DriverProfiles => true,
    }
}

/// What an outsider still learns about a job it cannot see: enough to drop
/// it from a board once it leaves `open`.
pub fn redact(table: Table, record: &Value) -> Option<Value> {
    if table != Table::Jobs {
        return None;
    }
    record.get("id")?;

    let kept = ["id", "status", "version"]
        .iter()
        .filter_map(|key| record.get(*key).map(|value| (key.to_string(), value.clone())))
        .collect();
    Some(Value::Object(kept))
}

fn deliver(
    viewer: &Profile,
    id: &str,
    sub: &mut ActiveSubscription,
    event: &ChangeEvent,
) -> Option<ServerFrame> {
    if event.seq <= sub.cursor {
        return None;
    }
    sub.cursor = event.seq;

    let matches = sub.table == event.table
        && sub.filter.as_ref().map_or(true, |filter| filter.matches(&event.record));

    if !matches {
        return None;
    }

    let event = if visible_to(viewer, event.table, &event.record) {
        event.clone()
    } else {
        ChangeEvent {
            record: redact(event.table, &event.record)?,
            ..event.clone()
        }
    };

    Some(ServerFrame::Change {
        id: id.to_string(),
        event,
    })
}

/// Per-socket subscription book-keeping; independent of the socket itself.
#[derive(Debug)]
pub struct Session {
    viewer: Profile,
    subscriptions: BTreeMap<String, ActiveSubscription>,
}

impl Session {
    pub fn new(viewer: Profile) -> Self {
        Self {
            viewer,
            subscriptions: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn add(&mut self, id: String, table: Table, filter: Option<Filter>, cursor: u64) {
        self.subscriptions
            .insert(id, ActiveSubscription { table, filter, cursor });
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.subscriptions.remove(id).is_some()
    }

    /// Last processed sequence number per subscription.
    pub fn cursors(&self) -> BTreeMap<String, u64> {
        self.subscriptions
            .iter()
            .map(|(id, sub)| (id.clone(), sub.cursor))
            .collect()
    }

    /// Frames for one hub event. Every subscription's cursor moves past it,
    /// matched or not, so a later replay never repeats it.
    pub fn fan_out(&mut self, event: &ChangeEvent) -> Vec<ServerFrame> {
        let viewer = &self.viewer;
        self.subscriptions
            .iter_mut()
            .filter_map(|(id, sub)| deliver(viewer, id, sub, event))
            .collect()
    }

    fn fan_out_one(&mut self, id: &str, events: &[ChangeEvent]) -> Vec<ServerFrame> {
        let viewer = &self.viewer;
        let Some(sub) = self.subscriptions.get_mut(id) else {
            return Vec::new();
        };

        events
            .iter()
            .filter_map(|event| deliver(viewer, id, sub, event))
            .collect()
    }

    /// After the live channel lagged, catch every subscription up from the backlog.
    fn catch_up(&mut self, app_state: &AppState) -> Vec<ServerFrame> {
        let ids: Vec<(String, u64)> = self
            .subscriptions
            .iter()
            .map(|(id, sub)| (id.clone(), sub.cursor))
            .collect();

        let mut frames = Vec::new();
        for (id, cursor) in ids {
            match app_state.hub.replay_since(cursor) {
                Ok(events) => frames.extend(self.fan_out_one(&id, &events)),
                Err(HubError::ResyncRequired { head }) => {
                    if let Some(sub) = self.subscriptions.get_mut(&id) {
                        sub.cursor = head;
                    }
                    frames.push(ServerFrame::ResyncRequired { id, cursor: head });
                }
            }
        }
        frames
    }
}

/// Rejects subscriptions that could leak rows the viewer has no business seeing.
async fn authorize(
    app_state: &AppState,
    viewer: &Profile,
    table: Table,
    filter: Option<&Filter>,
) -> Result<(), String> {
    if viewer.is_admin() {
        return Ok(());
    }

    match table {
        Table::Jobs => Ok(()),
        Table::Messages => {
            let filter = filter
                .filter(|f| f.column == "chat_id")
                .ok_or_else(|| "Message subscriptions need a chat_id filter".to_string())?;
            let chat_id = Uuid::parse_str(&filter.value).map_err(|_| "chat_id must be a uuid".to_string())?;

            match app_state.chat_service.member_chat(viewer, chat_id, false).await {
                Ok(_) => Ok(()),
                Err(ServiceError::Forbidden(_) | ServiceError::NotFound(_)) => {
                    Err("You are not part of this chat".to_string())
                }
                Err(e) => {
                    tracing::error!("Chat lookup failed for subscription: {}", e);
                    Err("Could not verify chat membership".to_string())
                }
            }
        }
        Table::Profiles | Table::WorkerProfiles | Table::DriverProfiles => {
            let owner_column = table.owner_column().unwrap_or("id");
            let filter = filter
                .filter(|f| f.column == owner_column)
                .ok_or_else(|| format!("{} subscriptions need a {} filter", table.as_str(), owner_column))?;
            let target = Uuid::parse_str(&filter.value).map_err(|_| format!("{} must be a uuid", owner_column))?;

            if target == viewer.id {
                return Ok(());
            }

            // A client may follow the provider working one of their live jobs.
            if table == Table::Profiles {
                return Err("You can only follow your own profile".to_string());
            }
            match app_state.db_client.get_jobs_for_client(viewer.id).await {
                Ok(jobs) if jobs
                    .iter()
                    .any(|job| job.worker_id == Some(target) && !job.status.is_terminal()) =>
                {
                    Ok(())
                }
                Ok(_) => Err("You can only follow providers on your active jobs".to_string()),
                Err(e) => {
                    tracing::error!("Job lookup failed for subscription: {}", e);
                    Err("Could not verify job membership".to_string())
                }
            }
        }
    }
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            tracing::error!("Could not encode realtime frame: {}", e);
            true
        }
    }
}

async fn send_all(sender: &mut SplitSink<WebSocket, Message>, frames: &[ServerFrame]) -> bool {
    for frame in frames {
        if !send_frame(sender, frame).await {
            return false;
        }
    }
    true
}

async fn handle_frame(
    app_state: &AppState,
    session: &mut Session,
    frame: ClientFrame,
) -> Vec<ServerFrame> {
    match frame {
        ClientFrame::Heartbeat => vec![ServerFrame::HeartbeatAck {
            cursors: session.cursors(),
        }],
        ClientFrame::Unsubscribe { id } => {
            session.remove(&id);
            Vec::new()
        }
        ClientFrame::Subscribe { id, table, filter, since } => {
            let filter = match filter.as_deref().map(Filter::parse).transpose() {
                Ok(filter) => filter,
                Err(e) => return vec![ServerFrame::error(Some(id), e.to_string())],
            };

            if let Err(message) = authorize(app_state, &session.viewer, table, filter.as_ref()).await {
                tracing::debug!("Rejected {} subscription for {}: {}", table.as_str(), session.viewer.id, message);
                return vec![ServerFrame::error(Some(id), message)];
            }

            match since {
                None => {
                    let head = app_state.hub.head();
                    session.add(id.clone(), table, filter, head);
                    vec![ServerFrame::Subscribed { id, cursor: head }]
                }
                Some(cursor) => match app_state.hub.replay_since(cursor) {
                    Ok(events) => {
                        session.add(id.clone(), table, filter, cursor);
                        let mut frames = vec![ServerFrame::Subscribed { id: id.clone(), cursor }];
                        frames.extend(session.fan_out_one(&id, &events));
                        frames
                    }
                    Err(HubError::ResyncRequired { head }) => {
                        session.add(id.clone(), table, filter, head);
                        vec![
                            ServerFrame::Subscribed { id: id.clone(), cursor: head },
                            ServerFrame::ResyncRequired { id, cursor: head },
                        ]
                    }
                },
            }
        }
    }
}

async fn serve_socket(socket: WebSocket, app_state: Arc<AppState>, viewer: Profile) {
    let (mut sender, mut receiver) = socket.split();
    let viewer_id = viewer.id;
    let mut session = Session::new(viewer);

    // One live receiver per connection, opened before any subscription.
    let mut live = match app_state.hub.open(None) {
        Ok(opened) => opened.receiver,
        Err(e) => {
            tracing::error!("Could not open change feed: {}", e);
            return;
        }
    };

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    tracing::debug!("Realtime connection opened for {}", viewer_id);

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!("Realtime socket error for {}: {}", viewer_id, e);
                        break;
                    }
                };

                let frames = match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => handle_frame(&app_state, &mut session, frame).await,
                    Err(e) => vec![ServerFrame::error(None, format!("Malformed frame: {}", e))],
                };
                if !send_all(&mut sender, &frames).await {
                    break;
                }
            }
            event = live.recv() => {
                let frames = match event {
                    Ok(event) => session.fan_out(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Realtime connection for {} lagged by {} events", viewer_id, skipped);
                        session.catch_up(&app_state)
                    }
                    Err(RecvError::Closed) => break,
                };
                if !send_all(&mut sender, &frames).await {
                    break;
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!(
        "Realtime connection closed for {} with {} subscription(s)",
        viewer_id,
        session.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        db::db::DBClient,
        models::{
            labourmodel::{Job, JobStatus},
            usermodel::{test_profile, UserRole},
        },
        realtime::{feed::JobBoard, protocol::ChangeKind},
    };
    use chrono::Utc;
    use serde_json::json;
    use sqlx::{postgres::PgPoolOptions, types::BigDecimal};
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    fn event(seq: u64, table: Table, record: Value) -> ChangeEvent {
        ChangeEvent {
            seq,
            table,
            kind: ChangeKind::Update,
            record,
            committed_at: Utc::now(),
        }
    }

    #[test]
    fn test_jobs_visibility() {
        let worker = test_profile(UserRole::Worker);
        let open = json!({ "status": "open", "client_id": Uuid::new_v4() });
        let mine = json!({ "status": "started", "worker_id": worker.id });
        let other = json!({ "status": "started", "worker_id": Uuid::new_v4() });

        assert!(visible_to(&worker, Table::Jobs, &open));
        assert!(visible_to(&worker, Table::Jobs, &mine));
        assert!(!visible_to(&worker, Table::Jobs, &other));
        assert!(visible_to(&test_profile(UserRole::Admin), Table::Jobs, &other));
    }

    #[test]
    fn test_fan_out_filters_and_advances_cursor() {
        let mut session = Session::new(test_profile(UserRole::Admin));
        session.add(
            "chat".to_string(),
            Table::Messages,
            Some(Filter::parse("chat_id=eq.c1").unwrap()),
            0,
        );
        session.add("jobs".to_string(), Table::Jobs, None, 0);

        let frames = session.fan_out(&event(1, Table::Messages, json!({ "chat_id": "c1" })));
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], ServerFrame::Change { id, .. } if id == "chat"));

        assert!(session.fan_out(&event(2, Table::Messages, json!({ "chat_id": "c2" }))).is_empty());
        assert_eq!(session.fan_out(&event(3, Table::Jobs, json!({ "status": "open" }))).len(), 1);

        // Already past seq 3 on both subscriptions.
        assert!(session.fan_out(&event(3, Table::Jobs, json!({ "status": "open" }))).is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_ack_reports_filtered_progress() {
        let state = app_state();
        let mut session = Session::new(test_profile(UserRole::Admin));
        session.add(
            "chat".to_string(),
            Table::Messages,
            Some(Filter::parse("chat_id=eq.c1").unwrap()),
            0,
        );

        for seq in 1..=5 {
            assert!(session
                .fan_out(&event(seq, Table::Messages, json!({ "chat_id": "c2" })))
                .is_empty());
        }

        let frames = handle_frame(&state, &mut session, ClientFrame::Heartbeat).await;
        assert_eq!(
            frames,
            vec![ServerFrame::HeartbeatAck {
                cursors: BTreeMap::from([("chat".to_string(), 5)]),
            }]
        );
    }

    fn open_job(client_id: Uuid) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            client_id,
            worker_id: None,
            skill: "plumber".to_string(),
            description: "Kitchen sink leaks".to_string(),
            address: None,
            lat: 6.5,
            lng: 3.4,
            price: BigDecimal::from(5000),
            status: JobStatus::Open,
            schedule: None,
            photo_urls: vec![],
            assigned_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_taken_job_leaves_other_workers_boards() {
        let mut session = Session::new(test_profile(UserRole::Worker));
        session.add("jobs".to_string(), Table::Jobs, None, 0);
        let mut board = JobBoard::new();

        let mut job = open_job(Uuid::new_v4());
        let posted = event(1, Table::Jobs, serde_json::to_value(&job).unwrap());

        job.status = JobStatus::Accepted;
        job.worker_id = Some(Uuid::new_v4());
        job.version = 2;
        let taken = event(2, Table::Jobs, serde_json::to_value(&job).unwrap());

        for change in [posted, taken] {
            for frame in session.fan_out(&change) {
                if let ServerFrame::Change { event, .. } = frame {
                    board.apply_event(&event);
                }
            }
        }

        assert_eq!(board.open_jobs().len(), 0);
    }

    #[test]
    fn test_outsiders_get_redacted_job_rows() {
        let mut session = Session::new(test_profile(UserRole::Worker));
        session.add("jobs".to_string(), Table::Jobs, None, 0);

        let mut job = open_job(Uuid::new_v4());
        job.status = JobStatus::Started;
        job.worker_id = Some(Uuid::new_v4());
        let frames = session.fan_out(&event(1, Table::Jobs, serde_json::to_value(&job).unwrap()));

        match frames.as_slice() {
            [ServerFrame::Change { event, .. }] => {
                assert_eq!(event.record, json!({ "id": job.id, "status": "started", "version": 1 }));
            }
            other => panic!("unexpected frames {:?}", other),
        }

        // Non-job tables are never redacted.
        assert!(redact(Table::Messages, &json!({ "id": "m1" })).is_none());
    }

    fn app_state() -> Arc<AppState> {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/fixlink")
            .unwrap();
        Arc::new(AppState::new(DBClient::new(pool), Config::for_tests()))
    }

    #[tokio::test]
    async fn test_subscription_needs_authorization_filters() {
        let state = app_state();
        let mut session = Session::new(test_profile(UserRole::Client));

        let frames = handle_frame(
            &state,
            &mut session,
            ClientFrame::Subscribe {
                id: "chat".to_string(),
                table: Table::Messages,
                filter: None,
                since: None,
            },
        )
        .await;
        assert!(matches!(&frames[0], ServerFrame::Error { id: Some(id), .. } if id == "chat"));

        let frames = handle_frame(
            &state,
            &mut session,
            ClientFrame::Subscribe {
                id: "someone".to_string(),
                table: Table::Profiles,
                filter: Some(format!("id=eq.{}", Uuid::new_v4())),
                since: None,
            },
        )
        .await;
        assert!(matches!(&frames[0], ServerFrame::Error { .. }));
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_resume_replays_backlog_and_resyncs_stale_cursors() {
        let state = app_state();
        for n in 0..3 {
            state.hub.publish(Table::Jobs, ChangeKind::Insert, json!({ "status": "open", "n": n }));
        }
        let mut session = Session::new(test_profile(UserRole::Worker));

        let frames = handle_frame(
            &state,
            &mut session,
            ClientFrame::Subscribe {
                id: "jobs".to_string(),
                table: Table::Jobs,
                filter: None,
                since: Some(1),
            },
        )
        .await;
        let seqs: Vec<u64> = frames
            .iter()
            .filter_map(|frame| match frame {
                ServerFrame::Change { event, .. } => Some(event.seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![2, 3]);

        let frames = handle_frame(
            &state,
            &mut session,
            ClientFrame::Subscribe {
                id: "future".to_string(),
                table: Table::Jobs,
                filter: None,
                since: Some(99),
            },
        )
        .await;
        assert!(frames
            .iter()
            .any(|frame| matches!(frame, ServerFrame::ResyncRequired { cursor: 3, .. })));
    }

    #[tokio::test]
    async fn test_socket_delivers_live_changes() {
        let state = app_state();
        let viewer = test_profile(UserRole::Worker);

        let app = realtime_handler()
            .layer(Extension(JWTAuthMiddeware { user: viewer }))
            .layer(Extension(state.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (mut socket, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();
        let subscribe = serde_json::to_string(&ClientFrame::Subscribe {
            id: "jobs".to_string(),
            table: Table::Jobs,
            filter: None,
            since: None,
        })
        .unwrap();
        socket.send(WsMessage::Text(subscribe.into())).await.unwrap();

        let wait = Duration::from_secs(5);

        let first = tokio::time::timeout(wait, socket.next()).await.unwrap().unwrap().unwrap();
        let WsMessage::Text(text) = first else { panic!("expected text frame") };
        let frame: ServerFrame = serde_json::from_str(text.as_str()).unwrap();
        assert!(matches!(frame, ServerFrame::Subscribed { .. }));

        state.hub.publish(Table::Jobs, ChangeKind::Insert, json!({ "status": "open" }));

        let second = tokio::time::timeout(wait, socket.next()).await.unwrap().unwrap().unwrap();
        let WsMessage::Text(text) = second else { panic!("expected text frame") };
        let frame: ServerFrame = serde_json::from_str(text.as_str()).unwrap();
        assert!(matches!(frame, ServerFrame::Change { ref id, .. } if id == "jobs"));
    }
}
