//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! Each connection drives one `Planner`. Client messages and the results of
//! spawned work are handled one at a time by the same loop.

use crate::adapters::shortener::shorten_or_long;
use crate::web::{
    middleware::optional_identity,
    protocol::{ClientMessage, ServerMessage},
    state::{AppState, ConnectionState, PendingImport, TaskEvent},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use base64::Engine;
use chrono::Utc;
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use lesson_hub_core::error::CoreResult;
use lesson_hub_core::session::LoadRequests;
use lesson_hub_core::sync::{LoadOutcome, PendingWrite};
use lesson_hub_core::templates::SlotPosition;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const IMPORTED_PROFILE_NAME: &str = "Imported Schedule";
const IMPORTED_PROFILE_SUBTITLE: &str = "AI Generated";

#[derive(Deserialize, Debug, Default)]
pub struct ShareParams {
    pub share: Option<String>,
}

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Query(params): Query<ShareParams>,
    headers: HeaderMap,
) -> Response {
    let viewer = optional_identity(&app_state, &headers).await;
    let shared_target = params.share.as_deref().and_then(|raw| match Uuid::parse_str(raw) {
        Ok(target) => Some(target),
        Err(_) => {
            warn!("Ignoring malformed share parameter: {}", raw);
            None
        }
    });
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, viewer, shared_target))
}

async fn handle_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    viewer: Option<Uuid>,
    shared_target: Option<Uuid>,
) {
    info!("New WebSocket connection (viewer: {:?}, shared: {:?})", viewer, shared_target);

    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<TaskEvent>();
    let mut connection = ConnectionState::new(app_state, shared_target, events_tx);

    // --- 1. Resolve the scope and start the first loads ---
    if !send_all(&mut sender, connection.start(viewer)).await {
        error!("Failed to send the initial planner state.");
        return;
    }

    // --- 2. Main Loop ---
    loop {
        let outgoing = tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => connection.handle_text(&text),
                Some(Ok(Message::Close(_))) => {
                    info!("Client sent close message.");
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
                None => {
                    info!("Client disconnected.");
                    break;
                }
            },
            Some(event) = events_rx.recv() => connection.handle_event(event),
        };
        if !send_all(&mut sender, outgoing).await {
            error!("Failed to send to client; closing connection.");
            break;
        }
    }

    let unsynced = connection.planner.unsynced();
    if !unsynced.is_empty() {
        warn!("Connection closed with {} unsynced writes.", unsynced.len());
    }
    info!("WebSocket connection closed.");
}

async fn send_all(sender: &mut SplitSink<WebSocket, Message>, messages: Vec<ServerMessage>) -> bool {
    for message in messages {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize server message: {}", e);
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            return false;
        }
    }
    true
}

//=========================================================================================
// Connection Logic
//=========================================================================================

impl ConnectionState {
    /// Completes scope resolution for the connecting identity.
    pub fn start(&mut self, viewer: Option<Uuid>) -> Vec<ServerMessage> {
        let requests = self.planner.resolve(viewer);
        self.spawn_loads(requests);
        self.snapshot()
    }

    /// Scope, profiles and agenda as currently held.
    pub fn snapshot(&self) -> Vec<ServerMessage> {
        vec![self.scope_message(), self.profiles_message(), self.agenda_message()]
    }

    fn scope_message(&self) -> ServerMessage {
        let scope = self.planner.scope();
        ServerMessage::Scope {
            scope: self.planner.scope_state(),
            viewer: scope.viewer(),
            target: scope.target(),
            is_owner: scope.is_owner(),
            ui: self.planner.ui().clone(),
        }
    }

    fn profiles_message(&self) -> ServerMessage {
        ServerMessage::Profiles {
            profiles: self.planner.profiles().to_vec(),
            active_profile_id: self.planner.active_profile().id.clone(),
        }
    }

    fn agenda_message(&self) -> ServerMessage {
        ServerMessage::Agenda {
            agenda: self.planner.agenda(),
        }
    }

    fn error(message: impl Into<String>) -> Vec<ServerMessage> {
        vec![ServerMessage::Error {
            message: message.into(),
        }]
    }

    /// Queues an accepted write; a refused one is dropped silently.
    fn submit(&mut self, write: Option<PendingWrite>) {
        match write {
            Some(write) => {
                if self.writes.send(write).is_err() {
                    error!("Writer task is gone; write not dispatched.");
                }
            }
            None => debug!("Mutation refused: viewer is not the owner."),
        }
    }

    /// `submit` plus the refreshed state, or the error for a rejected request.
    fn apply(&mut self, result: CoreResult<Option<PendingWrite>>) -> Vec<ServerMessage> {
        match result {
            Ok(write) => {
                self.submit(write);
                self.snapshot()
            }
            Err(e) => {
                warn!("Rejected planner request: {}", e);
                Self::error(e.to_string())
            }
        }
    }

    pub fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_client_message(message),
            Err(e) => {
                warn!("Failed to deserialize client message: {}", e);
                Self::error(format!("Invalid message: {}", e))
            }
        }
    }

    pub fn handle_client_message(&mut self, message: ClientMessage) -> Vec<ServerMessage> {
        match message {
            ClientMessage::SelectDate { date } => {
                let entries = self.planner.select_date(date);
                self.spawn_loads(LoadRequests {
                    profiles: None,
                    entries,
                });
                self.snapshot()
            }
            ClientMessage::SwitchProfile { profile_id } => {
                if !self.planner.switch_profile(&profile_id) {
                    return Self::error(format!("Unknown profile: {}", profile_id));
                }
                self.snapshot()
            }
            ClientMessage::ToggleAdmin => {
                self.planner.toggle_admin();
                self.snapshot()
            }
            ClientMessage::ExpandSlot { slot_id } => {
                self.planner.expand(slot_id);
                self.snapshot()
            }
            ClientMessage::ClosePanel => {
                self.planner.close_panel();
                self.snapshot()
            }

            ClientMessage::CreateProfile { name, subtitle } => {
                let result = self.planner.create_profile(&name, &subtitle, Utc::now());
                self.apply(result)
            }
            ClientMessage::UpdateProfileInfo { profile_id, name, subtitle } => {
                let result = self.planner.update_profile_info(&profile_id, &name, &subtitle);
                self.apply(result)
            }
            ClientMessage::DeleteProfile { profile_id } => {
                let result = self.planner.delete_profile(&profile_id);
                self.apply(result)
            }
            ClientMessage::UpsertSlot { profile_id, day, slot, index } => {
                let position = index.map_or(SlotPosition::Append, SlotPosition::At);
                let result = self.planner.upsert_slot(&profile_id, day, slot, position);
                self.apply(result)
            }
            ClientMessage::DeleteSlot { profile_id, day, index } => {
                let result = self.planner.delete_slot(&profile_id, day, index);
                self.apply(result)
            }
            ClientMessage::ImportProfile { media_type, data, name, subtitle } => {
                self.start_import(media_type, &data, name, subtitle)
            }

            ClientMessage::PatchEntry { slot_id, patch } => {
                let write = self.planner.patch_entry(&slot_id, &patch);
                self.apply(Ok(write))
            }
            ClientMessage::ClearEntry { slot_id } => {
                let write = self.planner.clear_entry(&slot_id);
                self.apply(Ok(write))
            }
            ClientMessage::AppendImage { slot_id, uri } => {
                let write = self.planner.append_image(&slot_id, &uri);
                self.apply(Ok(write))
            }
            ClientMessage::AddLink { slot_id } => {
                let result = self.planner.add_link(&slot_id);
                self.apply(result)
            }
            ClientMessage::RemoveLink { slot_id, index } => {
                let result = self.planner.remove_link(&slot_id, index);
                self.apply(result)
            }
            ClientMessage::SetLinkTitle { slot_id, index, title } => {
                let result = self.planner.set_link_title(&slot_id, index, &title);
                self.apply(result)
            }
            ClientMessage::SetLinkUrl { slot_id, index, url } => {
                let result = self.planner.set_link_url(&slot_id, index, &url);
                self.apply(result)
            }
            ClientMessage::SuggestLinkTitle { slot_id, index } => self.start_title_suggestion(slot_id, index),

            ClientMessage::RequestShareLink => {
                let long_url = match self.planner.share_url(&self.app.config.public_base_url) {
                    Ok(url) => url,
                    Err(e) => return Self::error(e.to_string()),
                };
                let shortener = self.app.shortener.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    let url = shorten_or_long(shortener.as_deref(), &long_url).await;
                    let _ = events.send(TaskEvent::ShareLinkReady(url));
                });
                Vec::new()
            }
            ClientMessage::SessionChanged { token } => {
                let sessions = self.app.sessions.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    let viewer = match token {
                        Some(token) => sessions.resolve_session(&token).await.ok(),
                        None => None,
                    };
                    let _ = events.send(TaskEvent::IdentityResolved(viewer));
                });
                Vec::new()
            }
            ClientMessage::RetryUnsynced => {
                for write in self.planner.retry_unsynced() {
                    self.submit(Some(write));
                }
                Vec::new()
            }
        }
    }

    fn start_import(
        &mut self,
        media_type: String,
        data: &str,
        name: Option<String>,
        subtitle: Option<String>,
    ) -> Vec<ServerMessage> {
        if !self.planner.begin_import() {
            debug!("Import refused: not the owner or already importing.");
            return self.snapshot();
        }
        let document = match base64::engine::general_purpose::STANDARD.decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.planner.end_import();
                warn!("Import payload is not valid base64: {}", e);
                return Self::error("The uploaded file could not be read.");
            }
        };
        self.pending_import = Some(PendingImport {
            name: name.unwrap_or_else(|| IMPORTED_PROFILE_NAME.to_string()),
            subtitle: subtitle.unwrap_or_else(|| IMPORTED_PROFILE_SUBTITLE.to_string()),
        });

        let importer = self.app.importer.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = importer.parse_schedule(&document, &media_type).await;
            let _ = events.send(TaskEvent::ImportFinished(result));
        });

        let mut messages = vec![ServerMessage::ImportStarted];
        messages.push(self.scope_message());
        messages
    }

    fn start_title_suggestion(&mut self, slot_id: String, index: usize) -> Vec<ServerMessage> {
        if !self.planner.scope().is_owner() {
            return Vec::new();
        }
        let Some(tag) = self.planner.link_tag(&slot_id, index) else {
            return Self::error(format!("Link {} of slot {} has no URL", index, slot_id));
        };
        let titles = self.app.titles.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = titles.suggest_title(&tag.url).await;
            let _ = events.send(TaskEvent::TitleSuggested { tag, result });
        });
        Vec::new()
    }

    pub fn handle_event(&mut self, event: TaskEvent) -> Vec<ServerMessage> {
        match event {
            TaskEvent::ProfilesLoaded(ticket, result) => {
                match self.planner.finish_profile_load(ticket, result) {
                    LoadOutcome::Stale => Vec::new(),
                    _ => vec![self.profiles_message(), self.agenda_message()],
                }
            }
            TaskEvent::EntriesLoaded(ticket, result) => {
                match self.planner.finish_entry_load(ticket, result) {
                    LoadOutcome::Stale => Vec::new(),
                    _ => vec![self.agenda_message()],
                }
            }
            TaskEvent::WriteSettled(ticket, result) => {
                let status = self.planner.settle(&ticket, &result);
                vec![ServerMessage::SyncStatus {
                    status,
                    unsynced: self.planner.unsynced(),
                }]
            }
            TaskEvent::ImportFinished(result) => {
                self.planner.end_import();
                let pending = self.pending_import.take();
                match result {
                    Ok(schedule) => {
                        let PendingImport { name, subtitle } = pending.unwrap_or(PendingImport {
                            name: IMPORTED_PROFILE_NAME.to_string(),
                            subtitle: IMPORTED_PROFILE_SUBTITLE.to_string(),
                        });
                        let result = self.planner.import_profile(&name, &subtitle, schedule, Utc::now());
                        self.apply(result)
                    }
                    Err(e) => {
                        warn!("Import failed: {}", e);
                        let mut messages = Self::error(e.to_string());
                        messages.push(self.scope_message());
                        messages
                    }
                }
            }
            TaskEvent::TitleSuggested { tag, result } => match result {
                Ok(title) => match self.planner.apply_title_suggestion(&tag, &title) {
                    Ok(None) => Vec::new(),
                    result => self.apply(result),
                },
                Err(e) => {
                    warn!("Title suggestion failed; keeping the current title: {}", e);
                    Vec::new()
                }
            },
            TaskEvent::ShareLinkReady(url) => vec![ServerMessage::ShareLink { url }],
            TaskEvent::IdentityResolved(viewer) => {
                let requests = self.planner.identity_changed(viewer);
                self.spawn_loads(requests);
                self.snapshot()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesson_hub_core::domain::{Schedule, ScheduleSlot};
    use lesson_hub_core::ports::PortError;
    use lesson_hub_core::testing::{MemoryGateway, ScriptedImporter};
    use lesson_hub_core::UiState;
    use std::time::Duration;

    fn app(gateway: Arc<MemoryGateway>, importer: ScriptedImporter) -> Arc<AppState> {
        AppState::for_tests(gateway, importer)
    }

    /// Feeds spawned-task results back until nothing arrives for a while.
    async fn pump(
        connection: &mut ConnectionState,
        events: &mut mpsc::UnboundedReceiver<TaskEvent>,
    ) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
            messages.extend(connection.handle_event(event));
        }
        messages
    }

    fn connect(app: Arc<AppState>, shared: Option<Uuid>) -> (ConnectionState, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionState::new(app, shared, tx), rx)
    }

    #[tokio::test]
    async fn test_owner_edit_is_written_through_the_writer_task() {
        let gateway = Arc::new(MemoryGateway::new());
        let owner = Uuid::new_v4();
        let (mut connection, mut events) = connect(app(gateway.clone(), ScriptedImporter(Ok(Schedule::new()))), None);
        connection.start(Some(owner));
        pump(&mut connection, &mut events).await;

        let slot = ScheduleSlot::lesson("mon_1", "08:00-09:00", "Maths", "A1");
        let reply = connection.handle_client_message(ClientMessage::UpsertSlot {
            profile_id: "main".into(),
            day: 1,
            slot,
            index: None,
        });
        assert!(matches!(reply[0], ServerMessage::Scope { is_owner: true, .. }));

        let settled = pump(&mut connection, &mut events).await;
        assert!(settled
            .iter()
            .any(|m| matches!(m, ServerMessage::SyncStatus { unsynced, .. } if unsynced.is_empty())));
        let stored = gateway.stored_profile(owner, "main").unwrap();
        assert_eq!(stored.schedule.day(1).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_reports_unsynced_and_retry_clears_it() {
        let gateway = Arc::new(MemoryGateway::new());
        let owner = Uuid::new_v4();
        let (mut connection, mut events) = connect(app(gateway.clone(), ScriptedImporter(Ok(Schedule::new()))), None);
        connection.start(Some(owner));
        pump(&mut connection, &mut events).await;

        gateway.fail_next_writes(1);
        connection.handle_text(r#"{"type":"patch_entry","slot_id":"mon_1","patch":{"notes":"quiz"}}"#);
        let settled = pump(&mut connection, &mut events).await;
        assert!(settled
            .iter()
            .any(|m| matches!(m, ServerMessage::SyncStatus { unsynced, .. } if unsynced.len() == 1)));

        connection.handle_text(r#"{"type":"retry_unsynced"}"#);
        pump(&mut connection, &mut events).await;
        assert!(connection.planner.unsynced().is_empty());
        let today = Utc::now().date_naive();
        assert!(gateway.stored_entry(owner, today, "mon_1").is_some());
    }

    #[tokio::test]
    async fn test_import_creates_profile_and_failure_is_reported() {
        let owner = Uuid::new_v4();
        let parsed = Schedule::new().with_day(2, vec![ScheduleSlot::lesson("tue_1", "10:00-11:00", "Art", "")]);
        let gateway = Arc::new(MemoryGateway::new());
        let (mut connection, mut events) = connect(app(gateway.clone(), ScriptedImporter(Ok(parsed))), None);
        connection.start(Some(owner));
        pump(&mut connection, &mut events).await;

        let started = connection.handle_text(r#"{"type":"import_profile","media_type":"image/png","data":"iVBORw0KGgo="}"#);
        assert!(matches!(started[0], ServerMessage::ImportStarted));
        assert_eq!(connection.planner.ui(), &UiState::Importing);
        pump(&mut connection, &mut events).await;
        assert_eq!(connection.planner.active_profile().name, "Imported Schedule");
        assert!(connection.planner.active_profile().id.starts_with("imported_"));

        let failing = ScriptedImporter(Err(PortError::Rejected("Failed to parse schedule. Please try again.".into())));
        let (mut connection, mut events) = connect(app(Arc::new(MemoryGateway::new()), failing), None);
        connection.start(Some(owner));
        pump(&mut connection, &mut events).await;
        connection.handle_text(r#"{"type":"import_profile","media_type":"image/png","data":"iVBORw0KGgo="}"#);
        let replies = pump(&mut connection, &mut events).await;
        assert!(replies
            .iter()
            .any(|m| matches!(m, ServerMessage::Error { message } if message.starts_with("Failed to parse"))));
        assert_eq!(connection.planner.profiles().len(), 1);
    }

    #[tokio::test]
    async fn test_viewer_cannot_write_and_gets_share_link() {
        let gateway = Arc::new(MemoryGateway::new());
        let owner = Uuid::new_v4();
        let (mut connection, mut events) = connect(app(gateway.clone(), ScriptedImporter(Ok(Schedule::new()))), Some(owner));
        let first = connection.start(None);
        assert!(matches!(first[0], ServerMessage::Scope { is_owner: false, target: Some(t), .. } if t == owner));
        pump(&mut connection, &mut events).await;

        connection.handle_text(r#"{"type":"delete_profile","profile_id":"main"}"#);
        connection.handle_text(r#"{"type":"import_profile","media_type":"image/png","data":"AA=="}"#);
        pump(&mut connection, &mut events).await;
        assert!(gateway.write_log().is_empty());

        connection.handle_text(r#"{"type":"request_share_link"}"#);
        let replies = pump(&mut connection, &mut events).await;
        let expected = format!("https://hub.example/?share={}", owner);
        assert!(replies
            .iter()
            .any(|m| matches!(m, ServerMessage::ShareLink { url } if *url == expected)));
    }

    #[tokio::test]
    async fn test_sign_in_upgrades_scope() {
        let gateway = Arc::new(MemoryGateway::new());
        let owner = Uuid::new_v4();
        gateway.add_session("tok", owner);
        let (mut connection, mut events) = connect(app(gateway, ScriptedImporter(Ok(Schedule::new()))), None);
        connection.start(None);
        assert!(!connection.planner.scope().is_owner());

        connection.handle_text(r#"{"type":"session_changed","token":"tok"}"#);
        pump(&mut connection, &mut events).await;
        assert!(connection.planner.scope().is_owner());
    }

    #[tokio::test]
    async fn test_title_suggestion_is_dropped_after_date_change() {
        let gateway = Arc::new(MemoryGateway::new());
        let owner = Uuid::new_v4();
        let (mut connection, mut events) = connect(app(gateway.clone(), ScriptedImporter(Ok(Schedule::new()))), None);
        connection.start(Some(owner));
        pump(&mut connection, &mut events).await;

        let first = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let second = chrono::NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        connection.handle_text(r#"{"type":"select_date","date":"2026-03-02"}"#);
        pump(&mut connection, &mut events).await;
        connection.handle_text(r#"{"type":"add_link","slot_id":"mon_1"}"#);
        connection.handle_text(r#"{"type":"set_link_url","slot_id":"mon_1","index":0,"url":"https://docs.google.com/x"}"#);
        connection.handle_text(r#"{"type":"suggest_link_title","slot_id":"mon_1","index":0}"#);

        connection.handle_text(r#"{"type":"select_date","date":"2026-03-09"}"#);
        connection.handle_text(r#"{"type":"add_link","slot_id":"mon_1"}"#);
        connection.handle_text(r#"{"type":"set_link_title","slot_id":"mon_1","index":0,"title":"My worksheet"}"#);
        pump(&mut connection, &mut events).await;

        let later = gateway.stored_entry(owner, second, "mon_1").unwrap();
        let later_links = lesson_hub_core::links::decode(later.link.as_deref());
        assert_eq!(later_links[0].title, "My worksheet");
        let earlier = gateway.stored_entry(owner, first, "mon_1").unwrap();
        let earlier_links = lesson_hub_core::links::decode(earlier.link.as_deref());
        assert_eq!(earlier_links[0].url, "https://docs.google.com/x");
        assert_ne!(earlier_links[0].title, "Slides");
    }

    #[tokio::test]
    async fn test_title_suggestion_lands_when_link_is_unchanged() {
        let gateway = Arc::new(MemoryGateway::new());
        let owner = Uuid::new_v4();
        let (mut connection, mut events) = connect(app(gateway.clone(), ScriptedImporter(Ok(Schedule::new()))), None);
        connection.start(Some(owner));
        pump(&mut connection, &mut events).await;

        connection.handle_text(r#"{"type":"add_link","slot_id":"mon_1"}"#);
        connection.handle_text(r#"{"type":"set_link_url","slot_id":"mon_1","index":0,"url":"https://docs.google.com/x"}"#);
        connection.handle_text(r#"{"type":"suggest_link_title","slot_id":"mon_1","index":0}"#);
        pump(&mut connection, &mut events).await;

        let today = connection.planner.selected_date();
        let stored = gateway.stored_entry(owner, today, "mon_1").unwrap();
        assert_eq!(lesson_hub_core::links::decode(stored.link.as_deref())[0].title, "Slides");
        assert!(connection.planner.unsynced().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_message_is_reported() {
        let (mut connection, _events) = connect(app(Arc::new(MemoryGateway::new()), ScriptedImporter(Ok(Schedule::new()))), None);
        let replies = connection.handle_text("{\"type\":\"dance\"}");
        assert!(matches!(&replies[0], ServerMessage::Error { message } if message.starts_with("Invalid message")));
    }
}
