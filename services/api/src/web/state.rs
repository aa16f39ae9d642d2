//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-connection planner state.

use crate::config::Config;
use chrono::Utc;
use lesson_hub_core::domain::{LessonEntry, Schedule, ScheduleProfile};
use lesson_hub_core::overlay::{LinkTag, LoadTicket};
use lesson_hub_core::ports::{
    BlobStore, LinkShortener, LinkTitleService, PortResult, ScheduleImportService,
    SessionDirectory, SyncGateway,
};
use lesson_hub_core::session::{LoadRequests, Planner};
use lesson_hub_core::sync::{apply_with_retry, PendingWrite, WriteTicket};
use lesson_hub_core::templates::ProfileLoadTicket;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn SyncGateway>,
    pub sessions: Arc<dyn SessionDirectory>,
    pub blobs: Arc<dyn BlobStore>,
    pub importer: Arc<dyn ScheduleImportService>,
    pub titles: Arc<dyn LinkTitleService>,
    pub shortener: Option<Arc<dyn LinkShortener>>,
    pub config: Arc<Config>,
    /// Shown to identities with no stored profiles.
    pub default_profile: ScheduleProfile,
}

//=========================================================================================
// ConnectionState (Specific to One WebSocket Connection)
//=========================================================================================

/// Results of work spawned off the connection loop.
#[derive(Debug)]
pub enum TaskEvent {
    ProfilesLoaded(ProfileLoadTicket, PortResult<Vec<ScheduleProfile>>),
    EntriesLoaded(LoadTicket, PortResult<Vec<LessonEntry>>),
    WriteSettled(WriteTicket, PortResult<()>),
    ImportFinished(PortResult<Schedule>),
    /// `tag` names the link the suggestion was asked for.
    TitleSuggested {
        tag: LinkTag,
        result: PortResult<String>,
    },
    ShareLinkReady(String),
    IdentityResolved(Option<Uuid>),
}

/// Name and subtitle for the profile an in-flight import will create.
#[derive(Debug, Clone)]
pub struct PendingImport {
    pub name: String,
    pub subtitle: String,
}

/// The state for a single, active WebSocket connection. Only the connection
/// loop touches it; spawned work reports back through `events`.
pub struct ConnectionState {
    pub app: Arc<AppState>,
    pub planner: Planner,
    pub events: mpsc::UnboundedSender<TaskEvent>,
    pub writes: mpsc::UnboundedSender<PendingWrite>,
    pub pending_import: Option<PendingImport>,
}

impl ConnectionState {
    /// Creates the state and starts the connection's writer task.
    pub fn new(
        app: Arc<AppState>,
        shared_target: Option<Uuid>,
        events: mpsc::UnboundedSender<TaskEvent>,
    ) -> Self {
        let planner = Planner::new(
            app.config.share_policy,
            shared_target,
            app.default_profile.clone(),
            Utc::now().date_naive(),
        );
        let writes = spawn_writer(app.clone(), events.clone());
        Self {
            app,
            planner,
            events,
            writes,
            pending_import: None,
        }
    }

    /// Spawns the reads in `requests`; results come back as `TaskEvent`s.
    pub fn spawn_loads(&self, requests: LoadRequests) {
        if let Some(ticket) = requests.profiles {
            let gateway = self.app.gateway.clone();
            let events = self.events.clone();
            tokio::spawn(async move {
                let result = gateway.list_profiles(ticket.owner_id).await;
                let _ = events.send(TaskEvent::ProfilesLoaded(ticket, result));
            });
        }
        if let Some(ticket) = requests.entries {
            let gateway = self.app.gateway.clone();
            let events = self.events.clone();
            tokio::spawn(async move {
                let result = gateway.list_entries(ticket.owner_id, ticket.date).await;
                let _ = events.send(TaskEvent::EntriesLoaded(ticket, result));
            });
        }
    }
}

/// One writer per connection: writes reach the store in the order the user
/// made them, each retried per the configured policy. Queued writes still
/// complete after the socket closes.
fn spawn_writer(
    app: Arc<AppState>,
    events: mpsc::UnboundedSender<TaskEvent>,
) -> mpsc::UnboundedSender<PendingWrite> {
    let (tx, mut rx) = mpsc::unbounded_channel::<PendingWrite>();
    tokio::spawn(async move {
        while let Some(write) = rx.recv().await {
            let result = apply_with_retry(&write.op, app.gateway.as_ref(), app.config.retry).await;
            if events.send(TaskEvent::WriteSettled(write.ticket, result)).is_err() {
                debug!("Connection closed; finishing queued writes.");
            }
        }
    });
    tx
}

#[cfg(test)]
impl AppState {
    /// Memory-backed state with a single write attempt and no shortener.
    pub(crate) fn for_tests(
        gateway: Arc<lesson_hub_core::testing::MemoryGateway>,
        importer: lesson_hub_core::testing::ScriptedImporter,
    ) -> Arc<Self> {
        let vars = [
            ("DATABASE_URL", "postgres://unused"),
            ("SYNC_RETRY_ATTEMPTS", "1"),
            ("PUBLIC_BASE_URL", "https://hub.example"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Arc::new(AppState {
            gateway: gateway.clone(),
            sessions: gateway.clone(),
            blobs: gateway,
            importer: Arc::new(importer),
            titles: Arc::new(lesson_hub_core::testing::ScriptedTitles(Ok("Slides".to_string()))),
            shortener: None,
            config: Arc::new(Config::from_vars(vars).unwrap()),
            default_profile: lesson_hub_core::defaults::default_profile(),
        })
    }
}
