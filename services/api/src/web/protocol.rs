//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the
//! planner session running on the server.

use chrono::NaiveDate;
use lesson_hub_core::access::ScopeState;
use lesson_hub_core::domain::{EntryPatch, ScheduleProfile, ScheduleSlot};
use lesson_hub_core::session::{Agenda, UiState};
use lesson_hub_core::sync::{SyncKey, SyncStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    // --- Navigation and panels ---
    SelectDate { date: NaiveDate },
    SwitchProfile { profile_id: String },
    ToggleAdmin,
    /// Expands one slot card; `null` collapses all.
    ExpandSlot { slot_id: Option<String> },
    ClosePanel,

    // --- Profiles and slots ---
    CreateProfile { name: String, subtitle: String },
    UpdateProfileInfo { profile_id: String, name: String, subtitle: String },
    DeleteProfile { profile_id: String },
    /// Replaces the slot at `index`, or appends when `index` is absent.
    UpsertSlot {
        profile_id: String,
        day: u8,
        slot: ScheduleSlot,
        #[serde(default)]
        index: Option<usize>,
    },
    DeleteSlot { profile_id: String, day: u8, index: usize },
    /// A document to run through the importer; `data` is base64.
    ImportProfile {
        media_type: String,
        data: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        subtitle: Option<String>,
    },

    // --- Entries for the selected date ---
    PatchEntry { slot_id: String, patch: EntryPatch },
    ClearEntry { slot_id: String },
    /// Attaches an image already uploaded through `POST /media`.
    AppendImage { slot_id: String, uri: String },
    AddLink { slot_id: String },
    RemoveLink { slot_id: String, index: usize },
    SetLinkTitle { slot_id: String, index: usize, title: String },
    SetLinkUrl { slot_id: String, index: usize, url: String },
    SuggestLinkTitle { slot_id: String, index: usize },

    // --- Session ---
    RequestShareLink,
    /// Sent after sign-in or sign-out with the new session token, if any.
    SessionChanged {
        #[serde(default)]
        token: Option<String>,
    },
    RetryUnsynced,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Who is looking at whose data, and what the UI may show.
    Scope {
        scope: ScopeState,
        viewer: Option<Uuid>,
        target: Option<Uuid>,
        is_owner: bool,
        ui: UiState,
    },

    Profiles {
        profiles: Vec<ScheduleProfile>,
        active_profile_id: String,
    },

    Agenda { agenda: Agenda },

    /// Outcome of the latest settled write plus every key still unsynced.
    SyncStatus {
        status: SyncStatus,
        unsynced: Vec<SyncKey>,
    },

    ShareLink { url: String },

    /// A document import is running; the UI should block further imports.
    ImportStarted,

    /// Reports an error the client should display.
    Error { message: String },
}
