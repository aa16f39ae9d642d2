//! crates/lesson_hub_core/src/ports.rs
//!
//! Defines the service contracts (traits) the core talks to.
//! These traits form the boundary of the hexagonal architecture: the remote
//! store, blob storage, the document importer and the small link helpers are
//! all external collaborators with a narrow contract.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::domain::{LessonEntry, Schedule, ScheduleProfile};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    /// The collaborator refused the input; the message is fit to show a user.
    #[error("{0}")]
    Rejected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The remote persistence service. Every write is an upsert keyed by the
/// composite identity of the row, so retries never duplicate data.
#[async_trait]
pub trait SyncGateway: Send + Sync {
    // --- Profiles, keyed by (owner_id, profile_id) ---
    async fn list_profiles(&self, owner_id: Uuid) -> PortResult<Vec<ScheduleProfile>>;

    async fn upsert_profile(&self, owner_id: Uuid, profile: &ScheduleProfile) -> PortResult<()>;

    async fn delete_profile(&self, owner_id: Uuid, profile_id: &str) -> PortResult<()>;

    // --- Entries, keyed by (owner_id, date, slot_id) ---
    async fn list_entries(&self, owner_id: Uuid, date: NaiveDate) -> PortResult<Vec<LessonEntry>>;

    async fn upsert_entry(&self, entry: &LessonEntry) -> PortResult<()>;

    async fn delete_entry(&self, owner_id: Uuid, date: NaiveDate, slot_id: &str)
        -> PortResult<()>;
}

/// Validates session tokens issued by the external identity provider.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn resolve_session(&self, token: &str) -> PortResult<Uuid>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `file_name` and returns a stable URI for it.
    async fn upload(&self, file_name: &str, bytes: &[u8]) -> PortResult<String>;
}

#[async_trait]
pub trait ScheduleImportService: Send + Sync {
    /// Turns an uploaded document into a weekly schedule.
    async fn parse_schedule(&self, document: &[u8], media_type: &str) -> PortResult<Schedule>;
}

#[async_trait]
pub trait LinkTitleService: Send + Sync {
    async fn suggest_title(&self, url: &str) -> PortResult<String>;
}

#[async_trait]
pub trait LinkShortener: Send + Sync {
    async fn shorten(&self, long_url: &str) -> PortResult<String>;
}
