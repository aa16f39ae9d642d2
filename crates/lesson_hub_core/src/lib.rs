pub mod access;
pub mod defaults;
pub mod domain;
pub mod error;
pub mod links;
pub mod overlay;
pub mod ports;
pub mod session;
pub mod sync;
pub mod templates;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use access::{AccessScope, ScopeResolver, ScopeState, SharePolicy};
pub use defaults::{default_profile, holiday_name, SeedProfile};
pub use domain::{EntryPatch, LessonEntry, ProfileOrigin, Schedule, ScheduleProfile, ScheduleSlot};
pub use error::{CoreError, CoreResult};
pub use links::LinkItem;
pub use overlay::{AgendaItem, EntryOverlay, LinkTag, LoadTicket};
pub use ports::{
    BlobStore, LinkShortener, LinkTitleService, PortError, PortResult, ScheduleImportService,
    SessionDirectory, SyncGateway,
};
pub use session::{share_url, Agenda, LoadRequests, Planner, UiState};
pub use sync::{
    apply_with_retry, LoadOutcome, PendingWrite, RetryPolicy, SyncKey, SyncLedger, SyncOp,
    SyncStatus, WriteTicket,
};
pub use templates::{ProfileLoadTicket, SlotPosition, SlotTemplateStore};
