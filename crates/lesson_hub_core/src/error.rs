//! crates/lesson_hub_core/src/error.rs
//!
//! Errors raised by the core's own rules. Refusing a mutation because the
//! viewer is not the owner is not one of them: those calls are silent no-ops.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Profile not found: {0}")]
    UnknownProfile(String),
    #[error("Day {day} has no slot at position {index}")]
    SlotOutOfRange { day: u8, index: usize },
    #[error("Weekday index {0} is outside 0..=6")]
    InvalidDay(u8),
    #[error("The last remaining profile cannot be deleted")]
    LastProfile,
    #[error("Slot {slot_id} has no link at position {index}")]
    LinkOutOfRange { slot_id: String, index: usize },
    #[error("Day {day} already has a slot with id {id}")]
    DuplicateSlotId { day: u8, id: String },
    #[error("No identity to read data for")]
    ScopeUnresolved,
}

/// A convenience type alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;
