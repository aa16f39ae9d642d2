//! crates/lesson_hub_core/src/sync.rs
//!
//! Remote writes produced by local mutations, and the bookkeeping that keeps
//! optimistic memory honest about what the store has actually committed.
//!
//! Mutations in [`crate::templates`] and [`crate::overlay`] never perform I/O.
//! They update memory and hand back a [`SyncOp`]; whoever owns the gateway
//! dispatches it and reports the outcome to a [`SyncLedger`]. A failed write is
//! not rolled back: the key is marked dirty and kept for a retry pass.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{LessonEntry, ScheduleProfile};
use crate::ports::{PortResult, SyncGateway};

//=========================================================================================
// Operations
//=========================================================================================

/// One remote call, fully described.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOp {
    UpsertProfile { owner_id: Uuid, profile: ScheduleProfile },
    DeleteProfile { owner_id: Uuid, profile_id: String },
    UpsertEntry(LessonEntry),
    DeleteEntry { owner_id: Uuid, date: NaiveDate, slot_id: String },
}

/// The remote row an op touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncKey {
    Profile { owner_id: Uuid, profile_id: String },
    Entry { owner_id: Uuid, date: NaiveDate, slot_id: String },
}

impl SyncOp {
    pub fn key(&self) -> SyncKey {
        match self {
            SyncOp::UpsertProfile { owner_id, profile } => SyncKey::Profile {
                owner_id: *owner_id,
                profile_id: profile.id.clone(),
            },
            SyncOp::DeleteProfile { owner_id, profile_id } => SyncKey::Profile {
                owner_id: *owner_id,
                profile_id: profile_id.clone(),
            },
            SyncOp::UpsertEntry(entry) => SyncKey::Entry {
                owner_id: entry.owner_id,
                date: entry.date,
                slot_id: entry.slot_id.clone(),
            },
            SyncOp::DeleteEntry { owner_id, date, slot_id } => SyncKey::Entry {
                owner_id: *owner_id,
                date: *date,
                slot_id: slot_id.clone(),
            },
        }
    }

    /// Performs the call once.
    pub async fn apply(&self, gateway: &dyn SyncGateway) -> PortResult<()> {
        match self {
            SyncOp::UpsertProfile { owner_id, profile } => {
                gateway.upsert_profile(*owner_id, profile).await
            }
            SyncOp::DeleteProfile { owner_id, profile_id } => {
                gateway.delete_profile(*owner_id, profile_id).await
            }
            SyncOp::UpsertEntry(entry) => gateway.upsert_entry(entry).await,
            SyncOp::DeleteEntry { owner_id, date, slot_id } => {
                gateway.delete_entry(*owner_id, *date, slot_id).await
            }
        }
    }
}

/// What happened to the result of a read issued for some selection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Rows applied to memory.
    Applied(usize),
    /// The selection moved on while the read was in flight; nothing changed.
    Stale,
    /// The read failed; memory holds the empty state.
    Failed,
}

//=========================================================================================
// Retry
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `n + 1`: base, 2x base, 4x base, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Applies `op`, retrying failures with exponential backoff.
pub async fn apply_with_retry(
    op: &SyncOp,
    gateway: &dyn SyncGateway,
    policy: RetryPolicy,
) -> PortResult<()> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op.apply(gateway).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                let delay = policy.delay_after(attempt);
                debug!("Write to {:?} failed (attempt {}): {}. Retrying in {:?}", op.key(), attempt, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

//=========================================================================================
// Ledger
//=========================================================================================

/// Identifies one dispatched write: the key plus its per-key sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTicket {
    pub key: SyncKey,
    pub seq: u64,
}

/// A write ready to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub ticket: WriteTicket,
    pub op: SyncOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    /// The latest write for the key failed; memory is ahead of the store.
    Unsynced,
    /// A newer write for the same key has been issued since; ignored.
    Superseded,
}

#[derive(Debug, Default)]
pub struct SyncLedger {
    latest: HashMap<SyncKey, u64>,
    in_flight: HashMap<SyncKey, SyncOp>,
    dirty: HashMap<SyncKey, SyncOp>,
}

impl SyncLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new write and returns it with a fresh sequence number.
    pub fn track(&mut self, op: SyncOp) -> PendingWrite {
        let key = op.key();
        let seq = self.latest.get(&key).map_or(1, |s| s + 1);
        self.latest.insert(key.clone(), seq);
        self.in_flight.insert(key.clone(), op.clone());
        PendingWrite {
            ticket: WriteTicket { key, seq },
            op,
        }
    }

    /// Records the outcome of a dispatched write.
    pub fn settle(&mut self, ticket: &WriteTicket, result: &PortResult<()>) -> SyncStatus {
        if self.latest.get(&ticket.key) != Some(&ticket.seq) {
            return SyncStatus::Superseded;
        }
        let op = self.in_flight.remove(&ticket.key);
        match result {
            Ok(()) => {
                self.dirty.remove(&ticket.key);
                SyncStatus::Synced
            }
            Err(e) => {
                warn!("Write to {:?} failed; keeping local value as unsynced: {}", ticket.key, e);
                if let Some(op) = op {
                    self.dirty.insert(ticket.key.clone(), op);
                }
                SyncStatus::Unsynced
            }
        }
    }

    pub fn is_dirty(&self, key: &SyncKey) -> bool {
        self.dirty.contains_key(key)
    }

    pub fn dirty_keys(&self) -> Vec<SyncKey> {
        self.dirty.keys().cloned().collect()
    }

    /// Re-issues every dirty write under fresh tickets.
    pub fn retry_dirty(&mut self) -> Vec<PendingWrite> {
        let ops: Vec<SyncOp> = self.dirty.values().cloned().collect();
        ops.into_iter().map(|op| self.track(op)).collect()
    }
}
