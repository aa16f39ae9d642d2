//! Test infrastructure: an in-memory `SyncGateway` and scripted collaborators.
//!
//! Compiled for this crate's own tests and, through the `testing` feature, for
//! the service crate's tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::{LessonEntry, Schedule, ScheduleProfile};
use crate::ports::{
    BlobStore, LinkShortener, LinkTitleService, PortError, PortResult, ScheduleImportService,
    SessionDirectory, SyncGateway,
};

// ---------------------------------------------------------------------------
// MemoryGateway
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    profiles: BTreeMap<(Uuid, String), ScheduleProfile>,
    entries: BTreeMap<(Uuid, NaiveDate, String), LessonEntry>,
    sessions: HashMap<String, Uuid>,
    blobs: BTreeMap<String, Vec<u8>>,
}

/// A `SyncGateway` backed by maps, with failure injection.
#[derive(Default)]
pub struct MemoryGateway {
    tables: Mutex<Tables>,
    failing_writes: Mutex<u32>,
    failing_reads: Mutex<bool>,
    write_log: Mutex<Vec<String>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` writes fail with `PortError::Unexpected`.
    pub fn fail_next_writes(&self, n: u32) {
        *self.failing_writes.lock().unwrap() = n;
    }

    /// Every read fails while set.
    pub fn fail_reads(&self, fail: bool) {
        *self.failing_reads.lock().unwrap() = fail;
    }

    pub fn add_session(&self, token: &str, owner_id: Uuid) {
        self.tables
            .lock()
            .unwrap()
            .sessions
            .insert(token.to_string(), owner_id);
    }

    /// One line per successful write, e.g. `upsert_entry mon_1`.
    pub fn write_log(&self) -> Vec<String> {
        self.write_log.lock().unwrap().clone()
    }

    pub fn stored_entry(&self, owner_id: Uuid, date: NaiveDate, slot_id: &str) -> Option<LessonEntry> {
        self.tables
            .lock()
            .unwrap()
            .entries
            .get(&(owner_id, date, slot_id.to_string()))
            .cloned()
    }

    pub fn stored_profile(&self, owner_id: Uuid, profile_id: &str) -> Option<ScheduleProfile> {
        self.tables
            .lock()
            .unwrap()
            .profiles
            .get(&(owner_id, profile_id.to_string()))
            .cloned()
    }

    pub fn blob(&self, file_name: &str) -> Option<Vec<u8>> {
        self.tables.lock().unwrap().blobs.get(file_name).cloned()
    }

    fn check_read(&self) -> PortResult<()> {
        if *self.failing_reads.lock().unwrap() {
            return Err(PortError::Unexpected("read failed".to_string()));
        }
        Ok(())
    }

    fn check_write(&self, what: String) -> PortResult<()> {
        let mut failing = self.failing_writes.lock().unwrap();
        if *failing > 0 {
            *failing -= 1;
            return Err(PortError::Unexpected("write failed".to_string()));
        }
        self.write_log.lock().unwrap().push(what);
        Ok(())
    }
}

#[async_trait]
impl SyncGateway for MemoryGateway {
    async fn list_profiles(&self, owner_id: Uuid) -> PortResult<Vec<ScheduleProfile>> {
        self.check_read()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .profiles
            .iter()
            .filter(|((owner, _), _)| *owner == owner_id)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn upsert_profile(&self, owner_id: Uuid, profile: &ScheduleProfile) -> PortResult<()> {
        self.check_write(format!("upsert_profile {}", profile.id))?;
        self.tables
            .lock()
            .unwrap()
            .profiles
            .insert((owner_id, profile.id.clone()), profile.clone());
        Ok(())
    }

    async fn delete_profile(&self, owner_id: Uuid, profile_id: &str) -> PortResult<()> {
        self.check_write(format!("delete_profile {}", profile_id))?;
        self.tables
            .lock()
            .unwrap()
            .profiles
            .remove(&(owner_id, profile_id.to_string()));
        Ok(())
    }

    async fn list_entries(&self, owner_id: Uuid, date: NaiveDate) -> PortResult<Vec<LessonEntry>> {
        self.check_read()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .entries
            .values()
            .filter(|e| e.owner_id == owner_id && e.date == date)
            .cloned()
            .collect())
    }

    async fn upsert_entry(&self, entry: &LessonEntry) -> PortResult<()> {
        self.check_write(format!("upsert_entry {}", entry.slot_id))?;
        self.tables.lock().unwrap().entries.insert(
            (entry.owner_id, entry.date, entry.slot_id.clone()),
            entry.clone(),
        );
        Ok(())
    }

    async fn delete_entry(&self, owner_id: Uuid, date: NaiveDate, slot_id: &str) -> PortResult<()> {
        self.check_write(format!("delete_entry {}", slot_id))?;
        self.tables
            .lock()
            .unwrap()
            .entries
            .remove(&(owner_id, date, slot_id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl SessionDirectory for MemoryGateway {
    async fn resolve_session(&self, token: &str) -> PortResult<Uuid> {
        self.tables
            .lock()
            .unwrap()
            .sessions
            .get(token)
            .copied()
            .ok_or(PortError::Unauthorized)
    }
}

#[async_trait]
impl BlobStore for MemoryGateway {
    async fn upload(&self, file_name: &str, bytes: &[u8]) -> PortResult<String> {
        self.check_write(format!("upload {}", file_name))?;
        self.tables
            .lock()
            .unwrap()
            .blobs
            .insert(file_name.to_string(), bytes.to_vec());
        Ok(format!("memory://blobs/{}", file_name))
    }
}

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

/// Returns a fixed outcome for every call.
pub struct ScriptedImporter(pub PortResult<Schedule>);

#[async_trait]
impl ScheduleImportService for ScriptedImporter {
    async fn parse_schedule(&self, _document: &[u8], _media_type: &str) -> PortResult<Schedule> {
        self.0.clone()
    }
}

pub struct ScriptedTitles(pub PortResult<String>);

#[async_trait]
impl LinkTitleService for ScriptedTitles {
    async fn suggest_title(&self, _url: &str) -> PortResult<String> {
        self.0.clone()
    }
}

pub struct ScriptedShortener(pub PortResult<String>);

#[async_trait]
impl LinkShortener for ScriptedShortener {
    async fn shorten(&self, _long_url: &str) -> PortResult<String> {
        self.0.clone()
    }
}
