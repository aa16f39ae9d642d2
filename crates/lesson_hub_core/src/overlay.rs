//! crates/lesson_hub_core/src/overlay.rs
//!
//! The Entry Overlay: per-slot annotations for the selected date, held in
//! memory and merged with the active profile's slots to render the agenda.
//!
//! Writes are optimistic. Memory changes first; the returned `SyncOp` carries
//! the full merged row so a partial edit never clobbers sibling fields.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::access::AccessScope;
use crate::domain::{EntryPatch, LessonEntry, ScheduleSlot};
use crate::error::{CoreError, CoreResult};
use crate::links::{self, LinkItem};
use crate::ports::PortResult;
use crate::sync::{LoadOutcome, SyncOp};

/// Tags an entry read with the selection it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub owner_id: Uuid,
    pub date: NaiveDate,
    generation: u64,
}

/// One link as it was when an asynchronous request about it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTag {
    pub owner_id: Uuid,
    pub date: NaiveDate,
    pub slot_id: String,
    pub index: usize,
    pub url: String,
    generation: u64,
}

/// One row of the rendered agenda.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgendaItem {
    Break {
        slot_id: String,
    },
    Lesson {
        slot: ScheduleSlot,
        links: Vec<LinkItem>,
        /// Only filled in for the owner's editing view.
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
        images: Vec<String>,
    },
}

#[derive(Debug, Default)]
pub struct EntryOverlay {
    owner_id: Option<Uuid>,
    date: Option<NaiveDate>,
    entries: HashMap<String, LessonEntry>,
    /// Slots written locally since the current load began.
    touched: HashSet<String>,
    generation: u64,
}

impl EntryOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn entry(&self, slot_id: &str) -> Option<&LessonEntry> {
        self.entries.get(slot_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    //=====================================================================================
    // Loading
    //=====================================================================================

    /// Selects `(owner, date)` and drops everything held for the previous
    /// selection. Returns `None` when there is no identity to read for.
    pub fn begin_load(&mut self, owner_id: Option<Uuid>, date: NaiveDate) -> Option<LoadTicket> {
        self.generation += 1;
        self.owner_id = owner_id;
        self.date = Some(date);
        self.entries.clear();
        self.touched.clear();
        owner_id.map(|owner_id| LoadTicket {
            owner_id,
            date,
            generation: self.generation,
        })
    }

    /// Applies a read if it still matches the current selection. Local edits
    /// made while the read was in flight win over the fetched rows.
    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        result: PortResult<Vec<LessonEntry>>,
    ) -> LoadOutcome {
        if ticket.generation != self.generation
            || Some(ticket.owner_id) != self.owner_id
            || Some(ticket.date) != self.date
        {
            debug!("Discarding stale entry load for {}", ticket.date);
            return LoadOutcome::Stale;
        }
        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to load entries for {}: {}", ticket.date, e);
                return LoadOutcome::Failed;
            }
        };
        let mut fetched: HashMap<String, LessonEntry> = rows
            .into_iter()
            .filter(|row| !row.slot_id.is_empty())
            .map(|row| (row.slot_id.clone(), row))
            .collect();
        let count = fetched.len();
        for slot_id in &self.touched {
            match self.entries.get(slot_id) {
                Some(local) => fetched.insert(slot_id.clone(), local.clone()),
                None => fetched.remove(slot_id),
            };
        }
        self.entries = fetched;
        LoadOutcome::Applied(count)
    }

    //=====================================================================================
    // Mutations
    //=====================================================================================

    /// The `(owner, date)` to write under, when `scope` may edit this overlay.
    fn writer(&self, scope: &AccessScope) -> Option<(Uuid, NaiveDate)> {
        let owner_id = scope.writable_owner().filter(|o| Some(*o) == self.owner_id)?;
        Some((owner_id, self.date?))
    }

    fn current_or_empty(&self, owner_id: Uuid, date: NaiveDate, slot_id: &str) -> LessonEntry {
        self.entries
            .get(slot_id)
            .cloned()
            .unwrap_or_else(|| LessonEntry::empty(owner_id, date, slot_id))
    }

    /// `{ ...existing, ...patch }`, written to memory immediately.
    pub fn merge_annotation(
        &mut self,
        scope: &AccessScope,
        slot_id: &str,
        patch: &EntryPatch,
    ) -> Option<LessonEntry> {
        let (owner_id, date) = self.writer(scope)?;
        let mut merged = self.current_or_empty(owner_id, date, slot_id);
        patch.apply_to(&mut merged);
        self.entries.insert(slot_id.to_string(), merged.clone());
        self.touched.insert(slot_id.to_string());
        Some(merged)
    }

    /// The upsert for `slot_id`: the current merged entry plus `patch`, keyed by
    /// `(owner_id, date, slot_id)`.
    pub fn upsert_to_store(
        &self,
        scope: &AccessScope,
        slot_id: &str,
        patch: &EntryPatch,
    ) -> Option<SyncOp> {
        let (owner_id, date) = self.writer(scope)?;
        let mut payload = self.current_or_empty(owner_id, date, slot_id);
        patch.apply_to(&mut payload);
        Some(SyncOp::UpsertEntry(payload))
    }

    /// Merge into memory and build the matching upsert.
    pub fn annotate(
        &mut self,
        scope: &AccessScope,
        slot_id: &str,
        patch: &EntryPatch,
    ) -> Option<SyncOp> {
        self.merge_annotation(scope, slot_id, patch)?;
        self.upsert_to_store(scope, slot_id, patch)
    }

    /// Deletes the entry for `slot_id` locally and remotely.
    pub fn clear_entry(&mut self, scope: &AccessScope, slot_id: &str) -> Option<SyncOp> {
        let (owner_id, date) = self.writer(scope)?;
        self.entries.remove(slot_id);
        self.touched.insert(slot_id.to_string());
        Some(SyncOp::DeleteEntry {
            owner_id,
            date,
            slot_id: slot_id.to_string(),
        })
    }

    /// Appends `uri` to the slot's images. No dedup.
    pub fn append_image(&mut self, scope: &AccessScope, slot_id: &str, uri: &str) -> Option<SyncOp> {
        self.writer(scope)?;
        let mut images = self
            .entries
            .get(slot_id)
            .and_then(|e| e.images.clone())
            .unwrap_or_default();
        images.push(uri.to_string());
        self.annotate(scope, slot_id, &EntryPatch::images(images))
    }

    //=====================================================================================
    // Link Lists
    //=====================================================================================

    pub fn links(&self, slot_id: &str) -> Vec<LinkItem> {
        links::decode(self.entries.get(slot_id).and_then(|e| e.link.as_deref()))
    }

    /// Decodes the slot's links, lets `edit` change them, and writes the
    /// canonical encoding back. `edit` returns `false` when `index` is missing.
    fn edit_links<F>(
        &mut self,
        scope: &AccessScope,
        slot_id: &str,
        index: usize,
        edit: F,
    ) -> CoreResult<Option<SyncOp>>
    where
        F: FnOnce(&mut Vec<LinkItem>) -> bool,
    {
        if self.writer(scope).is_none() {
            return Ok(None);
        }
        let mut list = self.links(slot_id);
        if !edit(&mut list) {
            return Err(CoreError::LinkOutOfRange {
                slot_id: slot_id.to_string(),
                index,
            });
        }
        Ok(self.annotate(scope, slot_id, &EntryPatch::link(links::encode(&list))))
    }

    pub fn add_link(&mut self, scope: &AccessScope, slot_id: &str) -> CoreResult<Option<SyncOp>> {
        self.edit_links(scope, slot_id, 0, |list| {
            list.push(LinkItem::blank());
            true
        })
    }

    pub fn remove_link(&mut self, scope: &AccessScope, slot_id: &str, index: usize) -> CoreResult<Option<SyncOp>> {
        self.edit_links(scope, slot_id, index, |list| {
            if index < list.len() {
                list.remove(index);
                true
            } else {
                false
            }
        })
    }

    pub fn set_link_title(
        &mut self,
        scope: &AccessScope,
        slot_id: &str,
        index: usize,
        title: &str,
    ) -> CoreResult<Option<SyncOp>> {
        self.edit_links(scope, slot_id, index, |list| match list.get_mut(index) {
            Some(link) => {
                link.title = title.to_string();
                true
            }
            None => false,
        })
    }

    /// Sets a URL; a placeholder title is replaced by a guess from the host.
    pub fn set_link_url(
        &mut self,
        scope: &AccessScope,
        slot_id: &str,
        index: usize,
        url: &str,
    ) -> CoreResult<Option<SyncOp>> {
        self.edit_links(scope, slot_id, index, |list| links::set_url(list, index, url))
    }

    /// Tags a link with a non-empty URL under the current selection.
    pub fn link_tag(&self, slot_id: &str, index: usize) -> Option<LinkTag> {
        let url = self
            .links(slot_id)
            .get(index)
            .map(|l| l.url.clone())
            .filter(|url| !url.is_empty())?;
        Some(LinkTag {
            owner_id: self.owner_id?,
            date: self.date?,
            slot_id: slot_id.to_string(),
            index,
            url,
            generation: self.generation,
        })
    }

    /// Sets a title worked out for `tag`. Discarded when the selection changed
    /// or the link at that position no longer holds the tagged URL.
    pub fn set_suggested_title(
        &mut self,
        scope: &AccessScope,
        tag: &LinkTag,
        title: &str,
    ) -> CoreResult<Option<SyncOp>> {
        let current = self.links(&tag.slot_id);
        let still_there = current.get(tag.index).is_some_and(|l| l.url == tag.url);
        if tag.generation != self.generation
            || Some(tag.owner_id) != self.owner_id
            || Some(tag.date) != self.date
            || !still_there
        {
            debug!("Discarding stale title suggestion for {}", tag.url);
            return Ok(None);
        }
        self.set_link_title(scope, &tag.slot_id, tag.index, title)
    }

    //=====================================================================================
    // Rendering
    //=====================================================================================

    /// `slots` left-joined with the overlay. Entries for slot ids missing from
    /// `slots` are never rendered.
    pub fn agenda(&self, slots: &[ScheduleSlot], reveal_private: bool) -> Vec<AgendaItem> {
        slots
            .iter()
            .map(|slot| {
                if slot.is_break {
                    return AgendaItem::Break {
                        slot_id: slot.id.clone(),
                    };
                }
                let entry = self.entries.get(&slot.id);
                AgendaItem::Lesson {
                    slot: slot.clone(),
                    links: links::decode(entry.and_then(|e| e.link.as_deref())),
                    notes: entry
                        .filter(|_| reveal_private)
                        .and_then(|e| e.notes.clone()),
                    images: entry
                        .filter(|_| reveal_private)
                        .and_then(|e| e.images.clone())
                        .unwrap_or_default(),
                }
            })
            .collect()
    }
}
