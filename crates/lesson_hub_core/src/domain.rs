//! crates/lesson_hub_core/src/domain.rs
//!
//! Defines the core data structures for the lesson hub: weekly slot templates
//! grouped into named profiles, and per-date annotations attached to slots.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Id of the built-in profile every user starts with.
pub const DEFAULT_PROFILE_ID: &str = "main";

/// Weekday index of a date, `0 = Sunday` through `6 = Saturday`.
pub fn day_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

//=========================================================================================
// Slot Templates
//=========================================================================================

/// A template entry for one position in a weekday.
///
/// Every field except `id` is display data; missing values from an imported
/// document deserialize to empty defaults instead of failing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleSlot {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub is_break: bool,
}

impl ScheduleSlot {
    pub fn lesson(id: &str, time: &str, subject: &str, room: &str) -> Self {
        Self {
            id: id.to_string(),
            time: Some(time.to_string()),
            subject: Some(subject.to_string()),
            room: Some(room.to_string()),
            ..Default::default()
        }
    }

    pub fn separator(id: &str) -> Self {
        Self {
            id: id.to_string(),
            is_break: true,
            ..Default::default()
        }
    }

    /// The raw sort key. Missing times sort as the empty string.
    pub fn sort_key(&self) -> &str {
        self.time.as_deref().unwrap_or("")
    }
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Weekday index (`0..=6`, Sunday first) to the ordered slots of that day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule(pub BTreeMap<u8, Vec<ScheduleSlot>>);

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots for a weekday. A day with no entry is an empty day.
    pub fn day(&self, day: u8) -> &[ScheduleSlot] {
        self.0.get(&day).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn day_mut(&mut self, day: u8) -> &mut Vec<ScheduleSlot> {
        self.0.entry(day).or_default()
    }

    /// Re-sorts one day by its `time` strings. The sort is stable so slots
    /// with equal or missing times keep their insertion order.
    pub fn sort_day(&mut self, day: u8) {
        if let Some(slots) = self.0.get_mut(&day) {
            slots.sort_by(|a, b| a.sort_key().cmp(b.sort_key()));
        }
    }

    pub fn with_day(mut self, day: u8, slots: Vec<ScheduleSlot>) -> Self {
        self.0.insert(day, slots);
        self
    }
}

//=========================================================================================
// Profiles
//=========================================================================================

/// A named weekly schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleProfile {
    pub id: String,
    pub name: String,
    pub subtitle: String,
    pub schedule: Schedule,
}

/// How a profile came to exist; decides the shape of its generated id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOrigin {
    Manual,
    Imported,
}

impl ProfileOrigin {
    fn prefix(self) -> &'static str {
        match self {
            ProfileOrigin::Manual => "manual",
            ProfileOrigin::Imported => "imported",
        }
    }

    /// Generates `<prefix>_<unix millis>`, bumping the timestamp until the id
    /// is free among `existing`.
    pub fn generate_id(self, now: DateTime<Utc>, existing: &[ScheduleProfile]) -> String {
        let mut stamp = now.timestamp_millis();
        loop {
            let candidate = format!("{}_{}", self.prefix(), stamp);
            if !existing.iter().any(|p| p.id == candidate) {
                return candidate;
            }
            stamp += 1;
        }
    }
}

//=========================================================================================
// Lesson Entries
//=========================================================================================

/// A per-date annotation for one slot, identified by `(owner_id, date, slot_id)`.
///
/// `slot_id` is not validated against any profile: an entry for a slot that
/// was since deleted simply never renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonEntry {
    pub owner_id: Uuid,
    pub date: NaiveDate,
    pub slot_id: String,
    /// Serialized link list, see [`crate::links`].
    pub link: Option<String>,
    pub notes: Option<String>,
    pub images: Option<Vec<String>>,
}

impl LessonEntry {
    pub fn empty(owner_id: Uuid, date: NaiveDate, slot_id: &str) -> Self {
        Self {
            owner_id,
            date,
            slot_id: slot_id.to_string(),
            link: None,
            notes: None,
            images: None,
        }
    }
}

/// A field-level partial update for a [`LessonEntry`]. `None` leaves the
/// stored field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryPatch {
    pub link: Option<String>,
    pub notes: Option<String>,
    pub images: Option<Vec<String>>,
}

impl EntryPatch {
    pub fn notes(notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
            ..Default::default()
        }
    }

    pub fn link(link: impl Into<String>) -> Self {
        Self {
            link: Some(link.into()),
            ..Default::default()
        }
    }

    pub fn images(images: Vec<String>) -> Self {
        Self {
            images: Some(images),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.link.is_none() && self.notes.is_none() && self.images.is_none()
    }

    /// Overlays the present fields onto `entry`.
    pub fn apply_to(&self, entry: &mut LessonEntry) {
        if let Some(link) = &self.link {
            entry.link = Some(link.clone());
        }
        if let Some(notes) = &self.notes {
            entry.notes = Some(notes.clone());
        }
        if let Some(images) = &self.images {
            entry.images = Some(images.clone());
        }
    }
}
