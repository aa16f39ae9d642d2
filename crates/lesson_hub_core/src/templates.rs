//! crates/lesson_hub_core/src/templates.rs
//!
//! The Slot Template Store: one identity's schedule profiles, each a weekday
//! to slots mapping, plus the currently active profile.
//!
//! The remote representation stores the whole `schedule` object per profile,
//! so every slot mutation re-persists the full profile.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::access::AccessScope;
use crate::domain::{ProfileOrigin, Schedule, ScheduleProfile, ScheduleSlot};
use crate::error::{CoreError, CoreResult};
use crate::ports::PortResult;
use crate::sync::{LoadOutcome, SyncOp};

/// Where `upsert_slot` puts the slot before the day is re-sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPosition {
    /// Replace the slot currently at this index.
    At(usize),
    Append,
}

/// Tags a profile read with the owner it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileLoadTicket {
    pub owner_id: Uuid,
    generation: u64,
}

#[derive(Debug, Clone)]
pub struct SlotTemplateStore {
    owner_id: Option<Uuid>,
    default_profile: ScheduleProfile,
    profiles: Vec<ScheduleProfile>,
    active_id: String,
    /// Profiles written locally since the current load began.
    touched: HashSet<String>,
    generation: u64,
}

impl SlotTemplateStore {
    /// A store showing only `default_profile`, which is not persisted until
    /// it is first mutated.
    pub fn new(default_profile: ScheduleProfile) -> Self {
        Self {
            owner_id: None,
            active_id: default_profile.id.clone(),
            profiles: vec![default_profile.clone()],
            default_profile,
            touched: HashSet::new(),
            generation: 0,
        }
    }

    pub fn owner_id(&self) -> Option<Uuid> {
        self.owner_id
    }

    pub fn profiles(&self) -> &[ScheduleProfile] {
        &self.profiles
    }

    /// The active profile; the first profile if the active id has vanished.
    pub fn active(&self) -> &ScheduleProfile {
        self.profiles
            .iter()
            .find(|p| p.id == self.active_id)
            .or_else(|| self.profiles.first())
            .unwrap_or(&self.default_profile)
    }

    pub fn switch_active(&mut self, profile_id: &str) -> bool {
        if self.profiles.iter().any(|p| p.id == profile_id) {
            self.active_id = profile_id.to_string();
            true
        } else {
            false
        }
    }

    /// Slots of the active profile for a weekday.
    pub fn slots_for(&self, day: u8) -> &[ScheduleSlot] {
        self.active().schedule.day(day)
    }

    //=====================================================================================
    // Loading
    //=====================================================================================

    /// Switches the store to `owner_id`'s data. Memory falls back to the
    /// default profile until the read lands. `None` means there is nobody to
    /// load for, and no read should be issued.
    pub fn begin_load(&mut self, owner_id: Option<Uuid>) -> Option<ProfileLoadTicket> {
        self.generation += 1;
        self.owner_id = owner_id;
        self.touched.clear();
        self.reset_to_default();
        owner_id.map(|owner_id| ProfileLoadTicket {
            owner_id,
            generation: self.generation,
        })
    }

    pub fn finish_load(
        &mut self,
        ticket: ProfileLoadTicket,
        result: PortResult<Vec<ScheduleProfile>>,
    ) -> LoadOutcome {
        if ticket.generation != self.generation || Some(ticket.owner_id) != self.owner_id {
            debug!("Discarding stale profile load for {}", ticket.owner_id);
            return LoadOutcome::Stale;
        }
        let (fetched, outcome) = match result {
            Ok(profiles) => {
                let count = profiles.len();
                (profiles, LoadOutcome::Applied(count))
            }
            Err(e) => {
                warn!("Failed to load profiles for {}: {}", ticket.owner_id, e);
                (Vec::new(), LoadOutcome::Failed)
            }
        };
        self.apply_fetched(fetched);
        outcome
    }

    /// Replaces memory with `fetched` (or the default profile when there is
    /// nothing), keeping profiles written or deleted since the load began.
    fn apply_fetched(&mut self, fetched: Vec<ScheduleProfile>) {
        let mut merged = if fetched.is_empty() {
            vec![self.default_profile.clone()]
        } else {
            fetched
        };
        for profile_id in &self.touched {
            let local = self.profiles.iter().find(|p| &p.id == profile_id);
            let position = merged.iter().position(|p| &p.id == profile_id);
            match (local, position) {
                (Some(local), Some(i)) => merged[i] = local.clone(),
                (Some(local), None) => merged.push(local.clone()),
                (None, Some(i)) => {
                    merged.remove(i);
                }
                (None, None) => {}
            }
        }
        if merged.is_empty() {
            self.reset_to_default();
            return;
        }
        self.profiles = merged;
        if !self.profiles.iter().any(|p| p.id == self.active_id) {
            self.active_id = self.profiles[0].id.clone();
        }
    }

    fn reset_to_default(&mut self) {
        self.profiles = vec![self.default_profile.clone()];
        self.active_id = self.default_profile.id.clone();
    }

    //=====================================================================================
    // Mutations
    //=====================================================================================

    /// The owner to write as, when `scope` may mutate the profiles held here.
    fn writer(&self, scope: &AccessScope) -> Option<Uuid> {
        scope.writable_owner().filter(|owner| Some(*owner) == self.owner_id)
    }

    fn upsert_op(&self, owner_id: Uuid, profile_id: &str) -> CoreResult<SyncOp> {
        let profile = self
            .profiles
            .iter()
            .find(|p| p.id == profile_id)
            .ok_or_else(|| CoreError::UnknownProfile(profile_id.to_string()))?;
        Ok(SyncOp::UpsertProfile {
            owner_id,
            profile: profile.clone(),
        })
    }

    fn profile_mut(&mut self, profile_id: &str) -> CoreResult<&mut ScheduleProfile> {
        self.profiles
            .iter_mut()
            .find(|p| p.id == profile_id)
            .ok_or_else(|| CoreError::UnknownProfile(profile_id.to_string()))
    }

    /// Adds a new profile and makes it active.
    pub fn create_profile(
        &mut self,
        scope: &AccessScope,
        origin: ProfileOrigin,
        name: &str,
        subtitle: &str,
        schedule: Option<Schedule>,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<SyncOp>> {
        let Some(owner_id) = self.writer(scope) else {
            return Ok(None);
        };
        let profile = ScheduleProfile {
            id: origin.generate_id(now, &self.profiles),
            name: name.to_string(),
            subtitle: subtitle.to_string(),
            schedule: schedule.unwrap_or_default(),
        };
        self.active_id = profile.id.clone();
        self.touched.insert(profile.id.clone());
        self.profiles.push(profile.clone());
        Ok(Some(SyncOp::UpsertProfile { owner_id, profile }))
    }

    /// Wraps an Import Adapter result into a new active profile. The schedule
    /// is used as given.
    pub fn import_profile(
        &mut self,
        scope: &AccessScope,
        name: &str,
        subtitle: &str,
        parsed: Schedule,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<SyncOp>> {
        self.create_profile(scope, ProfileOrigin::Imported, name, subtitle, Some(parsed), now)
    }

    /// Metadata-only edit; slots are untouched.
    pub fn update_profile_info(
        &mut self,
        scope: &AccessScope,
        profile_id: &str,
        name: &str,
        subtitle: &str,
    ) -> CoreResult<Option<SyncOp>> {
        let Some(owner_id) = self.writer(scope) else {
            return Ok(None);
        };
        let profile = self.profile_mut(profile_id)?;
        profile.name = name.to_string();
        profile.subtitle = subtitle.to_string();
        self.touched.insert(profile_id.to_string());
        self.upsert_op(owner_id, profile_id).map(Some)
    }

    /// Deletes a profile. Refused before any remote call when it is the only
    /// one left. If the active profile goes, the first remaining one becomes
    /// active.
    pub fn delete_profile(
        &mut self,
        scope: &AccessScope,
        profile_id: &str,
    ) -> CoreResult<Option<SyncOp>> {
        let Some(owner_id) = self.writer(scope) else {
            return Ok(None);
        };
        let position = self
            .profiles
            .iter()
            .position(|p| p.id == profile_id)
            .ok_or_else(|| CoreError::UnknownProfile(profile_id.to_string()))?;
        if self.profiles.len() <= 1 {
            return Err(CoreError::LastProfile);
        }
        self.profiles.remove(position);
        self.touched.insert(profile_id.to_string());
        if self.active_id == profile_id {
            self.active_id = self.profiles[0].id.clone();
        }
        Ok(Some(SyncOp::DeleteProfile {
            owner_id,
            profile_id: profile_id.to_string(),
        }))
    }

    /// Replaces or appends a slot, then re-sorts the day by `time`.
    pub fn upsert_slot(
        &mut self,
        scope: &AccessScope,
        profile_id: &str,
        day: u8,
        slot: ScheduleSlot,
        position: SlotPosition,
    ) -> CoreResult<Option<SyncOp>> {
        let Some(owner_id) = self.writer(scope) else {
            return Ok(None);
        };
        if day > 6 {
            return Err(CoreError::InvalidDay(day));
        }
        let profile = self.profile_mut(profile_id)?;
        let current = profile.schedule.day(day);
        let replacing = match position {
            SlotPosition::At(index) if index < current.len() => Some(index),
            SlotPosition::At(index) => return Err(CoreError::SlotOutOfRange { day, index }),
            SlotPosition::Append => None,
        };
        let taken = current
            .iter()
            .enumerate()
            .any(|(i, s)| s.id == slot.id && Some(i) != replacing);
        if taken {
            return Err(CoreError::DuplicateSlotId { day, id: slot.id });
        }
        let slots = profile.schedule.day_mut(day);
        match replacing {
            Some(index) => slots[index] = slot,
            None => slots.push(slot),
        }
        profile.schedule.sort_day(day);
        self.touched.insert(profile_id.to_string());
        self.upsert_op(owner_id, profile_id).map(Some)
    }

    /// Removes the slot at `index` and re-persists the profile.
    pub fn delete_slot(
        &mut self,
        scope: &AccessScope,
        profile_id: &str,
        day: u8,
        index: usize,
    ) -> CoreResult<Option<SyncOp>> {
        let Some(owner_id) = self.writer(scope) else {
            return Ok(None);
        };
        if day > 6 {
            return Err(CoreError::InvalidDay(day));
        }
        let profile = self.profile_mut(profile_id)?;
        let slots = profile
            .schedule
            .0
            .get_mut(&day)
            .filter(|slots| index < slots.len())
            .ok_or(CoreError::SlotOutOfRange { day, index })?;
        slots.remove(index);
        self.touched.insert(profile_id.to_string());
        self.upsert_op(owner_id, profile_id).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SharePolicy;
    use crate::defaults::default_profile;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_767_225_600_000).unwrap()
    }

    fn owned_store() -> (SlotTemplateStore, AccessScope) {
        let owner = Uuid::new_v4();
        let mut store = SlotTemplateStore::new(default_profile());
        let ticket = store.begin_load(Some(owner)).unwrap();
        store.finish_load(ticket, Ok(vec![]));
        let scope = AccessScope::resolve(Some(owner), None, SharePolicy::TrustIdentity);
        (store, scope)
    }

    fn times(store: &SlotTemplateStore, day: u8) -> Vec<String> {
        store
            .slots_for(day)
            .iter()
            .map(|s| s.time.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_upsert_slot_sorts_by_time_string() {
        let (mut store, scope) = owned_store();
        for (id, time) in [("a", "09:00-10:00"), ("b", "08:00-09:00"), ("c", "")] {
            let slot = ScheduleSlot::lesson(id, time, "Maths", "");
            store
                .upsert_slot(&scope, "main", 1, slot, SlotPosition::Append)
                .unwrap();
        }
        assert_eq!(times(&store, 1), vec!["", "08:00-09:00", "09:00-10:00"]);
    }

    #[test]
    fn test_upsert_slot_at_index_replaces_and_persists_whole_profile() {
        let (mut store, scope) = owned_store();
        store
            .upsert_slot(&scope, "main", 2, ScheduleSlot::lesson("x", "10:00-11:00", "Art", ""), SlotPosition::Append)
            .unwrap();
        let op = store
            .upsert_slot(&scope, "main", 2, ScheduleSlot::lesson("x", "07:00-08:00", "Art", "B2"), SlotPosition::At(0))
            .unwrap()
            .unwrap();
        match op {
            SyncOp::UpsertProfile { profile, .. } => {
                assert_eq!(profile.schedule.day(2).len(), 1);
                assert_eq!(profile.schedule.day(2)[0].room.as_deref(), Some("B2"));
            }
            other => panic!("unexpected op {:?}", other),
        }
        let err = store
            .upsert_slot(&scope, "main", 2, ScheduleSlot::separator("b"), SlotPosition::At(4))
            .unwrap_err();
        assert_eq!(err, CoreError::SlotOutOfRange { day: 2, index: 4 });
    }

    #[test]
    fn test_delete_slot_by_position() {
        let (mut store, scope) = owned_store();
        for id in ["a", "b"] {
            store
                .upsert_slot(&scope, "main", 3, ScheduleSlot::lesson(id, "12:00-13:00", id, ""), SlotPosition::Append)
                .unwrap();
        }
        store.delete_slot(&scope, "main", 3, 0).unwrap();
        assert_eq!(store.slots_for(3)[0].id, "b");
        assert!(store.delete_slot(&scope, "main", 3, 1).is_err());
    }

    #[test]
    fn test_last_profile_cannot_be_deleted() {
        let (mut store, scope) = owned_store();
        let before = store.profiles().to_vec();
        assert_eq!(store.delete_profile(&scope, "main"), Err(CoreError::LastProfile));
        assert_eq!(store.profiles(), before.as_slice());
    }

    #[test]
    fn test_deleting_active_profile_switches_to_first() {
        let (mut store, scope) = owned_store();
        store
            .create_profile(&scope, ProfileOrigin::Manual, "Academy", "Evenings", None, now())
            .unwrap();
        let created = store.active().id.clone();
        assert!(created.starts_with("manual_"));

        let op = store.delete_profile(&scope, &created).unwrap();
        assert!(matches!(op, Some(SyncOp::DeleteProfile { .. })));
        assert_eq!(store.active().id, "main");
        assert_eq!(store.profiles().len(), 1);
    }

    #[test]
    fn test_update_profile_info_keeps_slots() {
        let (mut store, scope) = owned_store();
        store
            .upsert_slot(&scope, "main", 1, ScheduleSlot::lesson("a", "08:00-09:00", "Maths", ""), SlotPosition::Append)
            .unwrap();
        store
            .update_profile_info(&scope, "main", "Mornings", "Room 4")
            .unwrap();
        assert_eq!(store.active().name, "Mornings");
        assert_eq!(store.active().subtitle, "Room 4");
        assert_eq!(store.slots_for(1).len(), 1);
    }

    #[test]
    fn test_non_owner_mutations_are_noops() {
        let (mut store, _) = owned_store();
        let visitor = AccessScope::resolve(Some(Uuid::new_v4()), store.owner_id(), SharePolicy::TrustIdentity);
        let before = store.profiles().to_vec();

        let slot = ScheduleSlot::lesson("a", "08:00-09:00", "Maths", "");
        assert_eq!(store.upsert_slot(&visitor, "main", 1, slot, SlotPosition::Append), Ok(None));
        assert_eq!(store.delete_slot(&visitor, "main", 1, 0), Ok(None));
        assert_eq!(store.delete_profile(&visitor, "main"), Ok(None));
        assert_eq!(store.update_profile_info(&visitor, "main", "x", "y"), Ok(None));
        assert_eq!(
            store.create_profile(&visitor, ProfileOrigin::Manual, "x", "y", None, now()),
            Ok(None)
        );
        assert_eq!(store.profiles(), before.as_slice());
    }

    #[test]
    fn test_import_profile_becomes_active() {
        let (mut store, scope) = owned_store();
        let parsed = Schedule::new().with_day(5, vec![ScheduleSlot::lesson("fri_1", "15:30-20:30", "Master class", "UAH")]);
        store
            .import_profile(&scope, "Imported Schedule", "AI Generated", parsed.clone(), now())
            .unwrap()
            .unwrap();
        assert!(store.active().id.starts_with("imported_"));
        assert_eq!(store.active().schedule, parsed);
    }

    #[test]
    fn test_stale_profile_load_is_discarded() {
        let mut store = SlotTemplateStore::new(default_profile());
        let first = store.begin_load(Some(Uuid::new_v4())).unwrap();
        let second = store.begin_load(Some(Uuid::new_v4())).unwrap();

        let theirs = ScheduleProfile {
            id: "manual_1".into(),
            name: "Theirs".into(),
            subtitle: String::new(),
            schedule: Schedule::new(),
        };
        assert_eq!(store.finish_load(first, Ok(vec![theirs])), LoadOutcome::Stale);
        assert_eq!(store.active().id, "main");
        assert_eq!(store.finish_load(second, Ok(vec![])), LoadOutcome::Applied(0));
    }

    #[test]
    fn test_failed_profile_load_falls_back_to_default() {
        let mut store = SlotTemplateStore::new(default_profile());
        let ticket = store.begin_load(Some(Uuid::new_v4())).unwrap();
        let outcome = store.finish_load(ticket, Err(crate::ports::PortError::Unexpected("down".into())));
        assert_eq!(outcome, LoadOutcome::Failed);
        assert_eq!(store.profiles().len(), 1);
        assert_eq!(store.active().id, "main");
    }

    #[test]
    fn test_duplicate_slot_id_is_refused() {
        let (mut store, scope) = owned_store();
        store
            .upsert_slot(&scope, "main", 1, ScheduleSlot::lesson("a", "08:00-09:00", "Maths", ""), SlotPosition::Append)
            .unwrap();
        store
            .upsert_slot(&scope, "main", 1, ScheduleSlot::lesson("b", "09:00-10:00", "Art", ""), SlotPosition::Append)
            .unwrap();

        let err = store
            .upsert_slot(&scope, "main", 1, ScheduleSlot::lesson("a", "10:00-11:00", "PE", ""), SlotPosition::Append)
            .unwrap_err();
        assert_eq!(err, CoreError::DuplicateSlotId { day: 1, id: "a".into() });
        let err = store
            .upsert_slot(&scope, "main", 1, ScheduleSlot::lesson("a", "09:00-10:00", "Art", ""), SlotPosition::At(1))
            .unwrap_err();
        assert_eq!(err, CoreError::DuplicateSlotId { day: 1, id: "a".into() });
        assert_eq!(times(&store, 1), vec!["08:00-09:00", "09:00-10:00"]);

        // Same id on another day, or rewriting a slot in place, is fine.
        store
            .upsert_slot(&scope, "main", 2, ScheduleSlot::lesson("a", "08:00-09:00", "Maths", ""), SlotPosition::Append)
            .unwrap();
        store
            .upsert_slot(&scope, "main", 1, ScheduleSlot::lesson("a", "07:30-08:30", "Maths", "C3"), SlotPosition::At(0))
            .unwrap();
        assert_eq!(store.slots_for(1)[0].room.as_deref(), Some("C3"));
    }

    #[test]
    fn test_rejected_slot_edits_leave_days_untouched() {
        let (mut store, scope) = owned_store();
        assert_eq!(
            store.delete_slot(&scope, "main", 4, 0),
            Err(CoreError::SlotOutOfRange { day: 4, index: 0 })
        );
        assert_eq!(
            store.upsert_slot(&scope, "main", 4, ScheduleSlot::separator("s"), SlotPosition::At(0)),
            Err(CoreError::SlotOutOfRange { day: 4, index: 0 })
        );
        assert_eq!(store.delete_slot(&scope, "main", 7, 0), Err(CoreError::InvalidDay(7)));
        assert!(store.active().schedule.0.is_empty());
    }

    #[test]
    fn test_profile_created_during_load_survives_it() {
        let (mut store, scope) = owned_store();
        let owner = store.owner_id();
        let ticket = store.begin_load(owner).unwrap();
        store
            .create_profile(&scope, ProfileOrigin::Manual, "Year 9", "Room 12", None, now())
            .unwrap()
            .unwrap();
        let created = store.active().id.clone();

        assert_eq!(store.finish_load(ticket, Ok(vec![])), LoadOutcome::Applied(0));
        let ids: Vec<&str> = store.profiles().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["main", created.as_str()]);
        assert_eq!(store.active().id, created);
    }

    #[test]
    fn test_profile_deleted_during_load_stays_deleted() {
        let (mut store, scope) = owned_store();
        let owner = store.owner_id();
        let ticket = store.begin_load(owner).unwrap();
        store
            .create_profile(&scope, ProfileOrigin::Manual, "Year 9", "", None, now())
            .unwrap();
        store.delete_profile(&scope, "main").unwrap();
        let created = store.active().id.clone();
        store.update_profile_info(&scope, &created, "Year 10", "").unwrap();

        let remote_main = ScheduleProfile {
            name: "Remote".into(),
            ..default_profile()
        };
        let remote_other = ScheduleProfile {
            id: "imported_1".into(),
            name: "Evenings".into(),
            subtitle: String::new(),
            schedule: Schedule::new(),
        };
        let outcome = store.finish_load(ticket, Ok(vec![remote_main, remote_other]));
        assert_eq!(outcome, LoadOutcome::Applied(2));

        let names: Vec<&str> = store.profiles().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Evenings", "Year 10"]);
        assert_eq!(store.active().name, "Year 10");
    }

    #[test]
    fn test_no_identity_issues_no_load() {
        let mut store = SlotTemplateStore::new(default_profile());
        assert!(store.begin_load(None).is_none());
    }
}
