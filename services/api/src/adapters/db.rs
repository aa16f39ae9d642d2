//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the `SyncGateway` and `SessionDirectory` ports from the core crate. It handles
//! all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use lesson_hub_core::domain::{LessonEntry, Schedule, ScheduleProfile};
use lesson_hub_core::ports::{PortError, PortResult, SessionDirectory, SyncGateway};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the persistence ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ProfileRecord {
    profile_id: String,
    name: String,
    subtitle: String,
    schedule: Json<Schedule>,
}
impl ProfileRecord {
    fn to_domain(self) -> ScheduleProfile {
        ScheduleProfile {
            id: self.profile_id,
            name: self.name,
            subtitle: self.subtitle,
            schedule: self.schedule.0,
        }
    }
}

#[derive(FromRow)]
struct EntryRecord {
    owner_id: Uuid,
    date: NaiveDate,
    slot_id: String,
    link: Option<String>,
    notes: Option<String>,
    images: Option<Vec<String>>,
}
impl EntryRecord {
    fn to_domain(self) -> LessonEntry {
        LessonEntry {
            owner_id: self.owner_id,
            date: self.date,
            slot_id: self.slot_id,
            link: self.link,
            notes: self.notes,
            images: self.images,
        }
    }
}

#[derive(FromRow)]
struct AuthSessionRecord {
    owner_id: Uuid,
    expires_at: DateTime<Utc>,
}

//=========================================================================================
// `SyncGateway` Trait Implementation
//=========================================================================================

#[async_trait]
impl SyncGateway for DbAdapter {
    async fn list_profiles(&self, owner_id: Uuid) -> PortResult<Vec<ScheduleProfile>> {
        let records = sqlx::query_as::<_, ProfileRecord>(
            "SELECT profile_id, name, subtitle, schedule FROM schedule_profiles \
             WHERE owner_id = $1 ORDER BY created_at ASC, profile_id ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn upsert_profile(&self, owner_id: Uuid, profile: &ScheduleProfile) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO schedule_profiles (owner_id, profile_id, name, subtitle, schedule, updated_at) \
             VALUES ($1, $2, $3, $4, $5, now()) \
             ON CONFLICT (owner_id, profile_id) DO UPDATE SET \
                name = EXCLUDED.name, subtitle = EXCLUDED.subtitle, \
                schedule = EXCLUDED.schedule, updated_at = now()",
        )
        .bind(owner_id)
        .bind(&profile.id)
        .bind(&profile.name)
        .bind(&profile.subtitle)
        .bind(Json(&profile.schedule))
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn delete_profile(&self, owner_id: Uuid, profile_id: &str) -> PortResult<()> {
        // The built-in default profile may never have been stored.
        sqlx::query("DELETE FROM schedule_profiles WHERE owner_id = $1 AND profile_id = $2")
            .bind(owner_id)
            .bind(profile_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn list_entries(&self, owner_id: Uuid, date: NaiveDate) -> PortResult<Vec<LessonEntry>> {
        let records = sqlx::query_as::<_, EntryRecord>(
            "SELECT owner_id, date, slot_id, link, notes, images FROM lesson_plan \
             WHERE date = $1 AND owner_id = $2",
        )
        .bind(date)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn upsert_entry(&self, entry: &LessonEntry) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO lesson_plan (owner_id, date, slot_id, link, notes, images, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now()) \
             ON CONFLICT (owner_id, date, slot_id) DO UPDATE SET \
                link = EXCLUDED.link, notes = EXCLUDED.notes, \
                images = EXCLUDED.images, updated_at = now()",
        )
        .bind(entry.owner_id)
        .bind(entry.date)
        .bind(&entry.slot_id)
        .bind(&entry.link)
        .bind(&entry.notes)
        .bind(&entry.images)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn delete_entry(&self, owner_id: Uuid, date: NaiveDate, slot_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM lesson_plan WHERE owner_id = $1 AND date = $2 AND slot_id = $3")
            .bind(owner_id)
            .bind(date)
            .bind(slot_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `SessionDirectory` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionDirectory for DbAdapter {
    async fn resolve_session(&self, token: &str) -> PortResult<Uuid> {
        let record = sqlx::query_as::<_, AuthSessionRecord>(
            "SELECT owner_id, expires_at FROM auth_sessions WHERE id = $1",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::Unauthorized,
            _ => unexpected(e),
        })?;

        if record.expires_at <= Utc::now() {
            return Err(PortError::Unauthorized);
        }
        Ok(record.owner_id)
    }
}
