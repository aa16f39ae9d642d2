//! crates/lesson_hub_core/src/defaults.rs
//!
//! Built-in data: the profile shown before a user has saved anything, and the
//! public holiday calendar highlighted on the agenda.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::domain::{Schedule, ScheduleProfile, DEFAULT_PROFILE_ID};

pub const DEFAULT_PROFILE_NAME: &str = "myLesson Hub";

/// The fallback profile used when an identity has no stored profiles.
pub fn default_profile() -> ScheduleProfile {
    ScheduleProfile {
        id: DEFAULT_PROFILE_ID.to_string(),
        name: DEFAULT_PROFILE_NAME.to_string(),
        subtitle: String::new(),
        schedule: Schedule::new(),
    }
}

/// A seed file: the default profile's contents without an id.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub schedule: Schedule,
}

impl SeedProfile {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// The seed as the `main` profile.
    pub fn into_profile(self) -> ScheduleProfile {
        ScheduleProfile {
            id: DEFAULT_PROFILE_ID.to_string(),
            name: self.name.unwrap_or_else(|| DEFAULT_PROFILE_NAME.to_string()),
            subtitle: self.subtitle,
            schedule: self.schedule,
        }
    }
}

/// Public holidays (Comunidad de Madrid, 2026).
const HOLIDAYS: &[(&str, &str)] = &[
    ("2026-01-01", "Año Nuevo"),
    ("2026-01-06", "Reyes"),
    ("2026-03-28", "Jueves Santo"),
    ("2026-03-29", "Viernes Santo"),
    ("2026-05-01", "Fiesta del Trabajo"),
    ("2026-05-02", "Comunidad de Madrid"),
    ("2026-05-15", "San Isidro"),
    ("2026-10-12", "Fiesta Nacional"),
    ("2026-11-01", "Todos los Santos"),
    ("2026-12-06", "Constitución"),
    ("2026-12-08", "Inmaculada"),
    ("2026-12-25", "Navidad"),
];

pub fn holiday_name(date: NaiveDate) -> Option<&'static str> {
    let key = date.format("%Y-%m-%d").to_string();
    HOLIDAYS
        .iter()
        .find(|(day, _)| *day == key)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holiday_lookup() {
        let christmas = NaiveDate::from_ymd_opt(2026, 12, 25).unwrap();
        let ordinary = NaiveDate::from_ymd_opt(2026, 12, 24).unwrap();
        assert_eq!(holiday_name(christmas), Some("Navidad"));
        assert_eq!(holiday_name(ordinary), None);
    }

    #[test]
    fn test_seed_profile_becomes_main() {
        let raw = r#"{"subtitle":"2º ESO","schedule":{"1":[{"id":"mon_1","time":"08:30-09:25","subject":"Lengua"}]}}"#;
        let profile = SeedProfile::from_json(raw).unwrap().into_profile();
        assert_eq!(profile.id, "main");
        assert_eq!(profile.name, DEFAULT_PROFILE_NAME);
        assert_eq!(profile.schedule.day(1)[0].subject.as_deref(), Some("Lengua"));
    }

    #[test]
    fn test_default_profile_is_empty_main() {
        let profile = default_profile();
        assert_eq!(profile.id, "main");
        assert!(profile.schedule.0.is_empty());
    }
}
