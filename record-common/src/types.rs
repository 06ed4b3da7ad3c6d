use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::error::StoreError;

/// Lap and race times are whole milliseconds.
pub type Millis = i64;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session types as encoded in result file names and stored in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum SessionType {
    #[sqlx(rename = "FP")]
    #[serde(rename = "FP")]
    Practice,
    #[sqlx(rename = "Q")]
    #[serde(rename = "Q")]
    Qualifying,
    #[sqlx(rename = "R")]
    #[serde(rename = "R")]
    Race,
}

impl SessionType {
    pub fn code(&self) -> &'static str {
        match self {
            SessionType::Practice => "FP",
            SessionType::Qualifying => "Q",
            SessionType::Race => "R",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionType::Practice => "Practice",
            SessionType::Qualifying => "Qualifying",
            SessionType::Race => "Race",
        }
    }

    /// Practice sessions never set records or personal bests.
    pub fn tracks_records(&self) -> bool {
        !matches!(self, SessionType::Practice)
    }
}

impl FromStr for SessionType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_ref() {
            "FP" => Ok(SessionType::Practice),
            "Q" => Ok(SessionType::Qualifying),
            "R" => Ok(SessionType::Race),
            invalid => Err(StoreError::ParseSessionTypeError(invalid.to_owned())),
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Everything known about a session before it is stored.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SessionDescriptor {
    /// Absolute path of the result file. Unique across all sessions.
    pub source_identity: String,
    pub session_type: SessionType,
    pub track: String,
    pub server_name: Option<String>,
    pub is_wet: bool,
    pub session_index: Option<i64>,
    pub race_weekend_index: Option<i64>,
    /// Date and time encoded in the file name.
    pub started_at: NaiveDateTime,
    /// Modification time of the result file.
    #[sqlx(rename = "observed_at_utc")]
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Session {
    #[sqlx(rename = "session_id")]
    pub id: SessionId,
    #[sqlx(flatten)]
    pub descriptor: SessionDescriptor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CarIdentity {
    pub car_id: Option<i64>,
    pub race_number: Option<i64>,
    pub car_model: Option<i64>,
    pub cup_category: Option<i64>,
    pub car_group: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DriverIdentity {
    pub player_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub short_name: Option<String>,
}

impl DriverIdentity {
    /// "First Last" when either is present, else the short name.
    pub fn display_name(&self) -> Option<String> {
        display_name(&self.first_name, &self.last_name, &self.short_name)
    }
}

/// One driver's line on a session leaderboard, with sentinel times already removed.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct EntryLine {
    /// 1-based leaderboard position.
    pub position: i64,
    #[sqlx(flatten)]
    pub car: CarIdentity,
    #[sqlx(flatten)]
    pub driver: DriverIdentity,
    pub best_lap_ms: Option<Millis>,
    pub total_time_ms: Option<Millis>,
    pub lap_count: Option<i64>,
    pub best_splits_ms: Option<Json<Vec<Millis>>>,
    pub missing_mandatory_pitstop: bool,
}

impl EntryLine {
    pub fn snapshot(&self) -> DriverSnapshot {
        DriverSnapshot {
            player_id: self.driver.player_id.clone(),
            first_name: self.driver.first_name.clone(),
            last_name: self.driver.last_name.clone(),
            short_name: self.driver.short_name.clone(),
            car_model: self.car.car_model,
            race_number: self.car.race_number,
            cup_category: self.car.cup_category,
        }
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Entry {
    pub entry_id: i64,
    pub session_id: SessionId,
    #[sqlx(flatten)]
    pub line: EntryLine,
}

/// Driver and car at the moment a lap was set. Copied into records and
/// announcements so they stay readable without joining back to entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DriverSnapshot {
    pub player_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub short_name: Option<String>,
    pub car_model: Option<i64>,
    pub race_number: Option<i64>,
    pub cup_category: Option<i64>,
}

impl DriverSnapshot {
    pub fn display_name(&self) -> Option<String> {
        display_name(&self.first_name, &self.last_name, &self.short_name)
    }
}

fn display_name(
    first: &Option<String>,
    last: &Option<String>,
    short: &Option<String>,
) -> Option<String> {
    let first = first.as_deref().map(str::trim).unwrap_or_default();
    let last = last.as_deref().map(str::trim).unwrap_or_default();

    if !first.is_empty() || !last.is_empty() {
        return Some(format!("{first} {last}").trim().to_owned());
    }

    short
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// The current best lap for a (track, session type) pair.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Record {
    pub track: String,
    pub session_type: SessionType,
    pub best_lap_ms: Millis,
    #[sqlx(flatten)]
    pub holder: DriverSnapshot,
    pub set_session_id: SessionId,
    #[sqlx(rename = "set_at_utc")]
    pub set_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_type_from_file_name_code() {
        assert_eq!("FP".parse::<SessionType>().unwrap(), SessionType::Practice);
        assert_eq!("q".parse::<SessionType>().unwrap(), SessionType::Qualifying);
        assert_eq!("R".parse::<SessionType>().unwrap(), SessionType::Race);
        assert!("RACE".parse::<SessionType>().is_err());
    }

    #[test]
    fn test_only_practice_is_excluded_from_records() {
        assert!(!SessionType::Practice.tracks_records());
        assert!(SessionType::Qualifying.tracks_records());
        assert!(SessionType::Race.tracks_records());
    }

    #[test]
    fn test_display_name_prefers_full_name() {
        let driver = DriverIdentity {
            player_id: Some("S76561198000000001".to_owned()),
            first_name: Some(" Lewis ".to_owned()),
            last_name: Some("Hamilton".to_owned()),
            short_name: Some("HAM".to_owned()),
        };
        assert_eq!(driver.display_name().as_deref(), Some("Lewis Hamilton"));

        let only_last = DriverIdentity {
            last_name: Some("Verstappen".to_owned()),
            ..Default::default()
        };
        assert_eq!(only_last.display_name().as_deref(), Some("Verstappen"));
    }

    #[test]
    fn test_display_name_falls_back_to_short_name() {
        let snapshot = DriverSnapshot {
            first_name: Some("  ".to_owned()),
            short_name: Some("VER".to_owned()),
            ..Default::default()
        };
        assert_eq!(snapshot.display_name().as_deref(), Some("VER"));
        assert_eq!(DriverSnapshot::default().display_name(), None);
    }
}
