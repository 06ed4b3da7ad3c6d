use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::types::{
    CarIdentity, DriverIdentity, EntryLine, Millis, Record, SessionDescriptor, SessionId,
    SessionType,
};

pub fn observed_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 21, 5, 0)
        .single()
        .unwrap_or_default()
}

pub fn started_at() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|date| date.and_hms_opt(20, 15, 0))
        .unwrap_or_default()
}

/// A dry session on `track` with every optional header field filled in.
pub fn descriptor(source: &str, session_type: SessionType, track: &str) -> SessionDescriptor {
    SessionDescriptor {
        source_identity: source.to_owned(),
        session_type,
        track: track.to_owned(),
        server_name: Some("Thursday Night League".to_owned()),
        is_wet: false,
        session_index: Some(1),
        race_weekend_index: Some(0),
        started_at: started_at(),
        observed_at: observed_at(),
    }
}

/// A leaderboard line in a McLaren 720S GT3 Evo with the race number matching the position.
pub fn line(
    position: i64,
    player_id: Option<&str>,
    first_name: &str,
    last_name: &str,
    best_lap_ms: Option<Millis>,
) -> EntryLine {
    EntryLine {
        position,
        car: CarIdentity {
            car_id: Some(1000 + position),
            race_number: Some(position),
            car_model: Some(35),
            cup_category: Some(0),
            car_group: Some("GT3".to_owned()),
        },
        driver: DriverIdentity {
            player_id: player_id.map(str::to_owned),
            first_name: Some(first_name.to_owned()),
            last_name: Some(last_name.to_owned()),
            short_name: Some(last_name.chars().take(3).collect::<String>().to_uppercase()),
        },
        best_lap_ms,
        total_time_ms: best_lap_ms.map(|lap| lap * 20),
        lap_count: best_lap_ms.map(|_| 20),
        best_splits_ms: None,
        missing_mandatory_pitstop: false,
    }
}

pub fn record_candidate(
    track: &str,
    session_type: SessionType,
    line: &EntryLine,
    session_id: SessionId,
) -> Record {
    Record {
        track: track.to_owned(),
        session_type,
        best_lap_ms: line.best_lap_ms.unwrap_or(Millis::MAX),
        holder: line.snapshot(),
        set_session_id: session_id,
        set_at: observed_at(),
    }
}
