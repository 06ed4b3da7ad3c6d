//! Decode one server result file into a session and its leaderboard.
//!
//! Parsing is pure: the caller reads the file and supplies its identity, name
//! and modification time. Raw "no time" encodings are removed here and never
//! reach the store.
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use sqlx::types::Json;
use thiserror::Error;

use record_common::types::{
    CarIdentity, DriverIdentity, EntryLine, Millis, SessionDescriptor, SessionType,
};

/// Raw lap/race time values the server writes when a driver has no time.
const SENTINEL_TIMES: [i64; 2] = [0, 2_147_483_647];

static FILE_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{6})_(\d{6})_(FP|Q|R)\.[a-z0-9]+$").unwrap()
});

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed result file: {reason}")]
    MalformedInput { reason: String },
    #[error("result file has neither leaderboard lines nor laps")]
    EmptyTemplate,
}

impl ParseError {
    fn malformed(reason: impl Into<String>) -> Self {
        ParseError::MalformedInput {
            reason: reason.into(),
        }
    }
}

/// Where a payload came from.
#[derive(Debug, Clone, Copy)]
pub struct ResultSource<'a> {
    /// Absolute path of the file.
    pub identity: &'a str,
    pub file_name: &'a str,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResult {
    pub session: SessionDescriptor,
    pub entries: Vec<EntryLine>,
}

/// Session start time and type encoded in a `{YYMMDD}_{HHMMSS}_{FP|Q|R}.<ext>` name.
pub fn parse_file_name(file_name: &str) -> Result<(NaiveDateTime, SessionType), ParseError> {
    let captures = FILE_NAME_REGEX
        .captures(file_name)
        .ok_or_else(|| ParseError::malformed(format!("unexpected file name {file_name}")))?;

    let started_at = NaiveDateTime::parse_from_str(
        &format!("20{}{}", &captures[1], &captures[2]),
        "%Y%m%d%H%M%S",
    )
    .map_err(|e| ParseError::malformed(format!("invalid date in file name {file_name}: {e}")))?;

    let session_type = captures[3]
        .parse::<SessionType>()
        .map_err(|e| ParseError::malformed(e.to_string()))?;

    Ok((started_at, session_type))
}

pub fn parse(source: ResultSource<'_>, payload: &[u8]) -> Result<ParsedResult, ParseError> {
    let (started_at, session_type) = parse_file_name(source.file_name)?;

    let text = decode_text(payload)?;
    let raw: RawResult = serde_json::from_str(text.trim_start_matches('\u{feff}'))
        .map_err(|e| ParseError::malformed(format!("invalid JSON: {e}")))?;

    let session_result = raw.session_result.unwrap_or_default();
    let lines = session_result.leader_board_lines.unwrap_or_default();
    let has_laps = raw.laps.is_some_and(|laps| !laps.is_empty());

    if lines.is_empty() && !has_laps {
        return Err(ParseError::EmptyTemplate);
    }

    let track = raw
        .track_name
        .map(|track| track.trim().to_owned())
        .filter(|track| !track.is_empty())
        .ok_or_else(|| ParseError::malformed("missing trackName"))?;

    let session = SessionDescriptor {
        source_identity: source.identity.to_owned(),
        session_type,
        track,
        server_name: raw.server_name,
        is_wet: session_result.is_wet_session.is_some_and(Flag::is_set),
        session_index: raw.session_index,
        race_weekend_index: raw.race_weekend_index,
        started_at,
        observed_at: source.observed_at,
    };

    let entries = lines
        .into_iter()
        .zip(1..)
        .map(|(line, position)| line.into_entry(position))
        .collect();

    Ok(ParsedResult { session, entries })
}

/// Result files are UTF-16LE, usually with a BOM. UTF-16BE with a BOM and UTF-8
/// are accepted too.
fn decode_text(payload: &[u8]) -> Result<String, ParseError> {
    match payload {
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => decode_utf8(rest),
        // JSON starts with an ASCII character, so a zero high byte means UTF-16LE.
        [_, 0x00, ..] => decode_utf16(payload, u16::from_le_bytes),
        _ => decode_utf8(payload),
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, ParseError> {
    if bytes.len() % 2 != 0 {
        return Err(ParseError::malformed("odd number of bytes in UTF-16 payload"));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();

    String::from_utf16(&units).map_err(|e| ParseError::malformed(format!("invalid UTF-16: {e}")))
}

fn decode_utf8(bytes: &[u8]) -> Result<String, ParseError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ParseError::malformed(format!("invalid UTF-8: {e}")))
}

fn normalize_time(raw: Option<i64>) -> Option<Millis> {
    raw.filter(|time| !SENTINEL_TIMES.contains(time))
}

/// Splits are only kept when every sector has a real time.
fn normalize_splits(raw: Option<Vec<i64>>) -> Option<Json<Vec<Millis>>> {
    raw.filter(|splits| !splits.is_empty())
        .filter(|splits| splits.iter().all(|split| !SENTINEL_TIMES.contains(split)))
        .map(Json)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResult {
    track_name: Option<String>,
    server_name: Option<String>,
    session_index: Option<i64>,
    race_weekend_index: Option<i64>,
    session_result: Option<RawSessionResult>,
    laps: Option<Vec<serde_json::Value>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawSessionResult {
    is_wet_session: Option<Flag>,
    leader_board_lines: Option<Vec<RawLeaderboardLine>>,
}

/// A boolean the server writes either as `true`/`false` or as `1`/`0`.
#[derive(Deserialize, Clone, Copy)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Number(i64),
}

impl Flag {
    fn is_set(self) -> bool {
        match self {
            Flag::Bool(value) => value,
            Flag::Number(value) => value != 0,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLeaderboardLine {
    #[serde(default)]
    car: RawCar,
    #[serde(default)]
    current_driver: RawDriver,
    #[serde(default)]
    timing: RawTiming,
    missing_mandatory_pitstop: Option<Flag>,
}

impl RawLeaderboardLine {
    fn into_entry(self, position: i64) -> EntryLine {
        EntryLine {
            position,
            car: CarIdentity {
                car_id: self.car.car_id,
                race_number: self.car.race_number,
                car_model: self.car.car_model,
                cup_category: self.car.cup_category,
                car_group: self.car.car_group,
            },
            driver: DriverIdentity {
                player_id: self.current_driver.player_id.filter(|id| !id.is_empty()),
                first_name: self.current_driver.first_name,
                last_name: self.current_driver.last_name,
                short_name: self.current_driver.short_name,
            },
            best_lap_ms: normalize_time(self.timing.best_lap),
            total_time_ms: normalize_time(self.timing.total_time),
            lap_count: self.timing.lap_count,
            best_splits_ms: normalize_splits(self.timing.best_splits),
            missing_mandatory_pitstop: self.missing_mandatory_pitstop.is_some_and(Flag::is_set),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawCar {
    car_id: Option<i64>,
    race_number: Option<i64>,
    car_model: Option<i64>,
    cup_category: Option<i64>,
    car_group: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawDriver {
    player_id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    short_name: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawTiming {
    best_lap: Option<i64>,
    total_time: Option<i64>,
    lap_count: Option<i64>,
    best_splits: Option<Vec<i64>>,
}
