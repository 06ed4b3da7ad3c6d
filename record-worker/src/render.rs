//! Discord embed payloads for each kind of announcement.
use chrono::{DateTime, Utc};
use serde::Serialize;

use record_common::announcements::NewRecordEvent;
use record_common::store::DriverRank;
use record_common::types::{Entry, Millis, Session};

const GOLD: u32 = 0xF1C40F;
const GREEN: u32 = 0x2ECC71;
const BLUE: u32 = 0x3498DB;

const MAX_STANDINGS: usize = 10;
const STANDINGS_PER_FIELD: usize = 5;
const DEFAULT_SERVER_NAME: &str = "ACC Server";

/// The body of a webhook execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedMessage {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    fn new(name: &str, value: impl Into<String>, inline: bool) -> Self {
        Self {
            name: name.to_owned(),
            value: value.into(),
            inline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

pub fn track_record(event: &NewRecordEvent) -> RenderedMessage {
    let mut fields = lap_fields(event);
    if let Some(previous) = event.previous_best_ms {
        fields.push(EmbedField::new(
            "📉 Improvement",
            format!(
                "{} (was {})",
                fmt_split_ms(previous - event.best_lap_ms),
                fmt_ms(previous)
            ),
            false,
        ));
    }

    RenderedMessage {
        embeds: vec![Embed {
            title: "🏆 NEW TRACK RECORD! 🏆".to_owned(),
            description: Some(lap_description(event)),
            color: GOLD,
            fields,
            footer: None,
            timestamp: Some(event.set_at.to_rfc3339()),
        }],
    }
}

pub fn personal_best(
    event: &NewRecordEvent,
    rank: DriverRank,
    previous_rank: Option<i64>,
) -> RenderedMessage {
    let mut fields = lap_fields(event);

    let standing = match previous_rank {
        Some(previous) if previous != rank.rank => {
            format!("P{} of {} (up from P{previous})", rank.rank, rank.total_drivers)
        }
        _ => format!("P{} of {}", rank.rank, rank.total_drivers),
    };
    fields.push(EmbedField::new("📈 Standing", standing, true));

    if let Some(previous) = event.previous_best_ms {
        fields.push(EmbedField::new(
            "⏪ Previous Best",
            format!(
                "{} ({})",
                fmt_ms(previous),
                fmt_split_ms(previous - event.best_lap_ms)
            ),
            true,
        ));
    }

    RenderedMessage {
        embeds: vec![Embed {
            title: "🎯 PERSONAL BEST ACHIEVED! 🎯".to_owned(),
            description: Some(lap_description(event)),
            color: GREEN,
            fields,
            footer: None,
            timestamp: Some(event.set_at.to_rfc3339()),
        }],
    }
}

/// Standings of a finished race. `None` when the session has no entries.
pub fn race_summary(session: &Session, entries: &[Entry]) -> Option<RenderedMessage> {
    let leader = entries.first()?;
    let descriptor = &session.descriptor;

    let conditions = if descriptor.is_wet { "🌧️ Wet" } else { "☀️ Dry" };
    let description = format!(
        "📅 {} | 🔄 {} Laps | {conditions}",
        discord_timestamp(descriptor.observed_at),
        leader.line.lap_count.unwrap_or_default(),
    );

    let leader_total = leader.line.total_time_ms;
    let leader_best = leader.line.best_lap_ms;

    let standings: Vec<String> = entries
        .iter()
        .take(MAX_STANDINGS)
        .map(|entry| standing_line(entry, leader_total, leader_best))
        .collect();

    let mut fields = if standings.len() > STANDINGS_PER_FIELD {
        vec![
            EmbedField::new(
                "📊 Final Standings (1-5)",
                standings[..STANDINGS_PER_FIELD].join("\n"),
                false,
            ),
            EmbedField::new(
                "📊 Final Standings (6-10)",
                standings[STANDINGS_PER_FIELD..].join("\n"),
                false,
            ),
        ]
    } else {
        vec![EmbedField::new("📊 Final Standings", standings.join("\n"), false)]
    };

    let fastest = entries
        .iter()
        .filter_map(|entry| entry.line.best_lap_ms.map(|lap| (lap, entry)))
        .min_by_key(|(lap, _)| *lap);
    if let Some((lap, entry)) = fastest {
        fields.push(EmbedField::new(
            "⚡ Fastest Lap",
            format!(
                "**{}** - {} ({})",
                fmt_ms(lap),
                driver_name(entry),
                car_model_name(entry.line.car.car_model)
            ),
            false,
        ));
    }

    let server_name = descriptor
        .server_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_SERVER_NAME);

    Some(RenderedMessage {
        embeds: vec![Embed {
            title: format!("🏁 Race Results - {}", track_title(&descriptor.track)),
            description: Some(description),
            color: BLUE,
            fields,
            footer: Some(EmbedFooter {
                text: server_name.to_owned(),
            }),
            timestamp: Some(descriptor.observed_at.to_rfc3339()),
        }],
    })
}

fn lap_description(event: &NewRecordEvent) -> String {
    format!("**{}** - {}", event.track, event.session_type.label())
}

fn lap_fields(event: &NewRecordEvent) -> Vec<EmbedField> {
    vec![
        EmbedField::new(
            "👤 Driver",
            event
                .holder
                .display_name()
                .unwrap_or_else(|| "Unknown driver".to_owned()),
            true,
        ),
        EmbedField::new("⏱️ Time", format!("**{}**", fmt_ms(event.best_lap_ms)), true),
        EmbedField::new("🚗 Car", car_model_name(event.holder.car_model), true),
        EmbedField::new("📅 Set On", discord_timestamp(event.set_at), false),
    ]
}

fn standing_line(
    entry: &Entry,
    leader_total: Option<Millis>,
    leader_best: Option<Millis>,
) -> String {
    let line = &entry.line;
    let position = line.position;

    let gap = match (position, line.total_time_ms, leader_total) {
        (1, _, _) => "Leader".to_owned(),
        (_, Some(total), Some(leader)) => format!("+{}", fmt_ms(total - leader)),
        _ => "N/A".to_owned(),
    };

    let best = match (line.best_lap_ms, leader_best) {
        (Some(lap), Some(leader)) if position == 1 || lap == leader => {
            format!("**{}** 🔥", fmt_ms(lap))
        }
        (Some(lap), Some(leader)) => format!("{} ({})", fmt_ms(lap), fmt_split_ms(lap - leader)),
        (Some(lap), None) => fmt_ms(lap),
        (None, _) => "No time".to_owned(),
    };

    let name = driver_name(entry);
    let heading = match position {
        1 => format!("🥇 **1.** **{name}**"),
        2 => format!("🥈 **2.** **{name}**"),
        3 => format!("🥉 **3.** **{name}**"),
        _ => format!("**{position}.** {name}"),
    };

    let race_number = line
        .car
        .race_number
        .map(|number| number.to_string())
        .unwrap_or_else(|| "?".to_owned());

    format!(
        "{heading}\n   `{}` #{race_number} | {gap} | Best: {best}",
        car_model_name(line.car.car_model)
    )
}

fn driver_name(entry: &Entry) -> String {
    entry
        .line
        .driver
        .display_name()
        .unwrap_or_else(|| "Unknown".to_owned())
}

/// Milliseconds as `m:ss.mmm`.
pub fn fmt_ms(ms: Millis) -> String {
    let ms = ms.max(0);
    format!("{}:{:02}.{:03}", ms / 60_000, (ms % 60_000) / 1000, ms % 1000)
}

/// A lap time difference as `-mm:ss.mmm`. Positive differences are time
/// lost and print with a minus sign; zero and gains print with a plus sign.
pub fn fmt_split_ms(diff: Millis) -> String {
    let sign = if diff > 0 { "-" } else { "+" };
    let abs = diff.abs();
    format!(
        "{sign}{:02}:{:02}.{:03}",
        abs / 60_000,
        (abs % 60_000) / 1000,
        abs % 1000
    )
}

/// Discord renders `<t:unix:f>` in each reader's own timezone.
pub fn discord_timestamp(at: DateTime<Utc>) -> String {
    format!("<t:{}:f>", at.timestamp())
}

/// `nurburgring_24h` becomes `Nurburgring 24h`.
pub fn track_title(track: &str) -> String {
    track
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn car_model_name(car_model: Option<i64>) -> String {
    let Some(id) = car_model else {
        return "Unknown".to_owned();
    };

    let name = match id {
        0 => "Porsche 991 GT3 R",
        1 => "Mercedes-AMG GT3",
        2 => "Ferrari 488 GT3",
        3 => "Audi R8 LMS",
        4 => "Lamborghini Huracan GT3",
        5 => "McLaren 650S GT3",
        6 => "Nissan GT-R Nismo GT3 2018",
        7 => "BMW M6 GT3",
        8 => "Bentley Continental GT3 2018",
        9 => "Porsche 991II GT3 Cup",
        10 => "Nissan GT-R Nismo GT3 2017",
        11 => "Bentley Continental GT3 2016",
        12 => "Aston Martin V12 Vantage GT3",
        13 => "Lamborghini Gallardo R-EX",
        14 => "Jaguar G3",
        15 => "Lexus RC F GT3",
        16 => "Lamborghini Huracan Evo (2019)",
        17 => "Honda NSX GT3",
        18 => "Lamborghini Huracan SuperTrofeo",
        19 => "Audi R8 LMS Evo (2019)",
        20 => "AMR V8 Vantage (2019)",
        21 => "Honda NSX Evo (2019)",
        22 => "McLaren 720S GT3 (2019)",
        23 => "Porsche 911II GT3 R (2019)",
        24 => "Ferrari 488 GT3 Evo 2020",
        25 => "Mercedes-AMG GT3 2020",
        26 => "Ferrari 488 Challenge Evo",
        27 => "BMW M2 CS Racing",
        28 => "Porsche 911 GT3 Cup (Type 992)",
        29 => "Lamborghini Huracan Super Trofeo EVO2",
        30 => "BMW M4 GT3",
        31 => "Audi R8 LMS GT3 evo II",
        32 => "Ferrari 296 GT3",
        33 => "Lamborghini Huracan Evo2",
        34 => "Porsche 992 GT3 R",
        35 => "McLaren 720S GT3 Evo 2023",
        36 => "Ford Mustang GT3",
        50 => "Alpine A110 GT4",
        51 => "AMR V8 Vantage GT4",
        52 => "Audi R8 LMS GT4",
        53 => "BMW M4 GT4",
        55 => "Chevrolet Camaro GT4",
        56 => "Ginetta G55 GT4",
        57 => "KTM X-Bow GT4",
        58 => "Maserati MC GT4",
        59 => "McLaren 570S GT4",
        60 => "Mercedes-AMG GT4",
        61 => "Porsche 718 Cayman GT4",
        80 => "Audi R8 LMS GT2",
        82 => "KTM XBOW GT2",
        83 => "Maserati MC20 GT2",
        84 => "Mercedes AMG GT2",
        85 => "Porsche 911 GT2 RS CS Evo",
        86 => "Porsche 935",
        unknown => return format!("Unknown ({unknown})"),
    };

    name.to_owned()
}
