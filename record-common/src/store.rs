//! Sessions and their leaderboard entries.
//!
//! A session is keyed by the identity of the file it came from. Importing
//! the same file again finds the existing row and writes nothing, so an
//! ingestion run can be repeated over the same directory indefinitely.
use sqlx::sqlite::SqliteExecutor;
use sqlx::{Connection, SqliteConnection};

use crate::error::{query_error, StoreResult};
use crate::types::{Entry, EntryLine, Millis, Session, SessionDescriptor, SessionId, SessionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported(SessionId),
    /// The source was imported before, under this id. Nothing was written.
    AlreadyImported(SessionId),
}

/// Competition rank of a lap time among the best laps of every identified
/// driver on a track: the number of drivers strictly faster, plus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverRank {
    pub rank: i64,
    pub total_drivers: i64,
}

/// Insert a session and all of its entries, unless the source was already imported.
///
/// The session row and its entries are written in one transaction (a savepoint
/// when `conn` is already inside one), so a partial import is never visible.
pub async fn import_session(
    conn: &mut SqliteConnection,
    session: &SessionDescriptor,
    entries: &[EntryLine],
) -> StoreResult<ImportOutcome> {
    let mut tx = conn.begin().await.map_err(query_error("BEGIN"))?;

    let existing: Option<(SessionId,)> =
        sqlx::query_as("SELECT session_id FROM sessions WHERE source_identity = ?1")
            .bind(&session.source_identity)
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error("SELECT"))?;

    if let Some((session_id,)) = existing {
        return Ok(ImportOutcome::AlreadyImported(session_id));
    }

    let session_id = sqlx::query(
        r#"
INSERT INTO sessions
    (source_identity, session_type, track, server_name, is_wet, session_index,
     race_weekend_index, started_at, observed_at_utc)
VALUES
    (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&session.source_identity)
    .bind(session.session_type)
    .bind(&session.track)
    .bind(&session.server_name)
    .bind(session.is_wet)
    .bind(session.session_index)
    .bind(session.race_weekend_index)
    .bind(session.started_at)
    .bind(session.observed_at)
    .execute(&mut *tx)
    .await
    .map_err(query_error("INSERT"))?
    .last_insert_rowid();
    let session_id = SessionId(session_id);

    for line in entries {
        sqlx::query(
            r#"
INSERT INTO entries
    (session_id, position, car_id, race_number, car_model, cup_category, car_group,
     player_id, first_name, last_name, short_name,
     best_lap_ms, total_time_ms, lap_count, best_splits_ms, missing_mandatory_pitstop)
VALUES
    (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(session_id)
        .bind(line.position)
        .bind(line.car.car_id)
        .bind(line.car.race_number)
        .bind(line.car.car_model)
        .bind(line.car.cup_category)
        .bind(&line.car.car_group)
        .bind(&line.driver.player_id)
        .bind(&line.driver.first_name)
        .bind(&line.driver.last_name)
        .bind(&line.driver.short_name)
        .bind(line.best_lap_ms)
        .bind(line.total_time_ms)
        .bind(line.lap_count)
        .bind(&line.best_splits_ms)
        .bind(line.missing_mandatory_pitstop)
        .execute(&mut *tx)
        .await
        .map_err(query_error("INSERT"))?;
    }

    tx.commit().await.map_err(query_error("COMMIT"))?;

    Ok(ImportOutcome::Imported(session_id))
}

pub async fn session<'c, E>(executor: E, session_id: SessionId) -> StoreResult<Option<Session>>
where
    E: SqliteExecutor<'c>,
{
    sqlx::query_as(
        r#"
SELECT
    session_id, source_identity, session_type, track, server_name, is_wet,
    session_index, race_weekend_index, started_at, observed_at_utc
FROM sessions
WHERE session_id = ?1
        "#,
    )
    .bind(session_id)
    .fetch_optional(executor)
    .await
    .map_err(query_error("SELECT"))
}

/// Entries of a session in finishing order.
pub async fn entries<'c, E>(executor: E, session_id: SessionId) -> StoreResult<Vec<Entry>>
where
    E: SqliteExecutor<'c>,
{
    sqlx::query_as(
        r#"
SELECT
    entry_id, session_id, position, car_id, race_number, car_model, cup_category, car_group,
    player_id, first_name, last_name, short_name,
    best_lap_ms, total_time_ms, lap_count, best_splits_ms, missing_mandatory_pitstop
FROM entries
WHERE session_id = ?1
ORDER BY position ASC
        "#,
    )
    .bind(session_id)
    .fetch_all(executor)
    .await
    .map_err(query_error("SELECT"))
}

/// A driver's best lap on a track and session type, ignoring one session.
pub async fn driver_best_excluding<'c, E>(
    executor: E,
    player_id: &str,
    track: &str,
    session_type: SessionType,
    excluded: SessionId,
) -> StoreResult<Option<Millis>>
where
    E: SqliteExecutor<'c>,
{
    let (best,): (Option<Millis>,) = sqlx::query_as(
        r#"
SELECT MIN(e.best_lap_ms)
FROM entries e
JOIN sessions s ON e.session_id = s.session_id
WHERE e.player_id = ?1
  AND s.track = ?2
  AND s.session_type = ?3
  AND e.best_lap_ms IS NOT NULL
  AND e.session_id != ?4
        "#,
    )
    .bind(player_id)
    .bind(track)
    .bind(session_type)
    .bind(excluded)
    .fetch_one(executor)
    .await
    .map_err(query_error("SELECT"))?;

    Ok(best)
}

/// Rank `lap_ms` among each identified driver's best lap on a track and session type.
///
/// Ties share a rank and the next rank is skipped. `excluded_player` leaves one
/// driver out of the "strictly faster" count, so a driver's own laps never rank
/// ahead of them.
pub async fn driver_rank<'c, E>(
    executor: E,
    track: &str,
    session_type: SessionType,
    lap_ms: Millis,
    excluded_player: Option<&str>,
) -> StoreResult<DriverRank>
where
    E: SqliteExecutor<'c>,
{
    let (rank, total_drivers): (i64, i64) = sqlx::query_as(
        r#"
WITH driver_bests AS (
    SELECT e.player_id, MIN(e.best_lap_ms) AS best_lap_ms
    FROM entries e
    JOIN sessions s ON e.session_id = s.session_id
    WHERE s.track = ?1
      AND s.session_type = ?2
      AND e.best_lap_ms IS NOT NULL
      AND e.player_id IS NOT NULL
    GROUP BY e.player_id
)
SELECT
    (SELECT COUNT(*) FROM driver_bests
     WHERE best_lap_ms < ?3 AND (?4 IS NULL OR player_id != ?4)) + 1,
    (SELECT COUNT(*) FROM driver_bests)
        "#,
    )
    .bind(track)
    .bind(session_type)
    .bind(lap_ms)
    .bind(excluded_player)
    .fetch_one(executor)
    .await
    .map_err(query_error("SELECT"))?;

    Ok(DriverRank {
        rank,
        total_drivers,
    })
}
