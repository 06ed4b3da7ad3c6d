//! The current best lap per (track, session type).
use sqlx::sqlite::SqliteExecutor;

use crate::error::{query_error, StoreResult};
use crate::types::{Record, SessionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub replaced: bool,
}

pub async fn current_record<'c, E>(
    executor: E,
    track: &str,
    session_type: SessionType,
) -> StoreResult<Option<Record>>
where
    E: SqliteExecutor<'c>,
{
    sqlx::query_as(
        r#"
SELECT
    track, session_type, best_lap_ms,
    player_id, first_name, last_name, short_name, car_model, race_number, cup_category,
    set_session_id, set_at_utc
FROM records
WHERE track = ?1 AND session_type = ?2
        "#,
    )
    .bind(track)
    .bind(session_type)
    .fetch_optional(executor)
    .await
    .map_err(query_error("SELECT"))
}

/// Store `candidate` as the record for its pair if there is none yet, or if it is
/// strictly faster than the current one. Equal times never replace.
///
/// The comparison and the write are one statement, so two writers can't both win.
pub async fn upsert_if_better<'c, E>(executor: E, candidate: &Record) -> StoreResult<UpsertOutcome>
where
    E: SqliteExecutor<'c>,
{
    let result = sqlx::query(
        r#"
INSERT INTO records
    (track, session_type, best_lap_ms,
     player_id, first_name, last_name, short_name, car_model, race_number, cup_category,
     set_session_id, set_at_utc)
VALUES
    (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
ON CONFLICT (track, session_type) DO UPDATE SET
    best_lap_ms = excluded.best_lap_ms,
    player_id = excluded.player_id,
    first_name = excluded.first_name,
    last_name = excluded.last_name,
    short_name = excluded.short_name,
    car_model = excluded.car_model,
    race_number = excluded.race_number,
    cup_category = excluded.cup_category,
    set_session_id = excluded.set_session_id,
    set_at_utc = excluded.set_at_utc
WHERE excluded.best_lap_ms < records.best_lap_ms
        "#,
    )
    .bind(&candidate.track)
    .bind(candidate.session_type)
    .bind(candidate.best_lap_ms)
    .bind(&candidate.holder.player_id)
    .bind(&candidate.holder.first_name)
    .bind(&candidate.holder.last_name)
    .bind(&candidate.holder.short_name)
    .bind(candidate.holder.car_model)
    .bind(candidate.holder.race_number)
    .bind(candidate.holder.cup_category)
    .bind(candidate.set_session_id)
    .bind(candidate.set_at)
    .execute(executor)
    .await
    .map_err(query_error("UPSERT"))?;

    Ok(UpsertOutcome {
        replaced: result.rows_affected() == 1,
    })
}
