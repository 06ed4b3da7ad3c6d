//! Durable queue of announcements waiting to be posted.
//!
//! Every announcement has a natural key and is inserted at most once. Delivery
//! is a single terminal transition: the first external message id written to a
//! row stays there.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteExecutor, SqlitePool, SqliteRow};
use sqlx::FromRow;

use crate::error::{query_error, StoreError, StoreResult};
use crate::types::{DriverSnapshot, Millis, SessionId, SessionType};

// Millisecond precision keeps enqueue times sortable as text.
const NOW_UTC: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct AnnouncementId(pub i64);

impl fmt::Display for AnnouncementId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum AnnouncementKind {
    #[sqlx(rename = "TR")]
    #[serde(rename = "TR")]
    TrackRecord,
    #[sqlx(rename = "PB")]
    #[serde(rename = "PB")]
    PersonalBest,
}

impl FromStr for AnnouncementKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TR" => Ok(AnnouncementKind::TrackRecord),
            "PB" => Ok(AnnouncementKind::PersonalBest),
            invalid => Err(StoreError::ParseAnnouncementKindError(invalid.to_owned())),
        }
    }
}

impl fmt::Display for AnnouncementKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AnnouncementKind::TrackRecord => write!(f, "TR"),
            AnnouncementKind::PersonalBest => write!(f, "PB"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub inserted: bool,
}

/// A new track record or personal best. Keyed by (track, session type, lap time, kind).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct NewRecordEvent {
    pub track: String,
    pub session_type: SessionType,
    pub best_lap_ms: Millis,
    pub kind: AnnouncementKind,
    #[sqlx(flatten)]
    pub holder: DriverSnapshot,
    pub session_id: SessionId,
    #[sqlx(rename = "set_at_utc")]
    pub set_at: DateTime<Utc>,
    /// The record a track record replaced, or the driver's best before a personal best.
    /// Captured when the event is detected.
    pub previous_best_ms: Option<Millis>,
}

/// A finished race, keyed by its session.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct NewRaceSummary {
    pub session_id: SessionId,
    pub track: String,
    #[sqlx(rename = "finished_at_utc")]
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RecordEvent {
    #[sqlx(rename = "announcement_id")]
    pub id: AnnouncementId,
    #[sqlx(flatten)]
    pub event: NewRecordEvent,
    #[sqlx(rename = "enqueued_at_utc")]
    pub enqueued_at: DateTime<Utc>,
    pub delivered_message_id: Option<String>,
    #[sqlx(rename = "delivered_at_utc")]
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RaceSummaryEvent {
    #[sqlx(rename = "announcement_id")]
    pub id: AnnouncementId,
    #[sqlx(flatten)]
    pub summary: NewRaceSummary,
    #[sqlx(rename = "enqueued_at_utc")]
    pub enqueued_at: DateTime<Utc>,
    pub delivered_message_id: Option<String>,
    #[sqlx(rename = "delivered_at_utc")]
    pub delivered_at: Option<DateTime<Utc>>,
}

/// A row type stored in one of the announcement tables.
pub trait Announcement: for<'r> FromRow<'r, SqliteRow> + Send + Unpin {
    const TABLE: &'static str;
    const COLUMNS: &'static str;
    /// Extra condition a pending row must meet before it is handed out for delivery.
    const DELIVERABLE: &'static str = "1";

    fn id(&self) -> AnnouncementId;

    /// Short label for metrics.
    fn kind_label(&self) -> &'static str;
}

impl Announcement for RecordEvent {
    const TABLE: &'static str = "record_announcements";
    const COLUMNS: &'static str = "announcement_id, track, session_type, best_lap_ms, kind, \
        player_id, first_name, last_name, short_name, car_model, race_number, cup_category, \
        session_id, set_at_utc, previous_best_ms, enqueued_at_utc, delivered_message_id, \
        delivered_at_utc";

    fn id(&self) -> AnnouncementId {
        self.id
    }

    fn kind_label(&self) -> &'static str {
        match self.event.kind {
            AnnouncementKind::TrackRecord => "track_record",
            AnnouncementKind::PersonalBest => "personal_best",
        }
    }
}

impl Announcement for RaceSummaryEvent {
    const TABLE: &'static str = "race_result_announcements";
    const COLUMNS: &'static str = "announcement_id, session_id, track, finished_at_utc, \
        enqueued_at_utc, delivered_message_id, delivered_at_utc";
    // Races without leaderboard lines are held back until they have some.
    const DELIVERABLE: &'static str = "EXISTS (SELECT 1 FROM entries e \
        WHERE e.session_id = race_result_announcements.session_id)";

    fn id(&self) -> AnnouncementId {
        self.id
    }

    fn kind_label(&self) -> &'static str {
        "race_summary"
    }
}

/// Insert a record or personal best announcement unless one with the same key exists.
pub async fn enqueue_record_event<'c, E>(
    executor: E,
    event: &NewRecordEvent,
) -> StoreResult<EnqueueOutcome>
where
    E: SqliteExecutor<'c>,
{
    let query = format!(
        r#"
INSERT INTO record_announcements
    (track, session_type, best_lap_ms, kind,
     player_id, first_name, last_name, short_name, car_model, race_number, cup_category,
     session_id, set_at_utc, previous_best_ms, enqueued_at_utc)
VALUES
    (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, {NOW_UTC})
ON CONFLICT (track, session_type, best_lap_ms, kind) DO NOTHING
        "#
    );

    let result = sqlx::query(&query)
        .bind(&event.track)
        .bind(event.session_type)
        .bind(event.best_lap_ms)
        .bind(event.kind)
        .bind(&event.holder.player_id)
        .bind(&event.holder.first_name)
        .bind(&event.holder.last_name)
        .bind(&event.holder.short_name)
        .bind(event.holder.car_model)
        .bind(event.holder.race_number)
        .bind(event.holder.cup_category)
        .bind(event.session_id)
        .bind(event.set_at)
        .bind(event.previous_best_ms)
        .execute(executor)
        .await
        .map_err(query_error("INSERT"))?;

    Ok(EnqueueOutcome {
        inserted: result.rows_affected() == 1,
    })
}

/// Insert a race summary announcement unless the session already has one.
pub async fn enqueue_race_summary<'c, E>(
    executor: E,
    summary: &NewRaceSummary,
) -> StoreResult<EnqueueOutcome>
where
    E: SqliteExecutor<'c>,
{
    let query = format!(
        r#"
INSERT INTO race_result_announcements
    (session_id, track, finished_at_utc, enqueued_at_utc)
VALUES
    (?1, ?2, ?3, {NOW_UTC})
ON CONFLICT (session_id) DO NOTHING
        "#
    );

    let result = sqlx::query(&query)
        .bind(summary.session_id)
        .bind(&summary.track)
        .bind(summary.finished_at)
        .execute(executor)
        .await
        .map_err(query_error("INSERT"))?;

    Ok(EnqueueOutcome {
        inserted: result.rows_affected() == 1,
    })
}

/// Read and settle announcements for delivery.
#[derive(Clone)]
pub struct AnnouncementQueue {
    pool: SqlitePool,
}

impl AnnouncementQueue {
    pub fn new_from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Undelivered announcements of one table that are ready to deliver, oldest first,
    /// at most `limit`.
    pub async fn next_batch<A: Announcement>(&self, limit: u32) -> StoreResult<Vec<A>> {
        let query = format!(
            r#"
SELECT {columns}
FROM {table}
WHERE delivered_message_id IS NULL
  AND {deliverable}
ORDER BY enqueued_at_utc ASC, announcement_id ASC
LIMIT ?1
            "#,
            columns = A::COLUMNS,
            table = A::TABLE,
            deliverable = A::DELIVERABLE,
        );

        sqlx::query_as(&query)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("SELECT"))
    }

    /// Record the external message id of a delivered announcement.
    ///
    /// Returns whether this call did the transition. An announcement that was
    /// already delivered keeps its first message id.
    pub async fn mark_delivered<A: Announcement>(
        &self,
        id: AnnouncementId,
        message_id: &str,
    ) -> StoreResult<bool> {
        let query = format!(
            r#"
UPDATE {table}
SET delivered_message_id = ?1, delivered_at_utc = {NOW_UTC}
WHERE announcement_id = ?2 AND delivered_message_id IS NULL
            "#,
            table = A::TABLE,
        );

        let result = sqlx::query(&query)
            .bind(message_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_error("UPDATE"))?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{import_session, ImportOutcome};
    use crate::test_utils::{descriptor, line, observed_at};
    use crate::types::EntryLine;

    async fn imported_session(
        db: &SqlitePool,
        source: &str,
        session_type: SessionType,
        lines: &[EntryLine],
    ) -> SessionId {
        let mut conn = db.acquire().await.unwrap();
        let session = descriptor(source, session_type, "monza");
        match import_session(&mut conn, &session, lines).await.unwrap() {
            ImportOutcome::Imported(session_id) => session_id,
            outcome => panic!("expected a fresh import, got {outcome:?}"),
        }
    }

    fn record_event(
        kind: AnnouncementKind,
        best_lap_ms: Millis,
        session_id: SessionId,
    ) -> NewRecordEvent {
        NewRecordEvent {
            track: "monza".to_owned(),
            session_type: SessionType::Qualifying,
            best_lap_ms,
            kind,
            holder: line(1, Some("S1"), "Anna", "Alpha", Some(best_lap_ms)).snapshot(),
            session_id,
            set_at: observed_at(),
            previous_best_ms: None,
        }
    }

    fn race_summary(session_id: SessionId) -> NewRaceSummary {
        NewRaceSummary {
            session_id,
            track: "monza".to_owned(),
            finished_at: observed_at(),
        }
    }

    #[test]
    fn test_announcement_kind_codes() {
        assert_eq!(
            "TR".parse::<AnnouncementKind>().unwrap(),
            AnnouncementKind::TrackRecord
        );
        assert_eq!(
            "PB".parse::<AnnouncementKind>().unwrap(),
            AnnouncementKind::PersonalBest
        );
        assert!("XX".parse::<AnnouncementKind>().is_err());
        assert_eq!(AnnouncementKind::PersonalBest.to_string(), "PB");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_enqueue_ignores_a_second_event_with_the_same_key(db: SqlitePool) {
        let session_id = imported_session(
            &db,
            "/results/240301_201500_Q.json",
            SessionType::Qualifying,
            &[],
        )
        .await;
        let event = NewRecordEvent {
            previous_best_ms: Some(105_900),
            ..record_event(AnnouncementKind::TrackRecord, 105_231, session_id)
        };

        assert!(enqueue_record_event(&db, &event).await.unwrap().inserted);
        assert!(!enqueue_record_event(&db, &event).await.unwrap().inserted);

        // Same time, different kind: a separate key.
        let pb = record_event(AnnouncementKind::PersonalBest, 105_231, session_id);
        assert!(enqueue_record_event(&db, &pb).await.unwrap().inserted);

        let queue = AnnouncementQueue::new_from_pool(db.clone());
        let pending: Vec<RecordEvent> = queue.next_batch(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].event, event);
        assert_eq!(pending[0].event.previous_best_ms, Some(105_900));
        assert_eq!(pending[1].event, pb);
        assert!(pending.iter().all(|a| a.delivered_message_id.is_none()));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_race_summary_is_keyed_by_session(db: SqlitePool) {
        let session_id = imported_session(
            &db,
            "/results/240301_211500_R.json",
            SessionType::Race,
            &[line(1, Some("S1"), "Anna", "Alpha", Some(106_000))],
        )
        .await;
        let summary = race_summary(session_id);

        assert!(enqueue_race_summary(&db, &summary).await.unwrap().inserted);
        assert!(!enqueue_race_summary(&db, &summary).await.unwrap().inserted);

        let queue = AnnouncementQueue::new_from_pool(db.clone());
        let pending: Vec<RaceSummaryEvent> = queue.next_batch(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].summary, summary);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_race_summaries_without_entries_are_not_handed_out(db: SqlitePool) {
        for hour in 10..13 {
            let source = format!("/results/240301_{hour}0000_R.json");
            let empty = imported_session(&db, &source, SessionType::Race, &[]).await;
            enqueue_race_summary(&db, &race_summary(empty)).await.unwrap();
        }
        let finished = imported_session(
            &db,
            "/results/240301_211500_R.json",
            SessionType::Race,
            &[line(1, Some("S1"), "Anna", "Alpha", Some(106_000))],
        )
        .await;
        enqueue_race_summary(&db, &race_summary(finished)).await.unwrap();

        let queue = AnnouncementQueue::new_from_pool(db.clone());
        let pending: Vec<RaceSummaryEvent> = queue.next_batch(2).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].summary.session_id, finished);

        // The empty ones stay undelivered rather than being dropped.
        let (undelivered,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM race_result_announcements WHERE delivered_message_id IS NULL",
        )
        .fetch_one(&db)
        .await
        .unwrap();
        assert_eq!(undelivered, 4);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_next_batch_is_oldest_first_and_bounded(db: SqlitePool) {
        let session_id = imported_session(
            &db,
            "/results/240301_201500_Q.json",
            SessionType::Qualifying,
            &[],
        )
        .await;
        for lap in [107_000, 106_000, 105_000] {
            let event = record_event(AnnouncementKind::PersonalBest, lap, session_id);
            enqueue_record_event(&db, &event).await.unwrap();
        }

        let queue = AnnouncementQueue::new_from_pool(db.clone());
        let batch: Vec<RecordEvent> = queue.next_batch(2).await.unwrap();
        let laps: Vec<Millis> = batch.iter().map(|a| a.event.best_lap_ms).collect();
        assert_eq!(laps, vec![107_000, 106_000]);

        assert!(queue
            .mark_delivered::<RecordEvent>(batch[0].id, "m-1")
            .await
            .unwrap());

        let batch: Vec<RecordEvent> = queue.next_batch(10).await.unwrap();
        let laps: Vec<Millis> = batch.iter().map(|a| a.event.best_lap_ms).collect();
        assert_eq!(laps, vec![106_000, 105_000]);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_mark_delivered_keeps_the_first_message_id(db: SqlitePool) {
        let session_id = imported_session(
            &db,
            "/results/240301_201500_Q.json",
            SessionType::Qualifying,
            &[],
        )
        .await;
        let event = record_event(AnnouncementKind::TrackRecord, 105_231, session_id);
        enqueue_record_event(&db, &event).await.unwrap();

        let queue = AnnouncementQueue::new_from_pool(db.clone());
        let batch: Vec<RecordEvent> = queue.next_batch(1).await.unwrap();
        let id = batch[0].id;

        assert!(queue.mark_delivered::<RecordEvent>(id, "first").await.unwrap());
        assert!(!queue.mark_delivered::<RecordEvent>(id, "second").await.unwrap());

        let (message_id, delivered_at): (Option<String>, Option<DateTime<Utc>>) =
            sqlx::query_as(
                "SELECT delivered_message_id, delivered_at_utc \
                 FROM record_announcements WHERE announcement_id = ?1",
            )
            .bind(id)
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(message_id.as_deref(), Some("first"));
        assert!(delivered_at.is_some());

        let pending: Vec<RecordEvent> = queue.next_batch(10).await.unwrap();
        assert!(pending.is_empty());
    }
}
