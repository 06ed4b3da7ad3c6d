//! Find the track records and personal bests set by a freshly imported session.
use std::collections::{HashMap, HashSet};

use sqlx::SqliteConnection;
use tracing::{debug, info};

use record_common::announcements::{
    enqueue_race_summary, enqueue_record_event, AnnouncementKind, NewRaceSummary, NewRecordEvent,
};
use record_common::error::{StoreError, StoreResult};
use record_common::types::{Entry, Millis, Record, SessionId, SessionType};
use record_common::{ledger, store};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DetectionSummary {
    pub record_replaced: bool,
    pub personal_bests: u32,
    pub race_summary_queued: bool,
}

/// Update the record ledger and queue announcements for `session_id`.
///
/// Meant to run on the connection that imported the session, before its
/// transaction commits. Running it again over the same session changes nothing:
/// ties never replace a record and announcement keys are deduplicated.
pub async fn detect(
    conn: &mut SqliteConnection,
    session_id: SessionId,
) -> StoreResult<DetectionSummary> {
    let mut summary = DetectionSummary::default();

    let session = store::session(&mut *conn, session_id)
        .await?
        .ok_or(StoreError::MissingSession(session_id))?;
    let session = session.descriptor;

    if !session.session_type.tracks_records() {
        debug!(
            track = %session.track,
            session_id = %session_id,
            "practice session, skipping detection"
        );
        return Ok(summary);
    }

    let entries = store::entries(&mut *conn, session_id).await?;

    // Entries come back in position order, so min_by_key keeps the lowest position on ties.
    let fastest = entries
        .iter()
        .filter_map(|entry| entry.line.best_lap_ms.map(|lap| (lap, entry)))
        .min_by_key(|(lap, _)| *lap);

    if let Some((best_lap_ms, entry)) = fastest {
        let candidate = Record {
            track: session.track.clone(),
            session_type: session.session_type,
            best_lap_ms,
            holder: entry.line.snapshot(),
            set_session_id: session_id,
            set_at: session.observed_at,
        };

        let previous_record =
            ledger::current_record(&mut *conn, &session.track, session.session_type)
                .await?
                .map(|record| record.best_lap_ms);

        if ledger::upsert_if_better(&mut *conn, &candidate).await?.replaced {
            summary.record_replaced = true;
            info!(
                track = %session.track,
                session_type = %session.session_type,
                best_lap_ms,
                previous_record,
                "new track record"
            );

            enqueue_record_event(
                &mut *conn,
                &NewRecordEvent {
                    track: candidate.track,
                    session_type: candidate.session_type,
                    best_lap_ms,
                    kind: AnnouncementKind::TrackRecord,
                    holder: candidate.holder,
                    session_id,
                    set_at: candidate.set_at,
                    previous_best_ms: previous_record,
                },
            )
            .await?;
        }

        // A lap that stands as this session's track record is announced as a record only.
        let record_held_here =
            ledger::current_record(&mut *conn, &session.track, session.session_type)
                .await?
                .filter(|record| record.set_session_id == session_id)
                .map(|record| record.best_lap_ms);

        for entry in fastest_line_per_driver(&entries) {
            let Some((best_lap_ms, previous_best_ms)) = personal_best(
                conn,
                &session.track,
                session.session_type,
                session_id,
                entry,
                record_held_here,
            )
            .await?
            else {
                continue;
            };

            let event = NewRecordEvent {
                track: session.track.clone(),
                session_type: session.session_type,
                best_lap_ms,
                kind: AnnouncementKind::PersonalBest,
                holder: entry.line.snapshot(),
                session_id,
                set_at: session.observed_at,
                previous_best_ms,
            };

            if enqueue_record_event(&mut *conn, &event).await?.inserted {
                summary.personal_bests += 1;
            }
        }
    }

    if session.session_type == SessionType::Race {
        let race_summary = NewRaceSummary {
            session_id,
            track: session.track.clone(),
            finished_at: session.observed_at,
        };
        summary.race_summary_queued = enqueue_race_summary(&mut *conn, &race_summary)
            .await?
            .inserted;
    }

    Ok(summary)
}

/// Identified drivers' fastest lines, in position order. A driver listed on more than one
/// line of a session competes with the fastest of them only.
fn fastest_line_per_driver(entries: &[Entry]) -> Vec<&Entry> {
    let mut fastest: HashMap<&str, &Entry> = HashMap::new();
    for entry in entries {
        let (Some(lap), Some(player_id)) = (
            entry.line.best_lap_ms,
            entry.line.driver.player_id.as_deref(),
        ) else {
            continue;
        };

        let current = fastest.entry(player_id).or_insert(entry);
        if current.line.best_lap_ms.is_some_and(|best| lap < best) {
            *current = entry;
        }
    }

    let keep: HashSet<i64> = fastest.values().map(|entry| entry.entry_id).collect();
    entries
        .iter()
        .filter(|entry| keep.contains(&entry.entry_id))
        .collect()
}

/// The lap of `entry` and the driver's previous best, if the lap beats their best from
/// every other session.
async fn personal_best(
    conn: &mut SqliteConnection,
    track: &str,
    session_type: SessionType,
    session_id: SessionId,
    entry: &Entry,
    record_held_here: Option<Millis>,
) -> StoreResult<Option<(Millis, Option<Millis>)>> {
    let (Some(lap), Some(player_id)) = (
        entry.line.best_lap_ms,
        entry.line.driver.player_id.as_deref(),
    ) else {
        return Ok(None);
    };

    let previous =
        store::driver_best_excluding(&mut *conn, player_id, track, session_type, session_id)
            .await?;
    if previous.is_some_and(|previous| lap >= previous) {
        return Ok(None);
    }

    if record_held_here == Some(lap) {
        debug!(track, player_id, lap, "personal best is also the track record");
        return Ok(None);
    }

    Ok(Some((lap, previous)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use record_common::announcements::{AnnouncementQueue, RaceSummaryEvent, RecordEvent};
    use record_common::store::{import_session, ImportOutcome};
    use record_common::test_utils::{descriptor, line};
    use record_common::types::EntryLine;
    use sqlx::SqlitePool;

    async fn import_and_detect(
        db: &SqlitePool,
        source: &str,
        session_type: SessionType,
        lines: &[EntryLine],
    ) -> (SessionId, DetectionSummary) {
        let mut tx = db.begin().await.unwrap();
        let session = descriptor(source, session_type, "monza");
        let ImportOutcome::Imported(session_id) =
            import_session(&mut tx, &session, lines).await.unwrap()
        else {
            panic!("expected a fresh import of {source}");
        };
        let summary = detect(&mut tx, session_id).await.unwrap();
        tx.commit().await.unwrap();
        (session_id, summary)
    }

    async fn record_events(db: &SqlitePool) -> Vec<RecordEvent> {
        AnnouncementQueue::new_from_pool(db.clone())
            .next_batch(100)
            .await
            .unwrap()
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_first_lap_and_faster_lap_each_set_a_record(db: SqlitePool) {
        let (first, summary) = import_and_detect(
            &db,
            "/results/240301_201500_Q.json",
            SessionType::Qualifying,
            &[line(1, Some("A"), "Anna", "Alpha", Some(105_231))],
        )
        .await;
        assert!(summary.record_replaced);
        assert_eq!(summary.personal_bests, 0);

        let record = ledger::current_record(&db, "monza", SessionType::Qualifying)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.best_lap_ms, 105_231);
        assert_eq!(record.set_session_id, first);

        let (second, summary) = import_and_detect(
            &db,
            "/results/240308_201500_Q.json",
            SessionType::Qualifying,
            &[line(1, Some("B"), "Ben", "Bravo", Some(104_900))],
        )
        .await;
        assert!(summary.record_replaced);

        let record = ledger::current_record(&db, "monza", SessionType::Qualifying)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.best_lap_ms, 104_900);
        assert_eq!(record.holder.player_id.as_deref(), Some("B"));
        assert_eq!(record.set_session_id, second);

        let events = record_events(&db).await;
        let kinds: Vec<(AnnouncementKind, i64, Option<i64>)> = events
            .iter()
            .map(|e| (e.event.kind, e.event.best_lap_ms, e.event.previous_best_ms))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (AnnouncementKind::TrackRecord, 105_231, None),
                (AnnouncementKind::TrackRecord, 104_900, Some(105_231))
            ]
        );

        // Anna's lap stays in the session history.
        let history = store::entries(&db, first).await.unwrap();
        assert_eq!(history[0].line.best_lap_ms, Some(105_231));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_personal_best_below_the_record(db: SqlitePool) {
        import_and_detect(
            &db,
            "/results/240301_201500_Q.json",
            SessionType::Qualifying,
            &[
                line(1, Some("A"), "Anna", "Alpha", Some(104_000)),
                line(2, Some("B"), "Ben", "Bravo", Some(106_500)),
            ],
        )
        .await;

        let (_, summary) = import_and_detect(
            &db,
            "/results/240308_201500_Q.json",
            SessionType::Qualifying,
            &[
                line(1, Some("A"), "Anna", "Alpha", Some(104_500)),
                line(2, Some("B"), "Ben", "Bravo", Some(105_800)),
                line(3, None, "Guest", "Driver", Some(100_000)),
            ],
        )
        .await;
        // The guest has no player id but still sets the record.
        assert!(summary.record_replaced);
        assert_eq!(summary.personal_bests, 1);

        let personal_bests: Vec<(Option<String>, i64, Option<i64>)> = record_events(&db)
            .await
            .into_iter()
            .filter(|e| e.event.kind == AnnouncementKind::PersonalBest)
            .map(|e| {
                let event = e.event;
                (event.holder.player_id, event.best_lap_ms, event.previous_best_ms)
            })
            .collect();
        // Ben's first lap was a personal best too, only Anna's stood as the record.
        assert_eq!(
            personal_bests,
            vec![
                (Some("B".to_owned()), 106_500, None),
                (Some("B".to_owned()), 105_800, Some(106_500))
            ]
        );
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_first_record_has_nothing_to_improve_on(db: SqlitePool) {
        import_and_detect(
            &db,
            "/results/240301_201500_Q.json",
            SessionType::Qualifying,
            &[
                line(1, Some("A"), "Anna", "Alpha", Some(105_231)),
                line(2, Some("B"), "Ben", "Bravo", Some(105_900)),
            ],
        )
        .await;

        let events = record_events(&db).await;
        let record = events
            .iter()
            .find(|e| e.event.kind == AnnouncementKind::TrackRecord)
            .unwrap();
        assert_eq!(record.event.best_lap_ms, 105_231);
        // Ben's slower lap in the same session is not a previous record.
        assert_eq!(record.event.previous_best_ms, None);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_driver_on_two_lines_competes_with_their_fastest(db: SqlitePool) {
        import_and_detect(
            &db,
            "/results/240301_201500_Q.json",
            SessionType::Qualifying,
            &[
                line(1, Some("A"), "Anna", "Alpha", Some(104_000)),
                line(2, Some("B"), "Ben", "Bravo", Some(108_000)),
            ],
        )
        .await;

        let (_, summary) = import_and_detect(
            &db,
            "/results/240308_201500_Q.json",
            SessionType::Qualifying,
            &[
                line(1, Some("A"), "Anna", "Alpha", Some(105_000)),
                line(2, Some("B"), "Ben", "Bravo", Some(106_000)),
                line(3, Some("B"), "Ben", "Bravo", Some(107_000)),
            ],
        )
        .await;
        assert_eq!(summary.personal_bests, 1);

        let personal_bests: Vec<(i64, Option<i64>)> = record_events(&db)
            .await
            .iter()
            .filter(|e| e.event.kind == AnnouncementKind::PersonalBest)
            .map(|e| (e.event.best_lap_ms, e.event.previous_best_ms))
            .collect();
        assert_eq!(personal_bests, vec![(108_000, None), (106_000, Some(108_000))]);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_record_lap_is_not_also_a_personal_best(db: SqlitePool) {
        import_and_detect(
            &db,
            "/results/240301_201500_Q.json",
            SessionType::Qualifying,
            &[line(1, Some("A"), "Anna", "Alpha", Some(106_000))],
        )
        .await;

        let (_, summary) = import_and_detect(
            &db,
            "/results/240308_201500_Q.json",
            SessionType::Qualifying,
            &[line(1, Some("A"), "Anna", "Alpha", Some(105_000))],
        )
        .await;
        assert!(summary.record_replaced);
        assert_eq!(summary.personal_bests, 0);

        let events = record_events(&db).await;
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| e.event.kind == AnnouncementKind::TrackRecord));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_running_detection_again_queues_nothing_new(db: SqlitePool) {
        let (session_id, _) = import_and_detect(
            &db,
            "/results/240301_201500_Q.json",
            SessionType::Qualifying,
            &[
                line(1, Some("A"), "Anna", "Alpha", Some(105_000)),
                line(2, Some("B"), "Ben", "Bravo", Some(106_000)),
            ],
        )
        .await;
        let before = record_events(&db).await.len();

        let mut conn = db.acquire().await.unwrap();
        let again = detect(&mut conn, session_id).await.unwrap();
        assert_eq!(again, DetectionSummary::default());
        assert_eq!(record_events(&db).await.len(), before);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_record_tracks_the_minimum_in_any_order(db: SqlitePool) {
        let laps = [107_300, 104_100, 106_000, 104_100, 105_500];
        for (day, lap) in laps.iter().enumerate() {
            import_and_detect(
                &db,
                &format!("/results/2403{:02}_201500_R.json", day + 1),
                SessionType::Race,
                &[line(1, Some("A"), "Anna", "Alpha", Some(*lap))],
            )
            .await;
        }

        let record = ledger::current_record(&db, "monza", SessionType::Race)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.best_lap_ms, 104_100);

        let track_records: Vec<i64> = record_events(&db)
            .await
            .iter()
            .filter(|e| e.event.kind == AnnouncementKind::TrackRecord)
            .map(|e| e.event.best_lap_ms)
            .collect();
        assert_eq!(track_records, vec![107_300, 104_100]);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_practice_is_ignored(db: SqlitePool) {
        let (_, summary) = import_and_detect(
            &db,
            "/results/240301_190000_FP.json",
            SessionType::Practice,
            &[line(1, Some("A"), "Anna", "Alpha", Some(99_000))],
        )
        .await;
        assert_eq!(summary, DetectionSummary::default());
        assert_eq!(
            ledger::current_record(&db, "monza", SessionType::Practice)
                .await
                .unwrap(),
            None
        );
        assert!(record_events(&db).await.is_empty());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_race_without_times_still_gets_a_summary(db: SqlitePool) {
        let (session_id, summary) = import_and_detect(
            &db,
            "/results/240301_211500_R.json",
            SessionType::Race,
            &[
                line(1, Some("A"), "Anna", "Alpha", None),
                line(2, Some("B"), "Ben", "Bravo", None),
            ],
        )
        .await;
        assert!(!summary.record_replaced);
        assert!(summary.race_summary_queued);

        let summaries: Vec<RaceSummaryEvent> = AnnouncementQueue::new_from_pool(db.clone())
            .next_batch(10)
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].summary.session_id, session_id);
        assert!(record_events(&db).await.is_empty());
    }
}
