use std::time;

use health::HealthHandle;
use record_common::announcements::{
    Announcement, AnnouncementKind, AnnouncementQueue, NewRecordEvent, RaceSummaryEvent,
    RecordEvent,
};
use record_common::store;
use tracing::{error, info, warn};

use crate::error::WorkerError;
use crate::notifier::{is_rate_limited, Notifier};
use crate::render::{self, RenderedMessage};

/// Counts of what happened to the announcements looked at in one cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub delivered: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// Polls the announcement tables and posts every pending announcement through a `Notifier`.
pub struct AnnouncementWorker<N> {
    /// An identifier for this worker, used in logs.
    name: String,
    queue: AnnouncementQueue,
    notifier: N,
    /// Sleep between the end of one cycle and the start of the next.
    poll_interval: time::Duration,
    /// Maximum number of announcements of each table looked at per cycle.
    batch_size: u32,
    /// The liveness check handle, to call on a schedule to report healthy
    liveness: HealthHandle,
}

impl<N: Notifier> AnnouncementWorker<N> {
    pub fn new(
        name: &str,
        queue: AnnouncementQueue,
        notifier: N,
        poll_interval: time::Duration,
        batch_size: u32,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            name: name.to_owned(),
            queue,
            notifier,
            poll_interval,
            batch_size,
            liveness,
        }
    }

    /// Run delivery cycles until the process is stopped. Cycles never overlap.
    pub async fn run(&self) {
        info!(worker = %self.name, "starting announcement delivery");

        loop {
            self.liveness.report_healthy().await;

            match self.run_cycle().await {
                Ok(summary) if summary != CycleSummary::default() => info!(
                    worker = %self.name,
                    delivered = summary.delivered,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "delivery cycle finished"
                ),
                Ok(_) => {}
                Err(error) => error!(worker = %self.name, "delivery cycle failed: {}", error),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Deliver one batch of record and personal best announcements, then one batch of
    /// race summaries.
    pub async fn run_cycle(&self) -> Result<CycleSummary, WorkerError> {
        let mut summary = CycleSummary::default();

        let events: Vec<RecordEvent> = self.queue.next_batch(self.batch_size).await?;
        for announcement in &events {
            let message = self.render_record_event(&announcement.event).await?;
            if !self.deliver(announcement, &message, &mut summary).await? {
                return Ok(summary);
            }
        }

        let races: Vec<RaceSummaryEvent> = self.queue.next_batch(self.batch_size).await?;
        for announcement in &races {
            let Some(message) = self.render_race_summary(announcement).await? else {
                warn!(
                    announcement_id = %announcement.id,
                    session_id = %announcement.summary.session_id,
                    track = %announcement.summary.track,
                    "race session has no entries, leaving its summary undelivered"
                );
                summary.skipped += 1;
                continue;
            };

            if !self.deliver(announcement, &message, &mut summary).await? {
                return Ok(summary);
            }
        }

        Ok(summary)
    }

    /// Personal bests get their standing among identified drivers as it is now. The
    /// driver's own laps never count against them.
    async fn render_record_event(
        &self,
        event: &NewRecordEvent,
    ) -> Result<RenderedMessage, WorkerError> {
        if event.kind == AnnouncementKind::TrackRecord {
            return Ok(render::track_record(event));
        }

        let pool = self.queue.pool();
        let player_id = event.holder.player_id.as_deref();

        let rank = store::driver_rank(
            pool,
            &event.track,
            event.session_type,
            event.best_lap_ms,
            player_id,
        )
        .await?;

        let previous_rank = match (event.previous_best_ms, player_id) {
            (Some(previous), Some(_)) => Some(
                store::driver_rank(pool, &event.track, event.session_type, previous, player_id)
                    .await?
                    .rank,
            ),
            _ => None,
        };

        Ok(render::personal_best(event, rank, previous_rank))
    }

    async fn render_race_summary(
        &self,
        announcement: &RaceSummaryEvent,
    ) -> Result<Option<RenderedMessage>, WorkerError> {
        let pool = self.queue.pool();
        let session_id = announcement.summary.session_id;

        let Some(session) = store::session(pool, session_id).await? else {
            return Ok(None);
        };
        let entries = store::entries(pool, session_id).await?;

        Ok(render::race_summary(&session, &entries))
    }

    /// Send one message and mark its announcement delivered.
    /// Returns whether the cycle should go on: a rate limited webhook ends it early.
    async fn deliver<A: Announcement>(
        &self,
        announcement: &A,
        message: &RenderedMessage,
        summary: &mut CycleSummary,
    ) -> Result<bool, WorkerError> {
        let id = announcement.id();
        let kind = announcement.kind_label();
        let now = tokio::time::Instant::now();

        match self.notifier.send(message).await {
            Ok(message_id) => {
                metrics::histogram!("announcement_delivery_duration_seconds", "kind" => kind)
                    .record(now.elapsed().as_secs_f64());

                if self.queue.mark_delivered::<A>(id, &message_id).await? {
                    info!(
                        announcement_id = %id,
                        kind,
                        message_id = %message_id,
                        "announcement delivered"
                    );
                } else {
                    warn!(
                        announcement_id = %id,
                        kind,
                        message_id = %message_id,
                        "announcement was already delivered"
                    );
                }

                metrics::counter!("announcements_delivered_total", "kind" => kind).increment(1);
                summary.delivered += 1;

                Ok(true)
            }
            Err(error) => {
                metrics::counter!("announcements_failed_total", "kind" => kind).increment(1);
                summary.failed += 1;

                if is_rate_limited(&error) {
                    warn!(announcement_id = %id, kind, "rate limited, ending cycle: {}", error);
                    return Ok(false);
                }

                error!(announcement_id = %id, kind, "failed to deliver announcement: {}", error);
                Ok(true)
            }
        }
    }
}
