//! One pass over a results directory.
//!
//! Files are imported one at a time in file name order. Each file gets its own
//! transaction covering the import and the record detection, so a failure
//! leaves nothing behind and the file is simply picked up again next run.
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use record_common::error::StoreError;
use record_common::store::{import_session, ImportOutcome};
use record_common::types::{EntryLine, SessionDescriptor, SessionId};

use crate::detector::{detect, DetectionSummary};
use crate::parser::{parse, parse_file_name, ParseError, ResultSource};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to read {path}: {error}")]
    ReadError {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error(transparent)]
    StoreError(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Imported {
    pub session_id: SessionId,
    pub detection: DetectionSummary,
}

/// Why a file produced no new session.
#[derive(Debug)]
pub enum SkipReason {
    BadFileName,
    EmptyTemplate,
    Malformed(String),
    AlreadyImported(SessionId),
    Failed(IngestError),
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::BadFileName => "bad_file_name",
            SkipReason::EmptyTemplate => "empty_template",
            SkipReason::Malformed(_) => "malformed",
            SkipReason::AlreadyImported(_) => "already_imported",
            SkipReason::Failed(_) => "failed",
        }
    }
}

impl From<IngestError> for SkipReason {
    fn from(error: IngestError) -> Self {
        SkipReason::Failed(error)
    }
}

impl From<StoreError> for SkipReason {
    fn from(error: StoreError) -> Self {
        SkipReason::Failed(IngestError::StoreError(error))
    }
}

/// Counts of a run, by outcome.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub imported: u32,
    pub already_imported: u32,
    pub empty_template: u32,
    pub malformed: u32,
    pub bad_file_name: u32,
    pub failed: u32,
    pub records_replaced: u32,
    pub personal_bests: u32,
    pub race_summaries: u32,
}

impl IngestSummary {
    pub fn record(&mut self, outcome: &Result<Imported, SkipReason>) {
        match outcome {
            Ok(imported) => {
                self.imported += 1;
                self.records_replaced += u32::from(imported.detection.record_replaced);
                self.personal_bests += imported.detection.personal_bests;
                self.race_summaries += u32::from(imported.detection.race_summary_queued);
            }
            Err(SkipReason::AlreadyImported(_)) => self.already_imported += 1,
            Err(SkipReason::EmptyTemplate) => self.empty_template += 1,
            Err(SkipReason::Malformed(_)) => self.malformed += 1,
            Err(SkipReason::BadFileName) => self.bad_file_name += 1,
            Err(SkipReason::Failed(_)) => self.failed += 1,
        }
    }
}

/// Import every result file in `dir` whose extension matches `extension`.
///
/// Per-file problems are logged and counted. Only an unreadable directory is an error.
pub async fn ingest_directory(
    pool: &SqlitePool,
    dir: &Path,
    extension: &str,
) -> Result<IngestSummary, IngestError> {
    let files = result_files(dir, extension).await?;
    info!(dir = %dir.display(), files = files.len(), "starting ingestion");

    let mut summary = IngestSummary::default();
    for path in files {
        let outcome = ingest_file(pool, &path).await;

        let label = match &outcome {
            Ok(_) => "imported",
            Err(reason) => reason.label(),
        };
        metrics::counter!("ingest_files_total", "outcome" => label).increment(1);

        summary.record(&outcome);
    }

    Ok(summary)
}

/// Regular files in `dir` with the given extension (case-insensitive), sorted by name.
async fn result_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, IngestError> {
    let read_error = |error| IngestError::ReadError {
        path: dir.to_owned(),
        error,
    };

    let mut files = vec![];
    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_error)?;
    while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
        let path = entry.path();
        let matches_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));

        if matches_extension && entry.file_type().await.map_err(read_error)?.is_file() {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Import a single result file and run record detection over it.
pub async fn ingest_file(pool: &SqlitePool, path: &Path) -> Result<Imported, SkipReason> {
    let file = path.display().to_string();

    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        warn!(file = %file, "skipping file with a non UTF-8 name");
        return Err(SkipReason::BadFileName);
    };

    if let Err(e) = parse_file_name(file_name) {
        warn!(file = %file, error = %e, "skipping file with unexpected name");
        return Err(SkipReason::BadFileName);
    }

    let (identity, observed_at, payload) = match read_result_file(path).await {
        Ok(read) => read,
        Err(e) => {
            error!(file = %file, error = %e, "failed to read result file");
            return Err(e.into());
        }
    };

    let source = ResultSource {
        identity: &identity,
        file_name,
        observed_at,
    };

    let parsed = match parse(source, &payload) {
        Ok(parsed) => parsed,
        Err(ParseError::EmptyTemplate) => {
            debug!(file = %file, "skipping empty result template");
            return Err(SkipReason::EmptyTemplate);
        }
        Err(ParseError::MalformedInput { reason }) => {
            warn!(file = %file, reason = %reason, "skipping malformed result file");
            return Err(SkipReason::Malformed(reason));
        }
    };

    match import_and_detect(pool, &parsed.session, &parsed.entries).await {
        Ok(imported) => {
            info!(
                file = %file,
                session_id = %imported.session_id,
                track = %parsed.session.track,
                session_type = %parsed.session.session_type,
                entries = parsed.entries.len(),
                record_replaced = imported.detection.record_replaced,
                personal_bests = imported.detection.personal_bests,
                "imported session"
            );
            Ok(imported)
        }
        Err(SkipReason::AlreadyImported(session_id)) => {
            debug!(file = %file, session_id = %session_id, "already imported");
            Err(SkipReason::AlreadyImported(session_id))
        }
        Err(SkipReason::Failed(e)) => {
            error!(
                file = %file,
                error = %e,
                "failed to import session, it will be retried on the next run"
            );
            Err(SkipReason::Failed(e))
        }
        Err(reason) => Err(reason),
    }
}

async fn import_and_detect(
    pool: &SqlitePool,
    session: &SessionDescriptor,
    entries: &[EntryLine],
) -> Result<Imported, SkipReason> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|error| StoreError::ConnectionError { error })?;

    let session_id = match import_session(&mut tx, session, entries).await? {
        ImportOutcome::Imported(session_id) => session_id,
        ImportOutcome::AlreadyImported(session_id) => {
            return Err(SkipReason::AlreadyImported(session_id))
        }
    };

    let detection = detect(&mut tx, session_id).await?;

    tx.commit()
        .await
        .map_err(|error| StoreError::QueryError {
            command: "COMMIT",
            error,
        })?;

    Ok(Imported {
        session_id,
        detection,
    })
}

/// Absolute path, modification time and contents of a result file.
async fn read_result_file(path: &Path) -> Result<(String, DateTime<Utc>, Vec<u8>), IngestError> {
    let read_error = |error| IngestError::ReadError {
        path: path.to_owned(),
        error,
    };

    let identity = tokio::fs::canonicalize(path).await.map_err(read_error)?;
    let modified = tokio::fs::metadata(path)
        .await
        .and_then(|metadata| metadata.modified())
        .map_err(read_error)?;
    let payload = tokio::fs::read(path).await.map_err(read_error)?;

    Ok((
        identity.display().to_string(),
        DateTime::<Utc>::from(modified),
        payload,
    ))
}
