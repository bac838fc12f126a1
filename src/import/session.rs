//! Upload sessions backing the HTTP workflow.
//!
//! Each upload owns one loaded [`EmbeddedDatabase`]. The database is shared
//! with a running import through an `Arc`. The session gives up its handle
//! when the import completes or the upload is released, and the engine is
//! closed once no run still holds it.

use crate::import::loader::{EmbeddedDatabase, LoaderError};
use crate::import::progress::ImportJob;
use crate::import::schema::TableInfo;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Step of the five-stage import workflow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportStage {
    Upload,
    TableSelection,
    Preview,
    Importing,
    Complete,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("upload {0} not found")]
    NotFound(Uuid),
    #[error("an import is already running for upload {0}")]
    ImportRunning(Uuid),
    #[error("upload {0} has already been imported and its database released; upload the file again")]
    SourceReleased(Uuid),
}

/// What was uploaded. Kept after the engine itself is released.
#[derive(Debug, Clone)]
pub struct UploadSource {
    pub file_name: String,
    pub size_bytes: u64,
    /// Hex SHA-256 of the uploaded file.
    pub fingerprint: String,
    pub tables: Vec<TableInfo>,
}

impl UploadSource {
    fn describe(database: &EmbeddedDatabase) -> Self {
        Self {
            file_name: database.file_name().to_string(),
            size_bytes: database.size_bytes(),
            fingerprint: database.fingerprint().to_string(),
            tables: database.tables().to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: Uuid,
    pub source: UploadSource,
    /// `None` once an import has completed.
    database: Option<Arc<EmbeddedDatabase>>,
    pub uploaded_at: DateTime<Utc>,
    pub stage: ImportStage,
    /// Most recent import started from this upload.
    pub job: Option<ImportJob>,
}

impl UploadSession {
    /// The loaded engine, while the session still holds it.
    pub fn database(&self) -> Result<&Arc<EmbeddedDatabase>, SessionError> {
        self.database
            .as_ref()
            .ok_or(SessionError::SourceReleased(self.id))
    }

    pub fn is_released(&self) -> bool {
        self.database.is_none()
    }
}

#[derive(Debug, Default)]
pub struct UploadRegistry {
    sessions: DashMap<Uuid, UploadSession>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loaded database; the session starts at table selection.
    pub fn insert(&self, database: EmbeddedDatabase) -> UploadSession {
        let session = UploadSession {
            id: Uuid::new_v4(),
            source: UploadSource::describe(&database),
            database: Some(Arc::new(database)),
            uploaded_at: Utc::now(),
            stage: ImportStage::TableSelection,
            job: None,
        };
        self.sessions.insert(session.id, session.clone());
        log::info!(
            "upload {} registered for '{}'",
            session.id,
            session.source.file_name
        );
        session
    }

    pub fn get(&self, id: Uuid) -> Result<UploadSession, SessionError> {
        self.sessions
            .get(&id)
            .map(|session| session.clone())
            .ok_or(SessionError::NotFound(id))
    }

    /// Note that the operator is previewing; ignored once an import has started.
    pub fn mark_preview(&self, id: Uuid) -> Result<(), SessionError> {
        let mut session = self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if session.stage == ImportStage::TableSelection {
            session.stage = ImportStage::Preview;
        }
        Ok(())
    }

    /// Claim the session for a new run.
    pub fn begin_import(&self, id: Uuid) -> Result<(Arc<EmbeddedDatabase>, ImportJob), SessionError> {
        let mut session = self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if session.stage == ImportStage::Importing {
            return Err(SessionError::ImportRunning(id));
        }
        let database = Arc::clone(session.database()?);

        let job = ImportJob::new();
        session.stage = ImportStage::Importing;
        session.job = Some(job.clone());
        Ok((database, job))
    }

    /// Mark the run finished and give up the session's engine handle.
    ///
    /// The session itself stays so its result can still be polled.
    pub fn complete_import(&self, id: Uuid) {
        let database = match self.sessions.get_mut(&id) {
            Some(mut session) => {
                session.stage = ImportStage::Complete;
                session.database.take()
            }
            None => None,
        };

        if let Some(database) = database {
            close_engine(id, database);
        }
    }

    /// Drop the session, cancelling its run and closing the database when
    /// nothing else holds it.
    pub async fn release(&self, id: Uuid) -> Result<(), SessionError> {
        let (_, session) = self.sessions.remove(&id).ok_or(SessionError::NotFound(id))?;

        if let Some(job) = &session.job {
            if job.is_active().await {
                job.cancel().await;
            }
        }

        if let Some(database) = session.database {
            close_engine(id, database);
        }

        log::info!("upload {} released", id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Close the engine if this was the last handle; otherwise the last holder's
/// drop frees it.
fn close_engine(id: Uuid, database: Arc<EmbeddedDatabase>) {
    match Arc::try_unwrap(database) {
        Ok(database) => {
            if let Err(err) = database.close() {
                log::warn!("closing upload {} failed: {}", id, err);
            }
        }
        Err(_) => log::debug!("upload {} still in use; released when its last reader ends", id),
    }
}

/// Load raw upload bytes off the async runtime.
pub async fn load_upload(file_name: String, bytes: Vec<u8>) -> Result<EmbeddedDatabase, LoaderError> {
    tokio::task::spawn_blocking(move || EmbeddedDatabase::from_bytes(&file_name, &bytes))
        .await
        .map_err(|err| LoaderError::Io(std::io::Error::other(err)))?
}
