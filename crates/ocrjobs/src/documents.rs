//! Documents as seen by the scheduler: an owner and a storage path.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{document_repo, Database, DatabaseError};

/// An uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub file_path: PathBuf,
    pub original_filename: String,
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Document {
    /// A live document owned by `user_id`, with the MIME type guessed from the path.
    pub fn new(user_id: Uuid, file_path: impl AsRef<Path>) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        let original_filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = mime_guess::from_path(&file_path)
            .first()
            .map(|m| m.essence_str().to_string());

        Self {
            id: Uuid::new_v4(),
            user_id,
            file_path,
            original_filename,
            mime_type,
            created_at: Utc::now().trunc_subsecs(6),
            deleted_at: None,
        }
    }
}

/// Looks up documents for submission checks and dispatch.
///
/// Implementations return `Ok(None)` for documents that do not exist or are
/// no longer available.
pub trait DocumentSource: Send + Sync {
    fn get_document(&self, id: Uuid) -> Result<Option<Document>, DatabaseError>;
}

impl DocumentSource for Database {
    fn get_document(&self, id: Uuid) -> Result<Option<Document>, DatabaseError> {
        document_repo::find_by_id(self, id)
    }
}
