//! Proposed and applied file mutations.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ids::ChangeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    Create,
    Edit,
    Delete,
}

impl FileOperation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

/// A file mutation with both sides of the content.
///
/// Values are never edited in place. When a partial approval changes the
/// resulting content, [`FileChange::with_content_after`] produces the replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub id: ChangeId,
    /// Absolute path of the target file.
    pub path: PathBuf,
    pub operation: FileOperation,
    /// `None` when the file did not exist before the change.
    pub content_before: Option<String>,
    /// `None` when the change deletes the file.
    pub content_after: Option<String>,
    pub timestamp: SystemTime,
}

impl FileChange {
    #[must_use]
    pub fn new(
        id: ChangeId,
        path: PathBuf,
        content_before: Option<String>,
        content_after: Option<String>,
        timestamp: SystemTime,
    ) -> Self {
        let operation = match (&content_before, &content_after) {
            (None, _) => FileOperation::Create,
            (Some(_), None) => FileOperation::Delete,
            (Some(_), Some(_)) => FileOperation::Edit,
        };
        Self {
            id,
            path,
            operation,
            content_before,
            content_after,
            timestamp,
        }
    }

    /// Replacement value carrying user-approved content as the new "after" side.
    #[must_use]
    pub fn with_content_after(&self, content: String) -> Self {
        let operation = if self.content_before.is_some() {
            FileOperation::Edit
        } else {
            FileOperation::Create
        };
        Self {
            id: self.id.clone(),
            path: self.path.clone(),
            operation,
            content_before: self.content_before.clone(),
            content_after: Some(content),
            timestamp: self.timestamp,
        }
    }
}
