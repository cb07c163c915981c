//! Checkpoint records and rollback reports.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Original state of one file at the first mutation inside a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: PathBuf,
    /// `None` when the file did not exist before the mutation.
    pub content_before: Option<String>,
    pub was_created: bool,
}

impl FileSnapshot {
    #[must_use]
    pub fn new(path: PathBuf, content_before: Option<String>, was_created: bool) -> Self {
        Self {
            path,
            content_before,
            was_created,
        }
    }
}

/// Pre-turn file and command state anchored at a user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Index of the user turn that opened this unit of agent work.
    pub message_index: usize,
    pub preview: String,
    pub created_at: SystemTime,
    #[serde(default)]
    pub snapshots: BTreeMap<PathBuf, FileSnapshot>,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl Checkpoint {
    const PREVIEW_CHARS: usize = 80;

    #[must_use]
    pub fn new(message_index: usize, preview: &str, created_at: SystemTime) -> Self {
        Self {
            message_index,
            preview: truncate_preview(preview, Self::PREVIEW_CHARS),
            created_at,
            snapshots: BTreeMap::new(),
            commands: Vec::new(),
        }
    }

    /// Keeps only the first snapshot recorded for a path.
    ///
    /// Returns `true` when the snapshot was stored.
    pub fn record_snapshot(&mut self, snapshot: FileSnapshot) -> bool {
        if self.snapshots.contains_key(&snapshot.path) {
            return false;
        }
        self.snapshots.insert(snapshot.path.clone(), snapshot);
        true
    }

    pub fn record_command(&mut self, command: impl Into<String>) {
        self.commands.push(command.into());
    }

    #[must_use]
    pub fn snapshot(&self, path: &Path) -> Option<&FileSnapshot> {
        self.snapshots.get(path)
    }

    /// Nothing worth persisting was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.commands.is_empty()
    }
}

fn truncate_preview(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let mut out: String = line.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Summary of a rollback. `success` is false when any path failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    pub restored: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub turns_removed: usize,
    /// Commands that ran inside the rolled-back span; they cannot be undone.
    pub irreversible_commands: Vec<String>,
}

impl RollbackResult {
    #[must_use]
    pub fn failed_without_changes() -> Self {
        Self {
            success: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::SystemTime;

    use super::{Checkpoint, FileSnapshot};

    #[test]
    fn first_snapshot_per_path_wins() {
        let mut cp = Checkpoint::new(3, "change a", SystemTime::UNIX_EPOCH);
        let path = PathBuf::from("/a.txt");
        assert!(cp.record_snapshot(FileSnapshot::new(
            path.clone(),
            Some("old".to_string()),
            false
        )));
        assert!(!cp.record_snapshot(FileSnapshot::new(
            path.clone(),
            Some("newer".to_string()),
            false
        )));
        assert_eq!(
            cp.snapshot(&path).and_then(|s| s.content_before.as_deref()),
            Some("old")
        );
    }

    #[test]
    fn empty_until_something_recorded() {
        let mut cp = Checkpoint::new(0, "hi", SystemTime::UNIX_EPOCH);
        assert!(cp.is_empty());
        cp.record_command("ls");
        assert!(!cp.is_empty());
    }

    #[test]
    fn preview_is_first_line_and_bounded() {
        let long = "x".repeat(200);
        let cp = Checkpoint::new(0, &format!("{long}\nsecond"), SystemTime::UNIX_EPOCH);
        assert_eq!(cp.preview.chars().count(), 80);
        assert!(cp.preview.ends_with('…'));

        let cp = Checkpoint::new(0, "  fix the bug\nplease", SystemTime::UNIX_EPOCH);
        assert_eq!(cp.preview, "fix the bug");
    }
}
