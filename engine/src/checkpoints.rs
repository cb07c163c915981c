//! Checkpoint ledger: pre-turn file snapshots and command records.
//!
//! A checkpoint opens when a user turn is submitted and stays active until the
//! next user turn or the end of the session. Only the first mutation of a
//! path inside a checkpoint is snapshotted, so each snapshot holds the state
//! the file had before the agent touched it in that unit of work.
//!
//! Rolling back to checkpoint `k` restores the union of snapshots from `k`
//! onward. When several checkpoints snapshotted the same path, the earliest
//! one wins because it is the oldest known original.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Local;

use tether_types::{Checkpoint, FileSnapshot};
use tether_utils::{DiffStats, atomic_write, compute_diff_stats, format_unified_diff};

/// Everything a rollback to one checkpoint has to undo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackPlan {
    pub message_index: usize,
    pub snapshots: BTreeMap<PathBuf, FileSnapshot>,
    /// Commands that ran since the anchor; their effects cannot be undone.
    pub commands: Vec<String>,
}

/// Per-path line delta between a recorded original and a later state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathDiff {
    pub path: PathBuf,
    pub stats: DiffStats,
    pub unified: String,
}

#[derive(Debug, Default)]
pub struct CheckpointLedger {
    checkpoints: Vec<Checkpoint>,
    current: Option<Checkpoint>,
}

impl CheckpointLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger restored from persisted checkpoints; nothing is active.
    #[must_use]
    pub fn from_checkpoints(mut checkpoints: Vec<Checkpoint>) -> Self {
        checkpoints.sort_by_key(|cp| cp.message_index);
        Self {
            checkpoints,
            current: None,
        }
    }

    /// Finalize any active checkpoint, then open one anchored at `message_index`.
    ///
    /// Returns the anchor of the checkpoint that was finalized, if it was kept.
    pub fn begin(&mut self, message_index: usize, preview: &str, now: SystemTime) -> Option<usize> {
        let finalized = self.finalize();
        self.current = Some(Checkpoint::new(message_index, preview, now));
        tracing::debug!(message_index, "Checkpoint opened");
        finalized
    }

    /// Snapshot the pre-mutation state of a file. Later snapshots of the same
    /// path in the same checkpoint are ignored.
    pub fn record_file_change(&mut self, snapshot: FileSnapshot) -> bool {
        let Some(current) = self.current.as_mut() else {
            tracing::warn!(
                path = %snapshot.path.display(),
                "File change recorded with no active checkpoint"
            );
            return false;
        };
        current.record_snapshot(snapshot)
    }

    pub fn record_shell_command(&mut self, command: &str) -> bool {
        let Some(current) = self.current.as_mut() else {
            tracing::warn!("Shell command recorded with no active checkpoint");
            return false;
        };
        current.record_command(command);
        true
    }

    /// Close the active checkpoint. Empty checkpoints are discarded.
    ///
    /// Returns the anchor of the kept checkpoint.
    pub fn finalize(&mut self) -> Option<usize> {
        let checkpoint = self.current.take()?;
        if checkpoint.is_empty() {
            tracing::debug!(message_index = checkpoint.message_index, "Discarding empty checkpoint");
            return None;
        }
        let index = checkpoint.message_index;
        tracing::info!(
            message_index = index,
            files = checkpoint.snapshots.len(),
            commands = checkpoint.commands.len(),
            "Checkpoint finalized"
        );
        // Anchors are monotonic in normal operation; keep the list sorted
        // even if a restored ledger disagrees.
        let pos = self
            .checkpoints
            .partition_point(|cp| cp.message_index < index);
        self.checkpoints.insert(pos, checkpoint);
        Some(index)
    }

    #[must_use]
    pub fn has_active(&self) -> bool {
        self.current.is_some()
    }

    #[must_use]
    pub fn current(&self) -> Option<&Checkpoint> {
        self.current.as_ref()
    }

    /// Finalized checkpoints, oldest first.
    #[must_use]
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Checkpoint anchored at `message_index`, finalized or active.
    #[must_use]
    pub fn checkpoint_for_turn(&self, message_index: usize) -> Option<&Checkpoint> {
        self.checkpoints
            .iter()
            .chain(self.current.iter())
            .find(|cp| cp.message_index == message_index)
    }

    fn from_anchor(&self, message_index: usize) -> impl Iterator<Item = &Checkpoint> {
        self.checkpoints
            .iter()
            .chain(self.current.iter())
            .filter(move |cp| cp.message_index >= message_index)
    }

    /// Union of snapshots and commands from the anchored checkpoint onward.
    ///
    /// `None` when no checkpoint is anchored at `message_index`.
    #[must_use]
    pub fn rollback_plan(&self, message_index: usize) -> Option<RollbackPlan> {
        self.checkpoint_for_turn(message_index)?;

        let mut snapshots = BTreeMap::new();
        let mut commands = Vec::new();
        for checkpoint in self.from_anchor(message_index) {
            for (path, snapshot) in &checkpoint.snapshots {
                snapshots
                    .entry(path.clone())
                    .or_insert_with(|| snapshot.clone());
            }
            commands.extend(checkpoint.commands.iter().cloned());
        }
        Some(RollbackPlan {
            message_index,
            snapshots,
            commands,
        })
    }

    /// Drop every checkpoint anchored at or after `message_index` and clear
    /// the active one.
    pub fn discard_from(&mut self, message_index: usize) {
        self.checkpoints.retain(|cp| cp.message_index < message_index);
        self.current = None;
    }

    /// Paths touched from the anchored checkpoint onward.
    #[must_use]
    pub fn changed_paths_since(&self, message_index: usize) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .from_anchor(message_index)
            .flat_map(|cp| cp.snapshots.keys().cloned())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// Line diffs between the oldest original recorded at or after `from` and
    /// the state at `to`.
    ///
    /// The state at `to` is the earliest original recorded at or after `to`;
    /// paths not touched since `to` (or every path when `to` is `None`) are
    /// compared against what is on disk now. Unchanged paths are omitted.
    #[must_use]
    pub fn diff_between(&self, from: usize, to: Option<usize>) -> Vec<PathDiff> {
        let originals = earliest_originals(
            self.from_anchor(from)
                .filter(|cp| to.is_none_or(|to| cp.message_index < to)),
        );
        let later = match to {
            Some(to) => earliest_originals(self.from_anchor(to)),
            None => BTreeMap::new(),
        };

        let mut diffs = Vec::new();
        for (path, before) in originals {
            let after = match later.get(&path) {
                Some(content) => content.clone(),
                None => read_current(&path),
            };
            let old_text = before.as_deref().unwrap_or_default();
            let new_text = after.as_deref().unwrap_or_default();
            let stats = compute_diff_stats(old_text, new_text);
            if stats.is_unchanged() && before.is_some() == after.is_some() {
                continue;
            }
            diffs.push(PathDiff {
                unified: format_unified_diff(old_text, new_text),
                path,
                stats,
            });
        }
        diffs
    }
}

fn earliest_originals<'a>(
    checkpoints: impl Iterator<Item = &'a Checkpoint>,
) -> BTreeMap<PathBuf, Option<String>> {
    let mut originals = BTreeMap::new();
    for checkpoint in checkpoints {
        for (path, snapshot) in &checkpoint.snapshots {
            originals
                .entry(path.clone())
                .or_insert_with(|| snapshot.content_before.clone());
        }
    }
    originals
}

fn read_current(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

/// Put every path in `plan` back to its recorded original.
///
/// Files that did not exist are deleted; everything else is rewritten. One
/// failing path does not stop the rest.
#[must_use]
pub fn restore_snapshots(plan: &RollbackPlan) -> (Vec<PathBuf>, Vec<(PathBuf, String)>) {
    let mut restored = Vec::new();
    let mut failed = Vec::new();
    for (path, snapshot) in &plan.snapshots {
        let outcome = match (&snapshot.content_before, snapshot.was_created) {
            (None, _) | (_, true) => remove_if_exists(path).map(|_| ()),
            (Some(content), false) => restore_file(path, content.as_bytes()),
        };
        match outcome {
            Ok(()) => restored.push(path.clone()),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to restore file: {e}");
                failed.push((path.clone(), e.to_string()));
            }
        }
    }
    (restored, failed)
}

fn restore_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Ok(meta) = std::fs::metadata(path)
        && meta.is_dir()
    {
        return Err(std::io::Error::other(format!(
            "Refusing to overwrite directory: {}",
            path.display()
        )));
    }
    atomic_write(path, bytes)
}

fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Err(std::io::Error::other(format!(
            "Refusing to remove directory: {}",
            path.display()
        ))),
        Ok(_) => {
            std::fs::remove_file(path)?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// One line for checkpoint listings.
#[must_use]
pub fn format_checkpoint_line(checkpoint: &Checkpoint) -> String {
    let when = chrono::DateTime::<chrono::Utc>::from(checkpoint.created_at)
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S");
    format!(
        "#{index}  {when}  files:{files}  commands:{commands}  {preview}",
        index = checkpoint.message_index,
        files = checkpoint.snapshots.len(),
        commands = checkpoint.commands.len(),
        preview = checkpoint.preview,
    )
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::SystemTime;

    use tether_types::FileSnapshot;

    use super::{CheckpointLedger, format_checkpoint_line, restore_snapshots};

    fn modified(path: &PathBuf, before: &str) -> FileSnapshot {
        FileSnapshot::new(path.clone(), Some(before.to_string()), false)
    }

    fn created(path: &PathBuf) -> FileSnapshot {
        FileSnapshot::new(path.clone(), None, true)
    }

    #[test]
    fn recording_without_active_checkpoint_is_a_noop() {
        let mut ledger = CheckpointLedger::new();
        assert!(!ledger.record_file_change(created(&PathBuf::from("/tmp/x"))));
        assert!(!ledger.record_shell_command("ls"));
        assert!(ledger.checkpoints().is_empty());
    }

    #[test]
    fn empty_checkpoints_are_discarded_on_finalize() {
        let mut ledger = CheckpointLedger::new();
        ledger.begin(0, "hello", SystemTime::UNIX_EPOCH);
        assert_eq!(ledger.begin(2, "again", SystemTime::UNIX_EPOCH), None);
        ledger.record_shell_command("cargo test");
        assert_eq!(ledger.finalize(), Some(2));
        assert_eq!(ledger.checkpoints().len(), 1);
        assert_eq!(ledger.checkpoints()[0].message_index, 2);
        assert!(!ledger.has_active());
    }

    #[test]
    fn first_snapshot_per_path_wins_within_checkpoint() {
        let path = PathBuf::from("/tmp/a.txt");
        let mut ledger = CheckpointLedger::new();
        ledger.begin(0, "edit", SystemTime::UNIX_EPOCH);
        assert!(ledger.record_file_change(modified(&path, "v0")));
        assert!(!ledger.record_file_change(modified(&path, "v1")));
        let plan = ledger.rollback_plan(0).unwrap();
        assert_eq!(plan.snapshots[&path].content_before.as_deref(), Some("v0"));
    }

    #[test]
    fn plan_unions_later_checkpoints_with_earliest_original() {
        let a = PathBuf::from("/tmp/a.txt");
        let b = PathBuf::from("/tmp/b.txt");
        let mut ledger = CheckpointLedger::new();
        ledger.begin(0, "one", SystemTime::UNIX_EPOCH);
        ledger.record_file_change(modified(&a, "a0"));
        ledger.begin(2, "two", SystemTime::UNIX_EPOCH);
        ledger.record_file_change(modified(&a, "a1"));
        ledger.record_file_change(created(&b));
        ledger.record_shell_command("make");
        ledger.begin(4, "three", SystemTime::UNIX_EPOCH);
        ledger.record_shell_command("make install");

        let plan = ledger.rollback_plan(0).unwrap();
        assert_eq!(plan.snapshots[&a].content_before.as_deref(), Some("a0"));
        assert!(plan.snapshots[&b].was_created);
        assert_eq!(plan.commands, vec!["make", "make install"]);

        let plan = ledger.rollback_plan(2).unwrap();
        assert_eq!(plan.snapshots[&a].content_before.as_deref(), Some("a1"));

        assert!(ledger.rollback_plan(1).is_none());
        assert_eq!(ledger.changed_paths_since(2), vec![a, b]);
    }

    #[test]
    fn discard_from_keeps_earlier_checkpoints() {
        let mut ledger = CheckpointLedger::new();
        for index in [0, 2, 4] {
            ledger.begin(index, "turn", SystemTime::UNIX_EPOCH);
            ledger.record_shell_command("ls");
        }
        ledger.discard_from(2);
        assert_eq!(ledger.checkpoints().len(), 1);
        assert!(!ledger.has_active());
        assert!(ledger.checkpoint_for_turn(4).is_none());
    }

    #[test]
    fn restore_rewrites_modified_and_deletes_created() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.txt");
        let made = dir.path().join("nested").join("made.txt");
        let gone = dir.path().join("gone.txt");
        fs::write(&kept, "changed").unwrap();
        fs::create_dir_all(made.parent().unwrap()).unwrap();
        fs::write(&made, "new").unwrap();

        let mut ledger = CheckpointLedger::new();
        ledger.begin(0, "work", SystemTime::UNIX_EPOCH);
        ledger.record_file_change(modified(&kept, "original"));
        ledger.record_file_change(created(&made));
        // Created then deleted again before rollback.
        ledger.record_file_change(created(&gone));

        let (restored, failed) = restore_snapshots(&ledger.rollback_plan(0).unwrap());
        assert!(failed.is_empty(), "{failed:?}");
        assert_eq!(restored.len(), 3);
        assert_eq!(fs::read_to_string(&kept).unwrap(), "original");
        assert!(!made.exists());
        assert!(!gone.exists());
    }

    #[test]
    fn restore_reports_directory_conflicts_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        fs::create_dir(&blocked).unwrap();
        let fine = dir.path().join("fine.txt");

        let mut ledger = CheckpointLedger::new();
        ledger.begin(0, "work", SystemTime::UNIX_EPOCH);
        ledger.record_file_change(modified(&blocked, "text"));
        ledger.record_file_change(modified(&fine, "back"));

        let (restored, failed) = restore_snapshots(&ledger.rollback_plan(0).unwrap());
        assert_eq!(restored, vec![fine.clone()]);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, blocked);
        assert_eq!(fs::read_to_string(fine).unwrap(), "back");
    }

    #[test]
    fn diff_between_compares_originals_with_disk() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        fs::write(&a, "one\nTWO\nthree\nfour\n").unwrap();

        let mut ledger = CheckpointLedger::new();
        ledger.begin(0, "first", SystemTime::UNIX_EPOCH);
        ledger.record_file_change(modified(&a, "one\ntwo\nthree\n"));
        ledger.begin(2, "second", SystemTime::UNIX_EPOCH);
        ledger.record_file_change(modified(&a, "one\nTWO\nthree\n"));

        let now = ledger.diff_between(0, None);
        assert_eq!(now.len(), 1);
        assert_eq!(now[0].stats.additions, 2);
        assert_eq!(now[0].stats.deletions, 1);

        let first_turn = ledger.diff_between(0, Some(2));
        assert_eq!(first_turn[0].stats.additions, 1);
        assert_eq!(first_turn[0].stats.deletions, 1);
    }

    #[test]
    fn format_line_mentions_anchor_and_counts() {
        let mut ledger = CheckpointLedger::new();
        ledger.begin(3, "Refactor the parser\nplease", SystemTime::UNIX_EPOCH);
        ledger.record_shell_command("cargo fmt");
        ledger.finalize();
        let line = format_checkpoint_line(&ledger.checkpoints()[0]);
        assert!(line.starts_with("#3  "));
        assert!(line.contains("files:0  commands:1  Refactor the parser"));
    }
}
