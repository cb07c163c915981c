//! Line diff statistics and compact unified diffs.

use std::fmt::Write as _;

use similar::{ChangeTag, TextDiff};

/// Line additions and deletions between two texts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub additions: u32,
    pub deletions: u32,
}

impl DiffStats {
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.additions == 0 && self.deletions == 0
    }
}

#[must_use]
pub fn compute_diff_stats(old_text: &str, new_text: &str) -> DiffStats {
    let diff = TextDiff::from_lines(old_text, new_text);
    let mut stats = DiffStats::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => stats.additions = stats.additions.saturating_add(1),
            ChangeTag::Delete => stats.deletions = stats.deletions.saturating_add(1),
            ChangeTag::Equal => {}
        }
    }
    stats
}

/// Numbered `+`/`-` lines with one line of context and `...` between hunks.
///
/// Used for approval previews in the line-oriented front end.
#[must_use]
pub fn format_unified_diff(old_text: &str, new_text: &str) -> String {
    let diff = TextDiff::from_lines(old_text, new_text);
    let changes: Vec<_> = diff.iter_all_changes().collect();
    let max_line = old_text.lines().count().max(new_text.lines().count()).max(1);
    let width = max_line.to_string().len();

    let mut out = String::new();
    let mut last_shown: Option<usize> = None;

    for (i, change) in changes.iter().enumerate() {
        let (marker, line_no) = match change.tag() {
            ChangeTag::Equal => {
                let near_change = (i > 0 && changes[i - 1].tag() != ChangeTag::Equal)
                    || changes
                        .get(i + 1)
                        .is_some_and(|c| c.tag() != ChangeTag::Equal);
                if !near_change {
                    continue;
                }
                (' ', change.old_index())
            }
            ChangeTag::Delete => ('-', change.old_index()),
            ChangeTag::Insert => ('+', change.new_index()),
        };
        if let Some(prev) = last_shown
            && i - prev > 1
        {
            let _ = writeln!(out, "{:>width$}", "...");
        }
        let line_no = line_no.map_or(0, |n| n + 1);
        let _ = writeln!(
            out,
            "{line_no:>width$} {marker}{}",
            change.value().trim_end_matches('\n')
        );
        last_shown = Some(i);
    }

    out
}
