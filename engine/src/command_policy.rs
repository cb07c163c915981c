//! Shell command classification for the approval gate.
//!
//! Two lists drive the decision:
//! - destructive patterns (regex) are **always** gated, whatever the settings;
//! - the read-only allowlist may skip the gate when auto-approval is enabled.

use regex::RegexSet;

/// Each tuple: `(regex_pattern, human_readable_reason)`.
pub const DEFAULT_DESTRUCTIVE_PATTERNS: &[(&str, &str)] = &[
    (
        r"(?i)\brm\s+(?:\S+\s+)*?(?:-[a-zA-Z]*[rR][a-zA-Z]*|--recursive)(?:\s|$)",
        "Recursive delete",
    ),
    (r"(?i)\brm\s+(?:\S+\s+)*?-[a-zA-Z]*f", "Forced delete"),
    (r"\bgit\s+reset\s+--hard\b", "Discards uncommitted work"),
    (r"\bgit\s+clean\s+(?:\S+\s+)*?-[a-zA-Z]*f", "Deletes untracked files"),
    (
        r"\bgit\s+push\s+(?:\S+\s+)*?(?:--force\b|-f\b)",
        "Rewrites remote history",
    ),
    (r"\bgit\s+checkout\s+--\s", "Discards working tree changes"),
    (r"(?i)\bdd\s+.*\bof=", "Raw write with dd"),
    (r"(?i)\bmkfs(?:\.\w+)?\b", "Formats a filesystem"),
    (r"(?i)\b(?:chmod|chown)\s+(?:\S+\s+)*?-R\b", "Recursive permission change"),
    (r"(?i)\bshred\b", "Irrecoverable delete"),
    (r"(?i)\bsudo\b", "Elevated privileges"),
    (r":\(\)\s*\{\s*:\|:&\s*\}\s*;:", "Fork bomb"),
    (r"(?i)\bRemove-Item\b.*-Recurse", "Recursive delete"),
];

/// Programs (optionally with a fixed subcommand) that only read state.
pub const DEFAULT_READ_ONLY_COMMANDS: &[&str] = &[
    "ls",
    "pwd",
    "cat",
    "head",
    "tail",
    "wc",
    "echo",
    "which",
    "whoami",
    "date",
    "grep",
    "rg",
    "tree",
    "file",
    "stat",
    "du",
    "df",
    "uname",
    "git status",
    "git log",
    "git diff",
    "git show",
    "git branch",
];

// Anything that can chain, redirect or substitute disqualifies a command from
// the allowlist.
const SHELL_METACHARACTERS: &[&str] = &[";", "&", "|", ">", "<", "`", "$(", "\n"];

#[derive(Debug, Clone)]
pub struct CommandPolicy {
    destructive: RegexSet,
    reasons: Vec<String>,
    read_only: Vec<Vec<String>>,
}

impl CommandPolicy {
    pub fn new(destructive: &[(&str, &str)], read_only: &[&str]) -> Result<Self, regex::Error> {
        let regex_set = RegexSet::new(destructive.iter().map(|(pattern, _)| *pattern))?;
        let reasons = destructive
            .iter()
            .map(|(_, reason)| (*reason).to_string())
            .collect();
        Ok(Self {
            destructive: regex_set,
            reasons,
            read_only: read_only.iter().map(|entry| tokenize(entry)).collect(),
        })
    }

    /// Gates nothing and allowlists nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            destructive: RegexSet::empty(),
            reasons: Vec::new(),
            read_only: Vec::new(),
        }
    }

    pub fn with_defaults() -> Result<Self, regex::Error> {
        Self::new(DEFAULT_DESTRUCTIVE_PATTERNS, DEFAULT_READ_ONLY_COMMANDS)
    }

    /// Build from user overrides; `None` keeps the corresponding default.
    pub fn from_overrides(
        read_only: Option<Vec<String>>,
        destructive: Option<Vec<String>>,
    ) -> Result<Self, regex::Error> {
        let destructive_pairs: Vec<(&str, &str)> = match &destructive {
            Some(patterns) => patterns
                .iter()
                .map(|p| (p.as_str(), "Matches a configured destructive pattern"))
                .collect(),
            None => DEFAULT_DESTRUCTIVE_PATTERNS.to_vec(),
        };
        let read_only_refs: Vec<&str> = match &read_only {
            Some(entries) => entries.iter().map(String::as_str).collect(),
            None => DEFAULT_READ_ONLY_COMMANDS.to_vec(),
        };
        Self::new(&destructive_pairs, &read_only_refs)
    }

    /// Reason for the first destructive pattern the command matches.
    #[must_use]
    pub fn destructive_reason(&self, command: &str) -> Option<&str> {
        self.destructive
            .matches(command)
            .iter()
            .next()
            .map(|idx| self.reasons[idx].as_str())
    }

    #[must_use]
    pub fn is_destructive(&self, command: &str) -> bool {
        self.destructive.is_match(command)
    }

    #[must_use]
    pub fn is_read_only(&self, command: &str) -> bool {
        if SHELL_METACHARACTERS.iter().any(|m| command.contains(m)) {
            return false;
        }
        let tokens = tokenize(command);
        if tokens.is_empty() {
            return false;
        }
        self.read_only
            .iter()
            .any(|entry| !entry.is_empty() && tokens.starts_with(entry))
    }
}

fn tokenize(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Shorten a command for log lines and prompts.
pub(crate) fn truncate_command(cmd: &str, max_len: usize) -> String {
    if cmd.len() <= max_len {
        cmd.to_string()
    } else {
        let mut end = max_len;
        while end > 0 && !cmd.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &cmd[..end])
    }
}
