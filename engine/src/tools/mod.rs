//! Tool executor framework.
//!
//! Executors describe their arguments with a JSON schema, may produce a
//! [`FileChange`] preview for the approval gate, and run asynchronously.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;

use tether_types::FileChange;

pub mod builtins;
pub mod shell;

pub use builtins::register_builtins;

/// Output cap for tool results handed back to the conversation.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("Rejected by user")]
    Rejected,
    #[error("Tool execution failed: {tool}: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn bad_args(message: impl Into<String>) -> Self {
        Self::BadArgs {
            message: message.into(),
        }
    }
}

/// What an executor can see of the session.
#[derive(Debug, Clone)]
pub struct ToolCtx {
    pub working_dir: PathBuf,
    pub max_output_bytes: usize,
}

impl ToolCtx {
    /// Relative paths are taken from the working directory.
    #[must_use]
    pub fn resolve(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }
}

pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> Value;
    /// Whether [`ToolExecutor::preview`] yields a file change worth gating.
    fn supports_preview(&self) -> bool {
        false
    }
    /// Ask the user even when approvals are switched off.
    fn always_requires_approval(&self) -> bool {
        false
    }
    fn preview(&self, _args: &Value, _ctx: &ToolCtx) -> Result<Option<FileChange>, ToolError> {
        Ok(None)
    }
    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a>;
}

#[derive(Default)]
pub struct ToolRegistry {
    executors: HashMap<String, Box<dyn ToolExecutor>>,
}

impl ToolRegistry {
    /// Registry holding the file tools.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, executor: Box<dyn ToolExecutor>) -> Result<(), ToolError> {
        let name = executor.name().to_string();
        if self.executors.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.executors.insert(name, executor);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&dyn ToolExecutor, ToolError> {
        self.executors
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.executors.values().map(|e| e.name()).collect();
        names.sort_unstable();
        names
    }
}

pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ToolError::BadArgs {
        message: format!("Invalid tool schema: {e}"),
    })?;
    let errors: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolError::BadArgs {
            message: errors.join("; "),
        })
    }
}

/// Truncate tool output to at most `effective_max` bytes, marker included.
pub fn truncate_output(output: String, effective_max: usize) -> String {
    if output.len() <= effective_max {
        return output;
    }
    let marker = "\n\n... [output truncated]";
    if effective_max <= marker.len() {
        return marker[..effective_max].to_string();
    }
    let mut end = effective_max - marker.len();
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = output;
    truncated.truncate(end);
    truncated.push_str(marker);
    truncated
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::{ToolCtx, ToolError, ToolRegistry, truncate_output, validate_args};

    #[test]
    fn registry_rejects_duplicates_and_unknown_names() {
        let mut registry = ToolRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec!["delete_file", "edit_file", "read_file", "write_file"]
        );
        let err = registry
            .register(Box::new(super::builtins::ReadFile))
            .unwrap_err();
        assert!(matches!(err, ToolError::DuplicateTool { .. }));
        assert!(matches!(
            registry.lookup("format_disk"),
            Err(ToolError::UnknownTool { .. })
        ));
    }

    #[test]
    fn validate_args_reports_schema_violations() {
        let schema = json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        });
        assert!(validate_args(&schema, &json!({"path": "a.txt"})).is_ok());
        let err = validate_args(&schema, &json!({"path": 3})).unwrap_err();
        assert!(matches!(err, ToolError::BadArgs { .. }));
        assert!(validate_args(&schema, &json!({})).is_err());
    }

    #[test]
    fn truncate_output_keeps_marker_within_limit() {
        let out = truncate_output("x".repeat(100), 40);
        assert!(out.len() <= 40);
        assert!(out.ends_with("[output truncated]"));
        assert_eq!(truncate_output("short".into(), 40), "short");
        assert_eq!(truncate_output("é".repeat(30), 30).len(), 30);
    }

    #[test]
    fn ctx_resolves_relative_paths_against_working_dir() {
        let ctx = ToolCtx {
            working_dir: PathBuf::from("/work"),
            max_output_bytes: 10,
        };
        assert_eq!(ctx.resolve("src/lib.rs"), PathBuf::from("/work/src/lib.rs"));
        assert_eq!(ctx.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }
}
