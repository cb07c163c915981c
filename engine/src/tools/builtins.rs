//! Built-in file tools.

use std::path::Path;
use std::time::SystemTime;

use serde::Deserialize;
use serde_json::{Value, json};

use tether_types::{ChangeId, FileChange};

use super::{ToolCtx, ToolError, ToolExecutor, ToolFut, ToolRegistry, truncate_output};

pub fn register_builtins(registry: &mut ToolRegistry) {
    let tools: [Box<dyn ToolExecutor>; 4] = [
        Box::new(ReadFile),
        Box::new(WriteFile),
        Box::new(EditFile),
        Box::new(DeleteFile),
    ];
    for tool in tools {
        if let Err(e) = registry.register(tool) {
            tracing::warn!("Skipping built-in tool: {e}");
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::bad_args(e.to_string()))
}

fn new_change_id() -> ChangeId {
    ChangeId::new(uuid::Uuid::new_v4().to_string())
}

/// Current text of `path`, `None` if it does not exist.
pub(crate) fn read_existing(path: &Path) -> Result<Option<String>, ToolError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Err(ToolError::bad_args(format!(
            "{} is a directory",
            path.display()
        ))),
        Ok(_) => std::fs::read_to_string(path)
            .map(Some)
            .map_err(|e| ToolError::io(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ToolError::io(path, e)),
    }
}

fn read_required(path: &Path) -> Result<String, ToolError> {
    read_existing(path)?
        .ok_or_else(|| ToolError::bad_args(format!("{} does not exist", path.display())))
}

async fn write_text(path: &Path, content: &str) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ToolError::io(parent, e))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| ToolError::io(path, e))
}

#[derive(Debug, Default)]
pub struct ReadFile;

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
    start_line: Option<usize>,
    end_line: Option<usize>,
}

impl ToolExecutor for ReadFile {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a text file, optionally a 1-based inclusive line range"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "start_line": { "type": "integer", "minimum": 1 },
                "end_line": { "type": "integer", "minimum": 1 }
            },
            "required": ["path"]
        })
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: ReadFileArgs = parse_args(&args)?;
            let path = ctx.resolve(&args.path);
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ToolError::io(&path, e))?;

            let content = match (args.start_line, args.end_line) {
                (None, None) => content,
                (start, end) => {
                    let start = start.unwrap_or(1);
                    let end = end.unwrap_or(usize::MAX);
                    if end < start {
                        return Err(ToolError::bad_args("end_line is before start_line"));
                    }
                    content
                        .lines()
                        .skip(start - 1)
                        .take(end - start + 1)
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            };
            Ok(truncate_output(content, ctx.max_output_bytes))
        })
    }
}

#[derive(Debug, Default)]
pub struct WriteFile;

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

impl ToolExecutor for WriteFile {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Create or overwrite a file with the given content"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    fn supports_preview(&self) -> bool {
        true
    }

    fn preview(&self, args: &Value, ctx: &ToolCtx) -> Result<Option<FileChange>, ToolError> {
        let args: WriteFileArgs = parse_args(args)?;
        let path = ctx.resolve(&args.path);
        let before = read_existing(&path)?;
        Ok(Some(FileChange::new(
            new_change_id(),
            path,
            before,
            Some(args.content),
            SystemTime::now(),
        )))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: WriteFileArgs = parse_args(&args)?;
            let path = ctx.resolve(&args.path);
            write_text(&path, &args.content).await?;
            Ok(format!(
                "Wrote {} bytes to {}",
                args.content.len(),
                path.display()
            ))
        })
    }
}

#[derive(Debug, Default)]
pub struct EditFile;

#[derive(Debug, Deserialize)]
struct EditFileArgs {
    path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

impl EditFileArgs {
    fn apply(&self, before: &str) -> Result<String, ToolError> {
        if self.old_string.is_empty() {
            return Err(ToolError::bad_args("old_string must not be empty"));
        }
        match before.matches(&self.old_string).count() {
            0 => Err(ToolError::bad_args(format!(
                "old_string not found in {}",
                self.path
            ))),
            1 => Ok(before.replacen(&self.old_string, &self.new_string, 1)),
            n if self.replace_all => {
                tracing::debug!(occurrences = n, path = %self.path, "Replacing all occurrences");
                Ok(before.replace(&self.old_string, &self.new_string))
            }
            n => Err(ToolError::bad_args(format!(
                "old_string matches {n} times in {}; set replace_all or add context",
                self.path
            ))),
        }
    }
}

impl ToolExecutor for EditFile {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn description(&self) -> &'static str {
        "Replace an exact string in an existing file"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "old_string": { "type": "string" },
                "new_string": { "type": "string" },
                "replace_all": { "type": "boolean" }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    fn supports_preview(&self) -> bool {
        true
    }

    fn preview(&self, args: &Value, ctx: &ToolCtx) -> Result<Option<FileChange>, ToolError> {
        let args: EditFileArgs = parse_args(args)?;
        let path = ctx.resolve(&args.path);
        let before = read_required(&path)?;
        let after = args.apply(&before)?;
        Ok(Some(FileChange::new(
            new_change_id(),
            path,
            Some(before),
            Some(after),
            SystemTime::now(),
        )))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: EditFileArgs = parse_args(&args)?;
            let path = ctx.resolve(&args.path);
            let before = read_required(&path)?;
            let after = args.apply(&before)?;
            write_text(&path, &after).await?;
            Ok(format!("Edited {}", path.display()))
        })
    }
}

#[derive(Debug, Default)]
pub struct DeleteFile;

#[derive(Debug, Deserialize)]
struct DeleteFileArgs {
    path: String,
}

impl ToolExecutor for DeleteFile {
    fn name(&self) -> &'static str {
        "delete_file"
    }

    fn description(&self) -> &'static str {
        "Delete a file"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    fn supports_preview(&self) -> bool {
        true
    }

    fn always_requires_approval(&self) -> bool {
        true
    }

    fn preview(&self, args: &Value, ctx: &ToolCtx) -> Result<Option<FileChange>, ToolError> {
        let args: DeleteFileArgs = parse_args(args)?;
        let path = ctx.resolve(&args.path);
        let before = read_required(&path)?;
        Ok(Some(FileChange::new(
            new_change_id(),
            path,
            Some(before),
            None,
            SystemTime::now(),
        )))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: DeleteFileArgs = parse_args(&args)?;
            let path = ctx.resolve(&args.path);
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| ToolError::io(&path, e))?;
            Ok(format!("Deleted {}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tether_types::FileOperation;

    use super::{DeleteFile, EditFile, ReadFile, WriteFile};
    use crate::tools::{ToolCtx, ToolError, ToolExecutor};

    fn ctx(dir: &tempfile::TempDir) -> ToolCtx {
        ToolCtx {
            working_dir: dir.path().to_path_buf(),
            max_output_bytes: 1024,
        }
    }

    #[tokio::test]
    async fn write_preview_marks_creation_then_writes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(&dir);
        let args = json!({"path": "sub/new.txt", "content": "hello"});

        let change = WriteFile.preview(&args, &ctx).unwrap().unwrap();
        assert_eq!(change.operation, FileOperation::Create);
        assert!(change.content_before.is_none());

        WriteFile.execute(args, &ctx).await.unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("sub/new.txt")).unwrap(),
            "hello"
        );
    }

    #[tokio::test]
    async fn edit_requires_unique_match_unless_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x = 1\nx = 1\n").unwrap();
        let ctx = ctx(&dir);

        let ambiguous = json!({"path": "a.txt", "old_string": "x = 1", "new_string": "x = 2"});
        assert!(matches!(
            EditFile.preview(&ambiguous, &ctx),
            Err(ToolError::BadArgs { .. })
        ));

        let all = json!({"path": "a.txt", "old_string": "x = 1", "new_string": "x = 2", "replace_all": true});
        let change = EditFile.preview(&all, &ctx).unwrap().unwrap();
        assert_eq!(change.content_after.as_deref(), Some("x = 2\nx = 2\n"));
        EditFile.execute(all, &ctx).await.unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "x = 2\nx = 2\n"
        );

        let missing = json!({"path": "a.txt", "old_string": "nope", "new_string": ""});
        assert!(EditFile.preview(&missing, &ctx).is_err());
    }

    #[tokio::test]
    async fn delete_always_asks_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("gone.txt"), "bye").unwrap();
        let ctx = ctx(&dir);
        let args = json!({"path": "gone.txt"});

        assert!(DeleteFile.always_requires_approval());
        let change = DeleteFile.preview(&args, &ctx).unwrap().unwrap();
        assert_eq!(change.operation, FileOperation::Delete);
        assert_eq!(change.content_before.as_deref(), Some("bye"));

        DeleteFile.execute(args.clone(), &ctx).await.unwrap();
        assert!(!dir.path().join("gone.txt").exists());
        assert!(DeleteFile.preview(&args, &ctx).is_err());
    }

    #[tokio::test]
    async fn read_file_honors_line_range() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("r.txt"), "1\n2\n3\n4\n").unwrap();
        let ctx = ctx(&dir);
        let out = ReadFile
            .execute(json!({"path": "r.txt", "start_line": 2, "end_line": 3}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, "2\n3");
        assert!(!ReadFile.supports_preview());
    }
}
