//! File tools: read/write/edit/list/search under the group's working
//! directory (§4.7, §1 "agent tool library").
//!
//! Grounded on the teacher's `tools/file.rs`, with the protected-path guard
//! there replaced by [`super::resolve_in_group`]'s stricter
//! absolute/`..`-escape rejection — this sandbox has no identity files to
//! special-case, but it does have a single mount boundary every tool must
//! respect.

use super::{resolve_in_group, str_arg, ToolContext};
use crate::error::{AgentError, Result};
use serde_json::{json, Value};

pub async fn read_file(args: &Value, ctx: &ToolContext<'_>) -> Result<Value> {
    let path = resolve_in_group(ctx.group_dir, str_arg(args, "path", "read_file")?)?;
    let content = tokio::fs::read_to_string(&path).await?;
    Ok(json!({ "content": content }))
}

pub async fn write_file(args: &Value, ctx: &ToolContext<'_>) -> Result<Value> {
    let path = resolve_in_group(ctx.group_dir, str_arg(args, "path", "write_file")?)?;
    let content = str_arg(args, "content", "write_file")?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, content).await?;
    Ok(json!({ "success": true }))
}

pub async fn edit_file(args: &Value, ctx: &ToolContext<'_>) -> Result<Value> {
    let path = resolve_in_group(ctx.group_dir, str_arg(args, "path", "edit_file")?)?;
    let find = str_arg(args, "find", "edit_file")?;
    let replace = str_arg(args, "replace", "edit_file")?;

    let original = tokio::fs::read_to_string(&path).await?;
    let Some(pos) = original.find(find) else {
        return Err(AgentError::InvalidArgs {
            tool: "edit_file".to_string(),
            reason: format!("string not found in {}", path.display()),
        }
        .into());
    };

    let mut updated = String::with_capacity(original.len());
    updated.push_str(&original[..pos]);
    updated.push_str(replace);
    updated.push_str(&original[pos + find.len()..]);
    tokio::fs::write(&path, updated).await?;
    Ok(json!({ "success": true }))
}

pub async fn list_files(args: &Value, ctx: &ToolContext<'_>) -> Result<Value> {
    let relative = args.get("path").and_then(Value::as_str).unwrap_or(".");
    let path = resolve_in_group(ctx.group_dir, relative)?;

    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(&path).await?;
    while let Some(entry) = reader.next_entry().await? {
        let file_type = entry.file_type().await?;
        entries.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "isDir": file_type.is_dir(),
        }));
    }
    Ok(json!({ "entries": entries }))
}

pub async fn search_files(args: &Value, ctx: &ToolContext<'_>) -> Result<Value> {
    let query = str_arg(args, "query", "search_files")?;
    let relative = args.get("path").and_then(Value::as_str).unwrap_or(".");
    let root = resolve_in_group(ctx.group_dir, relative)?;

    let mut matches = Vec::new();
    let mut stack = vec![root];
    while let Some(dir) = stack.pop() {
        let Ok(mut reader) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = reader.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            for (line_no, line) in content.lines().enumerate() {
                if line.contains(query) {
                    matches.push(json!({
                        "path": path.strip_prefix(ctx.group_dir).unwrap_or(&path).to_string_lossy(),
                        "line": line_no + 1,
                        "text": line,
                    }));
                }
            }
        }
    }
    Ok(json!({ "matches": matches }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: &std::path::Path) -> ToolContext<'_> {
        ToolContext { group_dir: dir, ipc_dir: dir, channel_id: "c1", is_main: false }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        write_file(&json!({ "path": "a.txt", "content": "hello" }), &c).await.unwrap();
        let result = read_file(&json!({ "path": "a.txt" }), &c).await.unwrap();
        assert_eq!(result["content"], "hello");
    }

    #[tokio::test]
    async fn edit_replaces_first_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        write_file(&json!({ "path": "a.txt", "content": "foo bar foo" }), &c).await.unwrap();
        edit_file(&json!({ "path": "a.txt", "find": "foo", "replace": "baz" }), &c)
            .await
            .unwrap();
        let result = read_file(&json!({ "path": "a.txt" }), &c).await.unwrap();
        assert_eq!(result["content"], "baz bar foo");
    }

    #[tokio::test]
    async fn edit_missing_string_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        write_file(&json!({ "path": "a.txt", "content": "hello" }), &c).await.unwrap();
        assert!(edit_file(&json!({ "path": "a.txt", "find": "nope", "replace": "x" }), &c)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn read_file_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        assert!(read_file(&json!({ "path": "../../etc/passwd" }), &c).await.is_err());
    }

    #[tokio::test]
    async fn search_finds_substring_with_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        write_file(&json!({ "path": "a.txt", "content": "line one\nneedle here\nline three" }), &c)
            .await
            .unwrap();
        let result = search_files(&json!({ "query": "needle" }), &c).await.unwrap();
        let matches = result["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["line"], 2);
    }
}
