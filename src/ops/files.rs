//! File and directory operations.
//!
//! Data files named in parameters are read from the plan's data bundle via
//! the execution context; targets are absolute paths on the host.

use super::{param, run_single, ToolSession};
use crate::context::ExecutionContext;
use crate::registry::{OpFailure, OpOutput, OpResult};
use crate::state_store::sync_dir;
use crate::tool_traits::ToolArgs;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt};
use std::path::{Component, Path};
use tempfile::NamedTempFile;

/// Opening line of a block appended by `AppendFile`, followed by the data
/// file name
pub const APPEND_START: &str = "# hostplan START";
/// Closing line of a block appended by `AppendFile`, followed by the data
/// file name
pub const APPEND_END: &str = "# hostplan END";

// ============================================================================
// Tool arguments
// ============================================================================

/// `chown [-R] <owner> <path>`
#[derive(Debug, Clone)]
pub struct ChownArgs {
    pub owner: String,
    pub path: String,
    pub recursive: bool,
}

impl ToolArgs for ChownArgs {
    fn program(&self) -> &str {
        "chown"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.recursive {
            args.push("-R".to_string());
        }
        args.push(self.owner.clone());
        args.push(self.path.clone());
        args
    }
}

/// `chmod -R <mode> <path>`
#[derive(Debug, Clone)]
pub struct ChmodArgs {
    pub mode: String,
    pub path: String,
}

impl ToolArgs for ChmodArgs {
    fn program(&self) -> &str {
        "chmod"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-R".to_string(), self.mode.clone(), self.path.clone()]
    }
}

/// In-place extended-regex substitution with `sed`
#[derive(Debug, Clone)]
pub struct SedArgs {
    pub expression: String,
    pub file: String,
}

impl ToolArgs for SedArgs {
    fn program(&self) -> &str {
        "sed"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-Ei".to_string(),
            "-e".to_string(),
            self.expression.clone(),
            self.file.clone(),
        ]
    }
}

/// Resumable download with `wget --continue`
#[derive(Debug, Clone)]
pub struct WgetArgs {
    pub url: String,
    pub output: String,
}

impl ToolArgs for WgetArgs {
    fn program(&self) -> &str {
        "wget"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--continue".to_string(),
            self.url.clone(),
            "-O".to_string(),
            self.output.clone(),
        ]
    }
}

// ============================================================================
// Operations
// ============================================================================

/// `CreateDir <dir>`: create the directory (and parents) unless present
pub fn create_dir(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    let dir = Path::new(param(params, 0, "dir")?);
    if dir.exists() {
        tracing::debug!(dir = %dir.display(), "directory already exists");
        return Ok(OpOutput::empty());
    }
    fs::DirBuilder::new().recursive(true).mode(0o755).create(dir)?;
    Ok(OpOutput::empty())
}

/// `AppendFile <data-file> <target>`: append a data file between marker
/// lines naming it, once per data file
///
/// A block whose END line is missing was cut off mid-write; it is dropped
/// and the block written again.
pub fn append_file(ctx: &ExecutionContext, params: &[String]) -> OpResult {
    let name = param(params, 0, "data-file")?;
    let target = Path::new(param(params, 1, "target")?);

    let start = format!("{} {}", APPEND_START, name);
    let end = format!("{} {}", APPEND_END, name);

    let existing = match fs::read_to_string(target) {
        Ok(existing) => Some(existing),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    let block = match existing.as_deref().map(|text| find_block(text, &start, &end)) {
        Some(BlockState::Complete) => {
            return Ok(OpOutput::new(format!(
                "{} already contains the {} block",
                target.display(),
                name
            )));
        }
        Some(BlockState::Partial(offset)) => Some(offset),
        Some(BlockState::Absent) | None => None,
    };

    let mut content = ctx.data().read(name)?;
    if !content.ends_with(b"\n") {
        content.push(b'\n');
    }

    match (existing, block) {
        (Some(existing), Some(offset)) => {
            tracing::warn!(
                target = %target.display(),
                data = name,
                "rewriting a block left unfinished by an earlier run"
            );
            let mut text = existing[..offset].as_bytes().to_vec();
            push_block(&mut text, &start, &content, &end);
            replace_file(target, &text)?;
        }
        (existing, _) => {
            let mut text = Vec::new();
            if existing.is_some_and(|e| !e.is_empty() && !e.ends_with('\n')) {
                text.push(b'\n');
            }
            push_block(&mut text, &start, &content, &end);

            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .mode(0o644)
                .open(target)?;
            file.write_all(&text)?;
            file.sync_all()?;
        }
    }
    Ok(OpOutput::empty())
}

/// Where a named marker block stands in a file
#[derive(Debug, PartialEq, Eq)]
enum BlockState {
    Absent,
    Complete,
    /// START line present without a following END line; holds the byte
    /// offset of the START line
    Partial(usize),
}

fn find_block(text: &str, start: &str, end: &str) -> BlockState {
    let mut offset = 0;
    let mut open = None;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n');
        if trimmed == start && open.is_none() {
            open = Some(offset);
        } else if trimmed == end && open.is_some() {
            return BlockState::Complete;
        }
        offset += line.len();
    }
    open.map_or(BlockState::Absent, BlockState::Partial)
}

fn push_block(buf: &mut Vec<u8>, start: &str, content: &[u8], end: &str) {
    buf.extend_from_slice(start.as_bytes());
    buf.push(b'\n');
    buf.extend_from_slice(content);
    buf.extend_from_slice(end.as_bytes());
    buf.push(b'\n');
}

/// Atomically replace `path` with `content`, keeping its mode and owner
fn replace_file(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let meta = fs::metadata(path)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().set_permissions(meta.permissions())?;
    std::os::unix::fs::fchown(tmp.as_file(), Some(meta.uid()), Some(meta.gid()))?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir)
}

/// `CopyFile <data-file> <target-dir>`: write the data file into a directory
pub fn copy_file(ctx: &ExecutionContext, params: &[String]) -> OpResult {
    let name = param(params, 0, "data-file")?;
    let dir = Path::new(param(params, 1, "target-dir")?);

    let content = ctx.data().read(name)?;
    write_file(&dir.join(name), &content, 0o644)?;
    Ok(OpOutput::empty())
}

/// `InstallUserConfig <data-file> [home-relative-dir]`: copy a data file
/// into the target user's home and hand it to that user
pub fn install_user_config(ctx: &ExecutionContext, params: &[String]) -> OpResult {
    let name = param(params, 0, "data-file")?;
    let rel = params.get(1).map(|s| s.trim_matches('/')).unwrap_or("");

    let rel_path = Path::new(rel);
    if rel_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(OpFailure::new(format!(
            "'{}' must be a relative path inside the home directory",
            rel
        )));
    }

    let content = ctx.data().read(name)?;
    let dir = ctx.home().join(rel_path);
    fs::DirBuilder::new().recursive(true).mode(0o755).create(&dir)?;

    let mut session = ToolSession::new();
    if let Some(first) = rel_path.components().next() {
        session.run(&ChownArgs {
            owner: ctx.user().to_string(),
            path: ctx.home().join(first).display().to_string(),
            recursive: true,
        })?;
    }

    let dest = dir.join(name);
    write_file(&dest, &content, 0o644)?;
    session.run(&ChownArgs {
        owner: ctx.user().to_string(),
        path: dest.display().to_string(),
        recursive: false,
    })?;
    session.finish()
}

/// `ChangeOwner <owner> <path>`
pub fn change_owner(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&ChownArgs {
        owner: param(params, 0, "owner")?.to_string(),
        path: param(params, 1, "path")?.to_string(),
        recursive: true,
    })
}

/// `ChangePerm <mode> <path>`
pub fn change_perm(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&ChmodArgs {
        mode: param(params, 0, "mode")?.to_string(),
        path: param(params, 1, "path")?.to_string(),
    })
}

/// `Replace <sed-expression> <file>`
pub fn replace(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&SedArgs {
        expression: param(params, 0, "sed-expression")?.to_string(),
        file: param(params, 1, "file")?.to_string(),
    })
}

/// `Download <url> <file>`
pub fn download(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&WgetArgs {
        url: param(params, 0, "url")?.to_string(),
        output: param(params, 1, "file")?.to_string(),
    })
}

fn write_file(path: &Path, content: &[u8], mode: u32) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    file.write_all(content)?;
    file.sync_all()
}
