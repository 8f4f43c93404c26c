//! Git operations: shallow clones, clone-then-run helpers and zsh plugins.

use super::files::ChownArgs;
use super::users::SuArgs;
use super::{param, repo_name, run_single, shell_quote, ToolSession};
use crate::context::ExecutionContext;
use crate::registry::{OpFailure, OpOutput, OpResult};
use crate::tool_traits::{Invocation, ToolArgs};
use std::path::{Component, Path, PathBuf};

/// Suffix of the scratch clone used by `CloneAndRunAsUser`, so it never
/// shares a checkout with a root-owned `CloneAndRun` of the same repo
const USER_CLONE_SUFFIX: &str = ".usr";

/// oh-my-zsh custom plugin directory, relative to the user's home
const ZSH_PLUGIN_DIR: &str = ".oh-my-zsh/custom/plugins";

/// `git clone [--depth N] <url> <dest>`
#[derive(Debug, Clone)]
pub struct GitCloneArgs {
    pub url: String,
    pub dest: PathBuf,
    pub depth: Option<u32>,
}

impl GitCloneArgs {
    /// Single-commit clone
    pub fn shallow(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            depth: Some(1),
        }
    }
}

impl ToolArgs for GitCloneArgs {
    fn program(&self) -> &str {
        "git"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["clone".to_string()];
        if let Some(depth) = self.depth {
            args.push("--depth".to_string());
            args.push(depth.to_string());
        }
        args.push(self.url.clone());
        args.push(self.dest.display().to_string());
        args
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())]
    }
}

/// True when `dir` exists and has at least one entry
fn is_populated(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Split `"script arg arg"` into a script path inside a checkout plus its
/// arguments
fn split_script(command: &str) -> Result<(String, Vec<String>), OpFailure> {
    let mut parts = command.split_whitespace();
    let script = parts
        .next()
        .ok_or_else(|| OpFailure::new("missing parameter <script>"))?;
    let inside = Path::new(script)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !inside {
        return Err(OpFailure::new(format!(
            "script '{}' must be a path inside the repository",
            script
        )));
    }
    Ok((script.to_string(), parts.map(str::to_string).collect()))
}

/// Clone `url` into `dir` unless `marker` already exists there
fn ensure_checkout(session: &mut ToolSession, url: &str, dir: &Path, marker: &Path) -> Result<(), OpFailure> {
    if marker.exists() {
        session.note(format!("using existing checkout {}", dir.display()));
        return Ok(());
    }
    session.run(&GitCloneArgs::shallow(url, dir))?;
    Ok(())
}

/// `CloneRepo <url> <dir>`: shallow clone unless `dir` is already populated
pub fn clone_repo(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    let url = param(params, 0, "url")?;
    let dir = Path::new(param(params, 1, "dir")?);

    if is_populated(dir) {
        tracing::debug!(dir = %dir.display(), "clone target already populated");
        return Ok(OpOutput::new(format!("{} already present", dir.display())));
    }
    run_single(&GitCloneArgs::shallow(url, dir))
}

/// `CloneAndRun <url> <"script args...">`: clone into the temp dir and run
/// a script from the checkout
pub fn clone_and_run(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    let url = param(params, 0, "url")?;
    let (script, args) = split_script(param(params, 1, "script")?)?;

    let dir = std::env::temp_dir().join(repo_name(url)?);
    let script_path = dir.join(&script);

    let mut session = ToolSession::new();
    ensure_checkout(&mut session, url, &dir, &script_path)?;
    session
        .run(&Invocation::new(script_path.display().to_string()).args(args))?
        .finish()
}

/// `CloneAndRunAsUser <url> <"script args...">`: like `CloneAndRun`, with
/// the checkout owned by and the script run as the target user
pub fn clone_and_run_as_user(ctx: &ExecutionContext, params: &[String]) -> OpResult {
    let url = param(params, 0, "url")?;
    let (script, args) = split_script(param(params, 1, "script")?)?;

    let dir = std::env::temp_dir().join(format!("{}{}", repo_name(url)?, USER_CLONE_SUFFIX));
    let script_path = dir.join(&script);

    let mut session = ToolSession::new();
    ensure_checkout(&mut session, url, &dir, &script_path)?;

    let command_line = std::iter::once(script_path.display().to_string())
        .chain(args)
        .map(|part| shell_quote(&part))
        .collect::<Vec<_>>()
        .join(" ");

    session
        .run(&ChownArgs {
            owner: ctx.user().to_string(),
            path: dir.display().to_string(),
            recursive: true,
        })?
        .run(&SuArgs::new(ctx.user(), command_line))?
        .finish()
}

/// `InstallZshPlugin <url>`: clone an oh-my-zsh plugin as the target user
pub fn install_zsh_plugin(ctx: &ExecutionContext, params: &[String]) -> OpResult {
    let url = param(params, 0, "url")?;
    let name = repo_name(url)?;

    let installed = ctx.home().join(ZSH_PLUGIN_DIR).join(&name);
    if is_populated(&installed) {
        return Ok(OpOutput::new(format!("zsh plugin {} already installed", name)));
    }

    let command = format!(
        "git clone --depth=1 {} ~/{}/{}",
        shell_quote(url),
        ZSH_PLUGIN_DIR,
        shell_quote(&name)
    );
    run_single(&SuArgs::new(ctx.user(), command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataBundle;
    use std::fs;

    #[test]
    fn test_shallow_clone_args() {
        let args = GitCloneArgs::shallow("https://example.com/dots.git", "/tmp/dots");
        assert_eq!(
            args.to_cli_args(),
            vec!["clone", "--depth", "1", "https://example.com/dots.git", "/tmp/dots"]
        );
    }

    #[test]
    fn test_split_script() {
        let (script, args) = split_script("install.sh --prefix /opt").expect("split");
        assert_eq!(script, "install.sh");
        assert_eq!(args, vec!["--prefix", "/opt"]);

        assert!(split_script("../evil.sh").is_err());
        assert!(split_script("/bin/sh").is_err());
        assert!(split_script("  ").is_err());
    }

    #[test]
    fn test_clone_repo_skips_populated_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("README"), "x").expect("write");
        let ctx = ExecutionContext::new("ana", 1000, 1000, "/home/ana", "Test OS", DataBundle::empty());

        let out = clone_repo(
            &ctx,
            &[
                "https://invalid.example/repo.git".to_string(),
                dir.path().display().to_string(),
            ],
        )
        .expect("skip");
        assert!(out.transcript.contains("already present"));
    }

    #[test]
    fn test_zsh_plugin_already_installed() {
        let home = tempfile::tempdir().expect("tempdir");
        let plugin = home.path().join(ZSH_PLUGIN_DIR).join("zsh-autosuggestions");
        fs::create_dir_all(&plugin).expect("mkdir");
        fs::write(plugin.join("init.zsh"), "").expect("write");

        let ctx = ExecutionContext::new("ana", 1000, 1000, home.path(), "Test OS", DataBundle::empty());
        let out = install_zsh_plugin(
            &ctx,
            &["https://github.com/zsh-users/zsh-autosuggestions.git".to_string()],
        )
        .expect("skip");
        assert!(out.transcript.contains("already installed"));
    }
}
