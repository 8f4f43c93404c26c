//! Built-in operation vocabulary.
//!
//! Each submodule groups the operations of one concern together with the
//! typed tool arguments they run. [`register_builtin`] binds every
//! [`CommandId`] to its implementation.
//!
//! Operations follow one discipline: re-running an operation whose desired
//! end state already holds succeeds. Either the tool reports that through an
//! exit code declared in `satisfied_exit_codes`, or the operation checks the
//! state itself before acting.

pub mod archives;
pub mod desktop;
pub mod files;
pub mod packages;
pub mod run;
pub mod services;
pub mod users;
pub mod vcs;

use crate::registry::{CommandId, CommandRegistry, OpFailure, OpOutput, OpResult};
use crate::tool_runner::run_tool;
use crate::tool_traits::ToolArgs;

/// Register every built-in operation
pub fn register_builtin(registry: &mut CommandRegistry) {
    use CommandId::*;

    registry.register_fn(CreateDir, files::create_dir);
    registry.register_fn(AppendFile, files::append_file);
    registry.register_fn(CopyFile, files::copy_file);
    registry.register_fn(InstallUserConfig, files::install_user_config);
    registry.register_fn(ChangeOwner, files::change_owner);
    registry.register_fn(ChangePerm, files::change_perm);
    registry.register_fn(Replace, files::replace);
    registry.register_fn(Download, files::download);

    registry.register_fn(AddUser, users::add_user);
    registry.register_fn(AddGroup, users::add_group);
    registry.register_fn(SetPass, users::set_pass);
    registry.register_fn(AssignGroups, users::assign_groups);
    registry.register_fn(PrimaryGroup, users::primary_group);
    registry.register_fn(EnableZsh, users::enable_zsh);

    registry.register_fn(Untar, archives::untar);
    registry.register_fn(UnzipFile, archives::unzip_file);

    registry.register_fn(AddRepoKey, packages::add_repo_key);
    registry.register_fn(UpdateRepos, packages::update_repos);
    registry.register_fn(UpgradePackages, packages::upgrade_packages);
    registry.register_fn(InstallPackages, packages::install_packages);
    registry.register_fn(AddArch, packages::add_arch);
    registry.register_fn(EnableAptFile, packages::enable_apt_file);
    registry.register_fn(EnableFlatpak, packages::enable_flatpak);
    registry.register_fn(InstallFlatpaks, packages::install_flatpaks);
    registry.register_fn(InstallPip, packages::install_pip);

    registry.register_fn(ReloadUnits, services::reload_units);
    registry.register_fn(ReloadSysctl, services::reload_sysctl);
    registry.register_fn(EnableService, services::enable_service);

    registry.register_fn(CloneRepo, vcs::clone_repo);
    registry.register_fn(CloneAndRun, vcs::clone_and_run);
    registry.register_fn(CloneAndRunAsUser, vcs::clone_and_run_as_user);
    registry.register_fn(InstallZshPlugin, vcs::install_zsh_plugin);

    registry.register_fn(InstallGnomeExt, desktop::install_gnome_ext);
    registry.register_fn(EnableGnomeExt, desktop::enable_gnome_ext);
    registry.register_fn(InstallGnomeSettings, desktop::install_gnome_settings);

    registry.register_fn(Run, run::run);

    tracing::debug!(count = registry.len(), "built-in operations registered");
}

// ============================================================================
// Helpers shared by the operation modules
// ============================================================================

/// Positional parameter `index`, or a failure naming the missing `name`
pub(crate) fn param<'p>(params: &'p [String], index: usize, name: &str) -> Result<&'p str, OpFailure> {
    params
        .get(index)
        .map(String::as_str)
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| OpFailure::new(format!("missing parameter <{}>", name)))
}

/// Split a space separated list, dropping empty entries
pub(crate) fn split_list(list: &str) -> Vec<String> {
    list.split_whitespace().map(str::to_string).collect()
}

/// Quote `value` for inclusion in a `sh -c` command line
pub(crate) fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,~".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Last path segment of a repository URL without a `.git` suffix
pub(crate) fn repo_name(url: &str) -> Result<String, OpFailure> {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() || name == "." || name == ".." {
        return Err(OpFailure::new(format!(
            "cannot derive a repository name from '{}'",
            url
        )));
    }
    Ok(name.to_string())
}

/// Sequence of tool runs whose transcripts are collected into one.
///
/// The first failing tool ends the sequence; its failure carries everything
/// captured so far.
#[derive(Debug, Default)]
pub(crate) struct ToolSession {
    transcript: String,
}

impl ToolSession {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn run<T: ToolArgs + ?Sized>(&mut self, args: &T) -> Result<&mut Self, OpFailure> {
        let output = run_tool(args).map_err(|e| self.fail(format!("{:#}", e)))?;
        self.push(&output.transcript());
        if output.success {
            Ok(self)
        } else {
            Err(self.fail(output.failure_message()))
        }
    }

    /// Record a line of the operation's own diagnostics
    pub(crate) fn note(&mut self, line: impl AsRef<str>) -> &mut Self {
        self.push(line.as_ref());
        self
    }

    pub(crate) fn fail(&self, message: impl Into<String>) -> OpFailure {
        OpFailure::new(message).with_transcript(self.transcript.clone())
    }

    pub(crate) fn finish(&mut self) -> OpResult {
        Ok(OpOutput::new(std::mem::take(&mut self.transcript)))
    }

    fn push(&mut self, text: &str) {
        let text = text.trim_end();
        if text.is_empty() {
            return;
        }
        if !self.transcript.is_empty() {
            self.transcript.push('\n');
        }
        self.transcript.push_str(text);
    }
}

/// Run a single tool as a whole operation
pub(crate) fn run_single<T: ToolArgs + ?Sized>(args: &T) -> OpResult {
    ToolSession::new().run(args)?.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_traits::Invocation;

    #[test]
    fn test_param_reports_missing_name() {
        let params = vec!["docker".to_string()];
        assert_eq!(param(&params, 0, "group").expect("present"), "docker");

        let err = param(&params, 1, "user").unwrap_err();
        assert_eq!(err.message, "missing parameter <user>");

        let blank = vec!["  ".to_string()];
        assert!(param(&blank, 0, "group").is_err());
    }

    #[test]
    fn test_split_list_ignores_extra_spaces() {
        assert_eq!(split_list(" vim  git\tcurl "), vec!["vim", "git", "curl"]);
        assert!(split_list("   ").is_empty());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain-name_1.0"), "plain-name_1.0");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_repo_name() {
        assert_eq!(
            repo_name("https://github.com/zsh-users/zsh-autosuggestions.git").expect("name"),
            "zsh-autosuggestions"
        );
        assert_eq!(repo_name("https://example.com/tools/").expect("name"), "tools");
        assert!(repo_name("https://example.com/.git").is_err());
    }

    #[test]
    fn test_session_collects_transcripts_until_failure() {
        let mut session = ToolSession::new();
        session
            .run(&Invocation::new("sh").args(["-c", "echo one"]))
            .expect("first");
        let err = session
            .run(&Invocation::new("sh").args(["-c", "echo two >&2; exit 4"]))
            .unwrap_err();

        assert_eq!(err.message, "sh exited with status 4");
        assert_eq!(err.transcript, "one\ntwo");
    }

    #[test]
    fn test_run_single_spawn_failure() {
        let err = run_single(&Invocation::new("hostplan-no-such-tool")).unwrap_err();
        assert!(err.message.contains("hostplan-no-such-tool"));
    }
}
