//! User and group operations.

use super::{param, run_single, shell_quote};
use crate::context::ExecutionContext;
use crate::registry::OpResult;
use crate::tool_traits::ToolArgs;

/// `useradd` and `groupadd` exit code for "name already in use"
pub const EXIT_NAME_IN_USE: i32 = 9;

const ZSH: &str = "/bin/zsh";

// ============================================================================
// Tool arguments
// ============================================================================

/// `useradd -m <name>`
#[derive(Debug, Clone)]
pub struct UserAddArgs {
    pub name: String,
}

impl ToolArgs for UserAddArgs {
    fn program(&self) -> &str {
        "useradd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-m".to_string(), self.name.clone()]
    }

    fn satisfied_exit_codes(&self) -> &[i32] {
        &[EXIT_NAME_IN_USE]
    }
}

/// `groupadd <name>`
#[derive(Debug, Clone)]
pub struct GroupAddArgs {
    pub name: String,
}

impl ToolArgs for GroupAddArgs {
    fn program(&self) -> &str {
        "groupadd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn satisfied_exit_codes(&self) -> &[i32] {
        &[EXIT_NAME_IN_USE]
    }
}

/// `chpasswd` with `user:password` on stdin.
///
/// # Security
///
/// The password never appears on a command line, so it is not visible in
/// the process list.
#[derive(Clone)]
pub struct ChpasswdArgs {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for ChpasswdArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChpasswdArgs")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ToolArgs for ChpasswdArgs {
    fn program(&self) -> &str {
        "chpasswd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn stdin(&self) -> Option<String> {
        Some(format!("{}:{}\n", self.user, self.password))
    }
}

/// What `usermod` should change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserModChange {
    /// `-aG <groups>`: add supplementary groups
    AppendGroups(String),
    /// `-g <group>`: set the primary group
    PrimaryGroup(String),
    /// `-s <shell>`: set the login shell
    Shell(String),
}

/// `usermod <change> <user>`
#[derive(Debug, Clone)]
pub struct UserModArgs {
    pub user: String,
    pub change: UserModChange,
}

impl ToolArgs for UserModArgs {
    fn program(&self) -> &str {
        "usermod"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let (flag, value) = match &self.change {
            UserModChange::AppendGroups(groups) => ("-aG", groups),
            UserModChange::PrimaryGroup(group) => ("-g", group),
            UserModChange::Shell(shell) => ("-s", shell),
        };
        vec![flag.to_string(), value.clone(), self.user.clone()]
    }
}

/// Run a shell command line as another user through `su`.
///
/// `env` is prefixed to the command line, so it reaches the command even
/// though `su` resets the environment. `login` starts a login shell
/// (`su - <user>`).
#[derive(Debug, Clone)]
pub struct SuArgs {
    pub user: String,
    pub command: String,
    pub env: Vec<(String, String)>,
    pub login: bool,
    pub input: Option<String>,
    pub satisfied: Vec<i32>,
}

impl SuArgs {
    pub fn new(user: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            command: command.into(),
            env: Vec::new(),
            login: false,
            input: None,
            satisfied: Vec::new(),
        }
    }

    /// Connect the command to the user's desktop session bus
    pub fn in_session(mut self, ctx: &ExecutionContext) -> Self {
        self.env.push((
            "DBUS_SESSION_BUS_ADDRESS".to_string(),
            ctx.session_bus_address(),
        ));
        self
    }

    pub fn login(mut self) -> Self {
        self.login = true;
        self
    }

    /// Feed `input` to the command's standard input
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Treat `code` as success
    pub fn satisfied_on(mut self, code: i32) -> Self {
        self.satisfied.push(code);
        self
    }

    /// The full `-c` argument
    pub fn command_line(&self) -> String {
        let mut line = String::new();
        for (key, value) in &self.env {
            line.push_str(&format!("{}={} ", key, shell_quote(value)));
        }
        line.push_str(&self.command);
        line
    }
}

impl ToolArgs for SuArgs {
    fn program(&self) -> &str {
        "su"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.login {
            args.push("-".to_string());
        }
        args.push(self.user.clone());
        args.push("-c".to_string());
        args.push(self.command_line());
        args
    }

    fn stdin(&self) -> Option<String> {
        self.input.clone()
    }

    fn satisfied_exit_codes(&self) -> &[i32] {
        &self.satisfied
    }
}

// ============================================================================
// Operations
// ============================================================================

/// `AddUser <user>`: create a user with a home directory
pub fn add_user(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&UserAddArgs {
        name: param(params, 0, "user")?.to_string(),
    })
}

/// `AddGroup <group>`
pub fn add_group(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&GroupAddArgs {
        name: param(params, 0, "group")?.to_string(),
    })
}

/// `SetPass <user> <password>`
pub fn set_pass(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&ChpasswdArgs {
        user: param(params, 0, "user")?.to_string(),
        password: param(params, 1, "password")?.to_string(),
    })
}

/// `AssignGroups <group[,group...]>`: add the target user to groups
pub fn assign_groups(ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&UserModArgs {
        user: ctx.user().to_string(),
        change: UserModChange::AppendGroups(param(params, 0, "groups")?.to_string()),
    })
}

/// `PrimaryGroup <user> <group>`
pub fn primary_group(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&UserModArgs {
        user: param(params, 0, "user")?.to_string(),
        change: UserModChange::PrimaryGroup(param(params, 1, "group")?.to_string()),
    })
}

/// `EnableZsh`: make zsh the target user's login shell
pub fn enable_zsh(ctx: &ExecutionContext, _params: &[String]) -> OpResult {
    run_single(&UserModArgs {
        user: ctx.user().to_string(),
        change: UserModChange::Shell(ZSH.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataBundle;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("ana", 1000, 1000, "/home/ana", "Test OS", DataBundle::empty())
    }

    #[test]
    fn test_existing_names_are_satisfied() {
        let user = UserAddArgs { name: "bob".into() };
        assert_eq!(user.to_cli_args(), vec!["-m", "bob"]);
        assert_eq!(user.satisfied_exit_codes(), &[9]);

        let group = GroupAddArgs {
            name: "docker".into(),
        };
        assert_eq!(group.satisfied_exit_codes(), &[9]);
    }

    #[test]
    fn test_chpasswd_feeds_stdin_only() {
        let args = ChpasswdArgs {
            user: "bob".into(),
            password: "s3cret".into(),
        };
        assert!(args.to_cli_args().is_empty());
        assert_eq!(args.stdin().as_deref(), Some("bob:s3cret\n"));
        assert!(!format!("{:?}", args).contains("s3cret"));
    }

    #[test]
    fn test_usermod_flags() {
        let args = UserModArgs {
            user: "ana".into(),
            change: UserModChange::AppendGroups("docker,libvirt".into()),
        };
        assert_eq!(args.to_cli_args(), vec!["-aG", "docker,libvirt", "ana"]);

        let args = UserModArgs {
            user: "ana".into(),
            change: UserModChange::Shell(ZSH.into()),
        };
        assert_eq!(args.to_cli_args(), vec!["-s", "/bin/zsh", "ana"]);
    }

    #[test]
    fn test_su_command_line_with_session_bus() {
        let args = SuArgs::new("ana", "gnome-extensions enable dash@x").in_session(&ctx());
        assert_eq!(
            args.to_cli_args(),
            vec![
                "ana",
                "-c",
                "DBUS_SESSION_BUS_ADDRESS=unix:path=/run/user/1000/bus gnome-extensions enable dash@x"
            ]
        );
        assert_eq!(SuArgs::new("ana", "true").login().to_cli_args()[0], "-");
    }

    #[test]
    fn test_set_pass_requires_password() {
        let err = set_pass(&ctx(), &["bob".to_string()]).unwrap_err();
        assert_eq!(err.message, "missing parameter <password>");
    }
}
