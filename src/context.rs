//! Execution context for a plan run
//!
//! Everything a leaf operation may ask about its environment lives here:
//! the unprivileged target user, that user's ids and home directory, the OS
//! release string and the bundle of auxiliary data files shipped with the
//! plan.
//!
//! The context is built once per process from an explicit [`Identity`]
//! (read from the environment in production, constructed directly in tests)
//! and is never persisted. A resumed run rebuilds it from scratch.

use crate::error::{PlanError, Result};
use nix::unistd::{Gid, Uid, User};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Who invoked hostplan, as reported by the environment.
///
/// When running under `sudo`, `SUDO_USER` names the original account and
/// takes precedence over `USER` (which is `root` at that point).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user: Option<String>,
    pub sudo_user: Option<String>,
    pub home: Option<PathBuf>,
}

impl Identity {
    /// Capture `USER`, `SUDO_USER` and `HOME` from the process environment
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            user: non_empty("USER"),
            sudo_user: non_empty("SUDO_USER"),
            home: non_empty("HOME").map(PathBuf::from),
        }
    }

    /// The account steps should act on behalf of
    pub fn target_user(&self) -> Option<&str> {
        self.sudo_user.as_deref().or(self.user.as_deref())
    }

    /// True when the original user differs from the invoking one
    pub fn is_elevated(&self) -> bool {
        self.sudo_user.is_some()
    }
}

/// Read-only handle over the directory of auxiliary files a plan ships with
/// (config snippets, dconf dumps, templates).
///
/// Files are addressed by bare name; anything that could escape the bundle
/// directory is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBundle {
    root: Option<PathBuf>,
}

impl DataBundle {
    /// Bundle with no files, for plans that reference none
    pub fn empty() -> Self {
        Self { root: None }
    }

    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Path of an existing bundle file
    pub fn path(&self, name: &str) -> io::Result<PathBuf> {
        validate_name(name)?;
        let root = self.root.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("plan has no data files, cannot provide '{}'", name),
            )
        })?;
        let path = root.join(name);
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("data file '{}' not found in {}", name, root.display()),
            ));
        }
        Ok(path)
    }

    pub fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path(name)?)
    }

    pub fn read_to_string(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.path(name)?)
    }
}

fn validate_name(name: &str) -> io::Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid data file name '{}'", name),
        ));
    }
    Ok(())
}

/// Resolved environment handed to every operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    user: String,
    uid: u32,
    gid: u32,
    home: PathBuf,
    os_release: String,
    data: DataBundle,
}

impl ExecutionContext {
    /// Build a context from explicit values
    pub fn new(
        user: impl Into<String>,
        uid: u32,
        gid: u32,
        home: impl Into<PathBuf>,
        os_release: impl Into<String>,
        data: DataBundle,
    ) -> Self {
        Self {
            user: user.into(),
            uid,
            gid,
            home: home.into(),
            os_release: os_release.into(),
            data,
        }
    }

    /// Resolve the target user through the passwd database.
    ///
    /// Falls back to the current process ids and `HOME` when the account
    /// is not in passwd (containers, minimal images).
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Identity` when no user name can be determined at
    /// all.
    pub fn resolve(identity: &Identity, data: DataBundle) -> Result<Self> {
        let user = match identity.target_user() {
            Some(name) => name.to_string(),
            None => User::from_uid(Uid::current())
                .ok()
                .flatten()
                .map(|u| u.name)
                .ok_or_else(|| PlanError::identity("cannot determine the invoking user"))?,
        };

        let os_release = read_os_release(Path::new(OS_RELEASE_PATH));

        let ctx = match User::from_name(&user) {
            Ok(Some(entry)) => Self::new(
                user,
                entry.uid.as_raw(),
                entry.gid.as_raw(),
                entry.dir,
                os_release,
                data,
            ),
            Ok(None) | Err(_) => {
                tracing::warn!(user = %user, "user not found in passwd, using process ids");
                let home = identity
                    .home
                    .clone()
                    .ok_or_else(|| PlanError::identity(format!("no home directory for {}", user)))?;
                Self::new(
                    user,
                    Uid::current().as_raw(),
                    Gid::current().as_raw(),
                    home,
                    os_release,
                    data,
                )
            }
        };

        tracing::debug!(
            user = %ctx.user,
            uid = ctx.uid,
            home = %ctx.home.display(),
            elevated = identity.is_elevated(),
            os = %ctx.os_release,
            "execution context resolved"
        );
        Ok(ctx)
    }

    /// Same context with a different data bundle
    pub fn with_data(mut self, data: DataBundle) -> Self {
        self.data = data;
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn os_release(&self) -> &str {
        &self.os_release
    }

    pub fn data(&self) -> &DataBundle {
        &self.data
    }

    /// Session bus address of the target user, for tools that talk to the
    /// desktop session (gnome-extensions, dconf, busctl)
    pub fn session_bus_address(&self) -> String {
        format!("unix:path=/run/user/{}/bus", self.uid)
    }
}

/// `PRETTY_NAME` from an os-release file, or `"unknown"`
pub fn read_os_release(path: &Path) -> String {
    fs::read_to_string(path)
        .ok()
        .and_then(|content| parse_pretty_name(&content))
        .unwrap_or_else(|| "unknown".to_string())
}

fn parse_pretty_name(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let value = line.trim().strip_prefix("PRETTY_NAME=")?;
        let value = value.trim_matches('"').trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sudo_user_wins_over_user() {
        let identity = Identity {
            user: Some("root".to_string()),
            sudo_user: Some("ana".to_string()),
            home: Some(PathBuf::from("/root")),
        };
        assert_eq!(identity.target_user(), Some("ana"));
        assert!(identity.is_elevated());
    }

    #[test]
    fn test_plain_user_without_sudo() {
        let identity = Identity {
            user: Some("ana".to_string()),
            sudo_user: None,
            home: None,
        };
        assert_eq!(identity.target_user(), Some("ana"));
        assert!(!identity.is_elevated());
    }

    #[test]
    fn test_resolve_unknown_user_falls_back_to_home() {
        let identity = Identity {
            user: Some("hostplan-no-such-user".to_string()),
            sudo_user: None,
            home: Some(PathBuf::from("/tmp/hostplan-home")),
        };
        let ctx = ExecutionContext::resolve(&identity, DataBundle::empty()).expect("resolve");
        assert_eq!(ctx.user(), "hostplan-no-such-user");
        assert_eq!(ctx.home(), Path::new("/tmp/hostplan-home"));
        assert_eq!(ctx.uid(), Uid::current().as_raw());
    }

    #[test]
    fn test_resolve_unknown_user_without_home_fails() {
        let identity = Identity {
            user: Some("hostplan-no-such-user".to_string()),
            sudo_user: None,
            home: None,
        };
        let err = ExecutionContext::resolve(&identity, DataBundle::empty()).unwrap_err();
        assert!(matches!(err, PlanError::Identity(_)));
    }

    #[test]
    fn test_resolve_root_from_passwd() {
        let identity = Identity {
            user: Some("root".to_string()),
            sudo_user: None,
            home: None,
        };
        let ctx = ExecutionContext::resolve(&identity, DataBundle::empty()).expect("resolve");
        assert_eq!(ctx.uid(), 0);
        assert_eq!(ctx.session_bus_address(), "unix:path=/run/user/0/bus");
    }

    #[test]
    fn test_parse_pretty_name() {
        let content = "NAME=\"Debian GNU/Linux\"\nPRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nID=debian\n";
        assert_eq!(
            parse_pretty_name(content).as_deref(),
            Some("Debian GNU/Linux 12 (bookworm)")
        );
        assert_eq!(parse_pretty_name("ID=arch\n"), None);
    }

    #[test]
    fn test_read_os_release_missing_file() {
        assert_eq!(read_os_release(Path::new("/nonexistent/os-release")), "unknown");
    }

    #[test]
    fn test_data_bundle_reads_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("bashrc"), "alias ll='ls -l'\n").expect("write");

        let bundle = DataBundle::open(dir.path());
        assert_eq!(
            bundle.read_to_string("bashrc").expect("read"),
            "alias ll='ls -l'\n"
        );
        assert_eq!(
            bundle.read("missing").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_data_bundle_rejects_escaping_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = DataBundle::open(dir.path());

        for name in ["", "..", "../etc/passwd", "/etc/passwd", "a/b"] {
            assert_eq!(
                bundle.path(name).unwrap_err().kind(),
                io::ErrorKind::InvalidInput,
                "{:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_empty_bundle_has_no_files() {
        let bundle = DataBundle::empty();
        assert!(bundle.root().is_none());
        assert_eq!(bundle.path("x").unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
