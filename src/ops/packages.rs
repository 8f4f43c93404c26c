//! Package management: apt, dpkg, flatpak and pip.
//!
//! Every apt invocation runs fully noninteractive: no debconf prompts, no
//! changelog pagers, no needrestart dialogs. Upgrades take the maintainer's
//! version of changed config files.

use super::files::WgetArgs;
use super::{param, run_single, split_list, ToolSession};
use crate::context::ExecutionContext;
use crate::registry::{OpFailure, OpResult};
use crate::tool_traits::ToolArgs;
use strum::{AsRefStr, Display};

const FLATHUB_NAME: &str = "flathub";
const FLATHUB_URL: &str = "https://flathub.org/repo/flathub.flatpakrepo";

/// Packages that make flatpak usable from the software center
const FLATPAK_PACKAGES: &[&str] = &["flatpak", "gnome-software-plugin-flatpak"];

/// Filesystem access granted to every flatpak so apps follow the host theme
const FLATPAK_THEME_OVERRIDES: &[&str] = &[
    "--filesystem=~/.themes",
    "--filesystem=~/.icons",
    "--filesystem=xdg-config/gtk-4.0",
];

/// Environment that keeps apt and dpkg from prompting
fn noninteractive_env() -> Vec<(String, String)> {
    [
        ("DEBIAN_FRONTEND", "noninteractive"),
        ("DEBCONF_NONINTERACTIVE_SEEN", "true"),
        ("APT_LISTCHANGES_FRONTEND", "none"),
        ("NEEDRESTART_MODE", "a"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

// ============================================================================
// Tool arguments
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum AptAction {
    Update,
    Upgrade,
    Install,
}

/// `apt <action> -y -o Dpkg::Options::=...` with noninteractive environment
#[derive(Debug, Clone)]
pub struct AptArgs {
    pub action: AptAction,
    pub packages: Vec<String>,
}

impl AptArgs {
    pub fn update() -> Self {
        Self {
            action: AptAction::Update,
            packages: Vec::new(),
        }
    }

    pub fn upgrade() -> Self {
        Self {
            action: AptAction::Upgrade,
            packages: Vec::new(),
        }
    }

    pub fn install<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: AptAction::Install,
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    fn dpkg_option(&self) -> &'static str {
        match self.action {
            AptAction::Update => "Dpkg::Options::=--force-confdef",
            AptAction::Upgrade | AptAction::Install => "Dpkg::Options::=--force-confnew",
        }
    }
}

impl ToolArgs for AptArgs {
    fn program(&self) -> &str {
        "apt"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            self.action.to_string(),
            "-y".to_string(),
            "-o".to_string(),
            self.dpkg_option().to_string(),
        ];
        args.extend(self.packages.iter().cloned());
        args
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        noninteractive_env()
    }
}

/// `dpkg --add-architecture <arch>`
#[derive(Debug, Clone)]
pub struct DpkgAddArchArgs {
    pub arch: String,
}

impl ToolArgs for DpkgAddArchArgs {
    fn program(&self) -> &str {
        "dpkg"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--add-architecture".to_string(), self.arch.clone()]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        noninteractive_env()
    }
}

/// `gpg --batch --yes --dearmor <file>`, writing `<file>.gpg`
#[derive(Debug, Clone)]
pub struct GpgDearmorArgs {
    pub file: String,
}

impl ToolArgs for GpgDearmorArgs {
    fn program(&self) -> &str {
        "gpg"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--batch".to_string(),
            "--yes".to_string(),
            "--dearmor".to_string(),
            self.file.clone(),
        ]
    }
}

/// Flatpak subcommands used by the package operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlatpakArgs {
    RemoteAdd { name: String, url: String },
    Update,
    Install { apps: Vec<String> },
    Override { flags: Vec<String> },
}

impl ToolArgs for FlatpakArgs {
    fn program(&self) -> &str {
        "flatpak"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self {
            Self::RemoteAdd { name, url } => {
                args.extend(["remote-add", "--if-not-exists"].map(String::from));
                args.push(name.clone());
                args.push(url.clone());
            }
            Self::Update => {
                args.extend(["update", "--noninteractive", "--assumeyes"].map(String::from));
            }
            Self::Install { apps } => {
                args.extend(["install", "--noninteractive", "--assumeyes", "-v"].map(String::from));
                args.extend(apps.iter().cloned());
            }
            Self::Override { flags } => {
                args.push("override".to_string());
                args.extend(flags.iter().cloned());
            }
        }
        args
    }
}

/// `python3 -m pip install --break-system-packages <pkg>...`
#[derive(Debug, Clone)]
pub struct PipInstallArgs {
    pub packages: Vec<String>,
}

impl ToolArgs for PipInstallArgs {
    fn program(&self) -> &str {
        "python3"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = ["-m", "pip", "install", "--break-system-packages"]
            .map(String::from)
            .to_vec();
        args.extend(self.packages.iter().cloned());
        args
    }
}

// ============================================================================
// Operations
// ============================================================================

fn package_list(params: &[String], name: &str) -> Result<Vec<String>, OpFailure> {
    let list = split_list(param(params, 0, name)?);
    if list.is_empty() {
        return Err(OpFailure::new(format!("missing parameter <{}>", name)));
    }
    Ok(list)
}

/// `AddRepoKey <url> <keyring-file>`: download an armored key and dearmor it
pub fn add_repo_key(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    let url = param(params, 0, "url")?;
    let file = param(params, 1, "keyring-file")?;

    ToolSession::new()
        .run(&WgetArgs {
            url: url.to_string(),
            output: file.to_string(),
        })?
        .run(&GpgDearmorArgs {
            file: file.to_string(),
        })?
        .finish()
}

/// `UpdateRepos`
pub fn update_repos(_ctx: &ExecutionContext, _params: &[String]) -> OpResult {
    run_single(&AptArgs::update())
}

/// `UpgradePackages`
pub fn upgrade_packages(_ctx: &ExecutionContext, _params: &[String]) -> OpResult {
    run_single(&AptArgs::upgrade())
}

/// `InstallPackages <"pkg pkg ...">`
pub fn install_packages(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&AptArgs::install(package_list(params, "packages")?))
}

/// `AddArch <arch>`: enable a foreign dpkg architecture
pub fn add_arch(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&DpkgAddArchArgs {
        arch: param(params, 0, "arch")?.to_string(),
    })
}

/// `EnableAptFile`: install apt-file and build its index
pub fn enable_apt_file(_ctx: &ExecutionContext, _params: &[String]) -> OpResult {
    ToolSession::new()
        .run(&AptArgs::install(["apt-file"]))?
        .run(&crate::tool_traits::Invocation::new("apt-file").arg("update"))?
        .finish()
}

/// `EnableFlatpak`: install flatpak, add Flathub and let apps see themes
pub fn enable_flatpak(_ctx: &ExecutionContext, _params: &[String]) -> OpResult {
    ToolSession::new()
        .run(&AptArgs::install(FLATPAK_PACKAGES.iter().copied()))?
        .run(&FlatpakArgs::RemoteAdd {
            name: FLATHUB_NAME.to_string(),
            url: FLATHUB_URL.to_string(),
        })?
        .run(&FlatpakArgs::Update)?
        .run(&FlatpakArgs::Override {
            flags: FLATPAK_THEME_OVERRIDES.iter().map(|f| f.to_string()).collect(),
        })?
        .finish()
}

/// `InstallFlatpaks <"app app ...">`
pub fn install_flatpaks(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&FlatpakArgs::Install {
        apps: package_list(params, "apps")?,
    })
}

/// `InstallPip <"pkg pkg ...">`
pub fn install_pip(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&PipInstallArgs {
        packages: package_list(params, "packages")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataBundle;

    #[test]
    fn test_apt_install_args_and_env() {
        let args = AptArgs::install(["vim", "git"]);
        assert_eq!(
            args.to_cli_args(),
            vec!["install", "-y", "-o", "Dpkg::Options::=--force-confnew", "vim", "git"]
        );
        let env = args.get_env_vars();
        assert!(env.contains(&("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())));
        assert!(env.contains(&("NEEDRESTART_MODE".to_string(), "a".to_string())));
    }

    #[test]
    fn test_apt_update_keeps_local_config() {
        assert_eq!(
            AptArgs::update().to_cli_args(),
            vec!["update", "-y", "-o", "Dpkg::Options::=--force-confdef"]
        );
    }

    #[test]
    fn test_flatpak_args() {
        let add = FlatpakArgs::RemoteAdd {
            name: FLATHUB_NAME.into(),
            url: FLATHUB_URL.into(),
        };
        assert_eq!(
            add.to_cli_args(),
            vec!["remote-add", "--if-not-exists", "flathub", FLATHUB_URL]
        );

        let install = FlatpakArgs::Install {
            apps: vec!["org.gimp.GIMP".into()],
        };
        assert_eq!(
            install.to_cli_args(),
            vec!["install", "--noninteractive", "--assumeyes", "-v", "org.gimp.GIMP"]
        );
    }

    #[test]
    fn test_pip_args() {
        let args = PipInstallArgs {
            packages: vec!["black".into()],
        };
        assert_eq!(
            args.to_cli_args(),
            vec!["-m", "pip", "install", "--break-system-packages", "black"]
        );
    }

    #[test]
    fn test_empty_package_list_fails_before_running() {
        let ctx = ExecutionContext::new("ana", 1000, 1000, "/home/ana", "Test OS", DataBundle::empty());
        let err = install_packages(&ctx, &["   ".to_string()]).unwrap_err();
        assert_eq!(err.message, "missing parameter <packages>");
    }
}
