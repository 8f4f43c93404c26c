//! GNOME desktop operations, run inside the target user's session.

use super::files::WgetArgs;
use super::users::SuArgs;
use super::{param, run_single, shell_quote, ToolSession};
use crate::context::ExecutionContext;
use crate::registry::OpResult;
use crate::tool_traits::ToolArgs;

const EXTENSIONS_SITE: &str = "https://extensions.gnome.org/extension-data";

/// `busctl` exits 1 when the shell drops the bus connection after a
/// successful install
const BUSCTL_DISCONNECTED: i32 = 1;

/// Download URL of a packaged extension release
pub fn extension_url(uuid: &str, version: &str) -> String {
    format!(
        "{}/{}.v{}.shell-extension.zip",
        EXTENSIONS_SITE,
        uuid.replace('@', ""),
        version
    )
}

/// `gnome-extensions install --force <zip>`
#[derive(Debug, Clone)]
pub struct ExtensionInstallArgs {
    pub bundle: String,
}

impl ToolArgs for ExtensionInstallArgs {
    fn program(&self) -> &str {
        "gnome-extensions"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["install".to_string(), "--force".to_string(), self.bundle.clone()]
    }
}

/// `InstallGnomeExt <extension-uuid> <version>`: fetch an extension from
/// extensions.gnome.org, install it and ask the running shell to load it
pub fn install_gnome_ext(ctx: &ExecutionContext, params: &[String]) -> OpResult {
    let uuid = param(params, 0, "extension-uuid")?;
    let version = param(params, 1, "version")?;

    let bundle = std::env::temp_dir()
        .join(format!("{}.shell-extension.zip", uuid.replace('@', "")))
        .display()
        .to_string();

    let activate = format!(
        "busctl --user call org.gnome.Shell.Extensions /org/gnome/Shell/Extensions \
         org.gnome.Shell.Extensions InstallRemoteExtension s {}",
        shell_quote(uuid)
    );

    ToolSession::new()
        .run(&WgetArgs {
            url: extension_url(uuid, version),
            output: bundle.clone(),
        })?
        .run(&ExtensionInstallArgs { bundle })?
        .run(
            &SuArgs::new(ctx.user(), activate)
                .in_session(ctx)
                .login()
                .satisfied_on(BUSCTL_DISCONNECTED),
        )?
        .finish()
}

/// `EnableGnomeExt <extension-uuid>`
pub fn enable_gnome_ext(ctx: &ExecutionContext, params: &[String]) -> OpResult {
    let uuid = param(params, 0, "extension-uuid")?;
    run_single(
        &SuArgs::new(ctx.user(), format!("gnome-extensions enable {}", shell_quote(uuid)))
            .in_session(ctx),
    )
}

/// `InstallGnomeSettings <data-file>`: load a dconf dump into the user's
/// settings database
pub fn install_gnome_settings(ctx: &ExecutionContext, params: &[String]) -> OpResult {
    let name = param(params, 0, "data-file")?;
    let dump = ctx.data().read_to_string(name)?;
    run_single(
        &SuArgs::new(ctx.user(), "dconf load /")
            .in_session(ctx)
            .with_stdin(dump),
    )
}
