//! systemd and sysctl operations.

use super::{param, run_single, ToolSession};
use crate::context::ExecutionContext;
use crate::registry::OpResult;
use crate::tool_traits::ToolArgs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemctlArgs {
    DaemonReload,
    Enable { unit: String },
}

impl ToolArgs for SystemctlArgs {
    fn program(&self) -> &str {
        "systemctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        match self {
            Self::DaemonReload => vec!["daemon-reload".to_string()],
            Self::Enable { unit } => vec!["enable".to_string(), unit.clone()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysctlArgs {
    /// `sysctl -p`: load /etc/sysctl.conf
    Load,
    /// `sysctl -a`: print every value
    ShowAll,
}

impl ToolArgs for SysctlArgs {
    fn program(&self) -> &str {
        "sysctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        match self {
            Self::Load => vec!["-p".to_string()],
            Self::ShowAll => vec!["-a".to_string()],
        }
    }
}

/// `ReloadUnits`
pub fn reload_units(_ctx: &ExecutionContext, _params: &[String]) -> OpResult {
    run_single(&SystemctlArgs::DaemonReload)
}

/// `ReloadSysctl`: apply sysctl.conf and record the resulting values
pub fn reload_sysctl(_ctx: &ExecutionContext, _params: &[String]) -> OpResult {
    ToolSession::new()
        .run(&SysctlArgs::Load)?
        .run(&SysctlArgs::ShowAll)?
        .finish()
}

/// `EnableService <unit>`
pub fn enable_service(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&SystemctlArgs::Enable {
        unit: param(params, 0, "unit")?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systemctl_args() {
        assert_eq!(SystemctlArgs::DaemonReload.to_cli_args(), vec!["daemon-reload"]);
        assert_eq!(
            SystemctlArgs::Enable {
                unit: "ssh.service".into()
            }
            .to_cli_args(),
            vec!["enable", "ssh.service"]
        );
    }

    #[test]
    fn test_sysctl_args() {
        assert_eq!(SysctlArgs::Load.to_cli_args(), vec!["-p"]);
        assert_eq!(SysctlArgs::ShowAll.to_cli_args(), vec!["-a"]);
    }
}
