//! OS collaborators consumed by the installers
//!
//! Each capability the installer needs from the host platform is a trait so
//! the whole pipeline runs against fakes in tests and against real adapters
//! on a device.

use async_trait::async_trait;
use orchard_errors::{Error, InstallError};
use orchard_types::{InstalledPackage, VersionCode};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use crate::session::{CallbackSink, ConfirmationIntent, InstallRequest, SessionId};

/// Parameters of a new OS install session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// Package the session installs, when known up front
    pub package_name: Option<String>,
    /// Sum of all file sizes in bytes
    pub total_size: u64,
    /// Installer of record reported to the OS
    pub installer_package_name: Option<String>,
    /// Ask the OS to always show its confirmation prompt
    pub require_user_action: bool,
    /// Request the privileged install flags; honoured for system apps only
    pub privileged: bool,
}

params_builder! {
    SessionParams {
        package_name: Option<String>,
        total_size: u64,
        installer_package_name: Option<String>,
        require_user_action: bool,
        privileged: bool,
    }
}

/// The OS package installer session API
#[async_trait]
pub trait PackageSessionApi: Send + Sync {
    async fn create_session(&self, params: &SessionParams) -> Result<SessionId, Error>;

    /// Stream one file into an open session under the given split name
    async fn write(&self, session_id: SessionId, name: &str, path: &Path) -> Result<(), Error>;

    /// Commit the session; the OS reports the outcome through `sink` later
    async fn commit(&self, session_id: SessionId, sink: CallbackSink) -> Result<(), Error>;

    async fn abandon(&self, session_id: SessionId);

    async fn uninstall(&self, package_name: &str) -> Result<(), Error>;
}

/// Installed packages as reported by the OS
#[async_trait]
pub trait PackageInventory: Send + Sync {
    async fn installed_packages(&self) -> Result<Vec<InstalledPackage>, Error>;

    async fn installed_version(&self, package_name: &str) -> Result<Option<VersionCode>, Error> {
        Ok(self
            .installed_packages()
            .await?
            .into_iter()
            .find(|p| p.package_name == package_name)
            .map(|p| p.version_code))
    }
}

/// Whether the app currently has a visible UI
pub trait ForegroundProbe: Send + Sync {
    fn is_foreground(&self) -> bool;
}

/// Relaunches the OS confirmation prompt of a pending session
pub trait ConfirmationLauncher: Send + Sync {
    /// `privileged` marks the prompt as coming from a privileged installer
    ///
    /// # Errors
    ///
    /// Returns an error if the prompt could not be shown.
    fn launch(&self, intent: &ConfirmationIntent, privileged: bool) -> Result<(), Error>;
}

/// Outcome reported by an out-of-process installer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateResult {
    pub status: i32,
    pub message: Option<String>,
}

/// Out-of-process installer (device-owner service, app manager, vendor
/// silent-install service)
#[async_trait]
pub trait InstallDelegate: Send + Sync {
    /// Checked again before every call; the service may go away after binding
    fn is_available(&self) -> bool;

    /// `InstallError::Unsupported` sends the request to the OS prompt instead
    async fn install(&self, request: &InstallRequest) -> Result<DelegateResult, Error>;

    async fn uninstall(&self, package_name: &str) -> Result<(), Error>;
}

/// Shell command with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    program: String,
    args: Vec<String>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Rendered for logs and error messages
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output from command execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs shell commands for the root and Shizuku installers
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutput, Error>;

    /// Find a program on `PATH`
    async fn which(&self, program: &str) -> Option<PathBuf>;
}

/// `CommandRunner` backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutput, Error> {
        debug!(command = %command.display(), "Running shell command");
        let output = Command::new(command.program())
            .args(command.args())
            .output()
            .await
            .map_err(|e| InstallError::CommandFailed {
                command: command.display(),
                message: e.to_string(),
            })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn which(&self, program: &str) -> Option<PathBuf> {
        let path = std::env::var_os("PATH")?;
        for dir in std::env::split_paths(&path) {
            let candidate = dir.join(program);
            if tokio::fs::metadata(&candidate)
                .await
                .is_ok_and(|meta| meta.is_file())
            {
                return Some(candidate);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_params_builder() {
        let params = SessionParams::new()
            .with_total_size(42)
            .with_require_user_action(true);
        assert_eq!(params.total_size, 42);
        assert!(params.require_user_action);
        assert!(params.installer_package_name.is_none());
    }

    #[test]
    fn test_shell_command_display() {
        let cmd = ShellCommand::new("su").arg("-c").arg("pm install-commit 7");
        assert_eq!(cmd.display(), "su -c pm install-commit 7");
    }

    #[tokio::test]
    async fn test_tokio_runner_reports_missing_program() {
        let runner = TokioCommandRunner;
        let result = runner
            .run(&ShellCommand::new("orchard-definitely-not-a-program"))
            .await;
        assert!(result.is_err());
        assert!(runner.which("orchard-definitely-not-a-program").await.is_none());
    }
}
