//! `pm` driven through a privileged shell (root or Shizuku)

use async_trait::async_trait;
use orchard_errors::{Error, InstallError};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ensure_files, file_size, split_name, Installer, SessionContext};
use crate::os::{CommandOutput, CommandRunner, ShellCommand};
use crate::selection::InstallerKind;
use crate::session::{InstallRequest, SessionId};
use crate::status::{status_from_pm_output, STATUS_SUCCESS};

/// Which privileged shell wraps the `pm` calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellMode {
    Root,
    Shizuku,
}

impl ShellMode {
    #[must_use]
    pub fn program(self) -> &'static str {
        match self {
            Self::Root => "su",
            Self::Shizuku => "rish",
        }
    }

    #[must_use]
    pub fn wrap(self, script: &str) -> ShellCommand {
        ShellCommand::new(self.program()).arg("-c").arg(script)
    }

    /// Whether this shell can be used on the current device
    pub async fn is_available(self, runner: &dyn CommandRunner) -> bool {
        if runner.which(self.program()).await.is_none() {
            return false;
        }
        match self {
            Self::Root => runner
                .run(&self.wrap("id -u"))
                .await
                .is_ok_and(|out| out.success() && out.stdout.trim() == "0"),
            Self::Shizuku => true,
        }
    }
}

/// Installs with `pm install-create`, `install-write` and `install-commit`
pub struct ShellInstaller {
    runner: Arc<dyn CommandRunner>,
    ctx: SessionContext,
    mode: ShellMode,
}

impl ShellInstaller {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, ctx: SessionContext, mode: ShellMode) -> Self {
        Self { runner, ctx, mode }
    }

    async fn pm(&self, script: &str) -> Result<CommandOutput, Error> {
        let command = self.mode.wrap(script);
        debug!(shell = self.mode.program(), script, "Running pm");
        self.runner.run(&command).await
    }

    async fn pm_checked(&self, script: &str) -> Result<CommandOutput, Error> {
        let output = self.pm(script).await?;
        if !output.success() {
            return Err(InstallError::CommandFailed {
                command: script.to_string(),
                message: failure_text(&output),
            }
            .into());
        }
        Ok(output)
    }

    async fn write_all(&self, session_id: SessionId, request: &InstallRequest) -> Result<(), Error> {
        for path in &request.files {
            let size = file_size(&request.package_name, path).await?;
            let script = format!(
                "pm install-write -S {size} {session_id} {} {}",
                shell_quote(&split_name(path)),
                shell_quote(&path.to_string_lossy()),
            );
            self.pm_checked(&script).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Installer for ShellInstaller {
    fn kind(&self) -> InstallerKind {
        match self.mode {
            ShellMode::Root => InstallerKind::Root,
            ShellMode::Shizuku => InstallerKind::Shizuku,
        }
    }

    async fn install(&self, request: &InstallRequest) -> Result<(), Error> {
        ensure_files(request)?;
        let mut total_size = 0u64;
        for path in &request.files {
            total_size += file_size(&request.package_name, path).await?;
        }

        let created = self
            .pm_checked(&format!("pm install-create -r -S {total_size}"))
            .await?;
        let session_id =
            parse_session_id(&created.stdout).ok_or_else(|| InstallError::CommandFailed {
                command: "pm install-create".to_string(),
                message: format!("no session id in output: {}", created.stdout.trim()),
            })?;
        self.ctx.track(session_id, request);

        if let Err(e) = self.write_all(session_id, request).await {
            warn!(session_id, package = %request.package_name, error = %e, "Abandoning shell session");
            if let Err(abandon) = self.pm(&format!("pm install-abandon {session_id}")).await {
                warn!(session_id, error = %abandon, "Failed to abandon shell session");
            }
            self.ctx.untrack(session_id);
            return Err(e);
        }

        let committed = match self.pm(&format!("pm install-commit {session_id}")).await {
            Ok(output) => output,
            Err(e) => {
                self.ctx.untrack(session_id);
                return Err(e);
            }
        };
        let text = format!("{}{}", committed.stdout, committed.stderr);
        let status = status_from_pm_output(&text);
        info!(
            session_id,
            package = %request.package_name,
            status,
            "Shell install committed"
        );
        let message = (status != STATUS_SUCCESS).then(|| failure_text(&committed));
        self.ctx.report(session_id, status, message);
        Ok(())
    }

    async fn uninstall(&self, package_name: &str) -> Result<(), Error> {
        let output = self
            .pm(&format!("pm uninstall {}", shell_quote(package_name)))
            .await?;
        if output.stdout.trim().starts_with("Success") {
            Ok(())
        } else {
            Err(InstallError::CommandFailed {
                command: format!("pm uninstall {package_name}"),
                message: failure_text(&output),
            }
            .into())
        }
    }
}

/// Session id from `Success: created install session [1234]`
pub(crate) fn parse_session_id(output: &str) -> Option<SessionId> {
    let start = output.find('[')? + 1;
    let end = start + output[start..].find(']')?;
    output[start..end].trim().parse().ok()
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn failure_text(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        output.stdout.trim().to_string()
    } else {
        stderr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_id() {
        assert_eq!(
            parse_session_id("Success: created install session [1234]\n"),
            Some(1234)
        );
        assert_eq!(parse_session_id("Error: no session"), None);
        assert_eq!(parse_session_id("[abc]"), None);
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("base.apk"), "'base.apk'");
        assert_eq!(shell_quote("it's.apk"), r"'it'\''s.apk'");
    }

    #[test]
    fn test_wrap_uses_shell_program() {
        let cmd = ShellMode::Shizuku.wrap("pm list packages");
        assert_eq!(cmd.program(), "rish");
        assert_eq!(cmd.args(), ["-c", "pm list packages"]);
    }
}
