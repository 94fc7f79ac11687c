// Standard library
use std::ffi::OsString;

// External crates
use crate::error::{Result, WsError};
use duct::cmd;
use tracing::debug;
use which::which;

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

fn render_command(command: &str, args: &[String]) -> String {
    format!("{} {}", command, args.join(" "))
}

/// Run a command to completion, capturing stdout and stderr.
///
/// A non-zero exit status is not an error here; callers inspect `success`
/// and `stderr` because the CLI reports API errors (NotFound, Forbidden) that way.
pub fn run_command(command: &str, args: &[String], stdin: Option<Vec<u8>>) -> Result<CommandOutput> {
    let full_command = render_command(command, args);
    debug!("Executing command: {}", full_command);

    let mut expression = cmd(command, args.iter().map(OsString::from))
        .stdout_capture()
        .stderr_capture()
        .unchecked();
    if let Some(bytes) = stdin {
        expression = expression.stdin_bytes(bytes);
    }

    let output = expression.run().map_err(|e| {
        WsError::Internal(format!("Failed to start command '{}': {}", full_command, e))
    })?;

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Start a long-running command and hand back a reader over its stdout.
///
/// The returned handle can be killed from another thread, which is how
/// streaming watches are torn down.
pub fn spawn_reader(command: &str, args: &[String]) -> Result<duct::ReaderHandle> {
    let full_command = render_command(command, args);
    debug!("Streaming command: {}", full_command);

    cmd(command, args.iter().map(OsString::from))
        .stderr_null()
        .unchecked()
        .reader()
        .map_err(|e| WsError::Internal(format!("Failed to start command '{}': {}", full_command, e)))
}

/// Checks if a command-line tool is available in the system's PATH.
pub fn is_tool_installed(tool_name: &str) -> bool {
    which(tool_name).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_command_joins_args() {
        let args = vec!["get".to_string(), "pods".to_string()];
        assert_eq!(render_command("kubectl", &args), "kubectl get pods");
    }

    #[test]
    fn test_missing_tool_is_not_installed() {
        assert!(!is_tool_installed("definitely-not-a-real-binary-ws"));
    }
}
