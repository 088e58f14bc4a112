use anyhow::Context;

use std::fs::OpenOptions;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use crate::logger::AdLogger;

/// What to do when a command returns non-zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFail {
    Continue,
    Exit,
}

/// Captured result of a shell command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.returncode == 0
    }

    /// True if either stream contains `marker`
    pub fn contains(&self, marker: &str) -> bool {
        self.stdout.contains(marker) || self.stderr.contains(marker)
    }
}

/// Executes a shell command through bash and logs the outcome.
///
/// # Arguments
///
/// * `cmd` - The shell command to execute.
/// * `logger` - Logger receiving the command and its outcome.
/// * `on_fail` - `OnFail::Exit` terminates the process with exit code 1 on a non-zero return code.
///
/// # Example
///
/// ```rust,ignore
/// let out = execute_subprocess_command("ls -l", &logger, OnFail::Continue)?;
/// assert!(out.success());
/// ```
pub fn execute_subprocess_command(
    cmd: &str,
    logger: &AdLogger,
    on_fail: OnFail,
) -> anyhow::Result<CmdOutput> {
    logger.info(format!("Executing command: {}", cmd));

    let output = Command::new("bash")
        .arg("-c")
        .arg(cmd)
        .output()
        .with_context(|| format!("Failed to execute process: {}", cmd))?;

    Ok(handle_output(cmd, output, logger, on_fail))
}

/// Executes a shell command with its stderr appended to `stderr_file`.
///
/// Used for long-running converters whose progress must land on disk as it
/// is produced. The returned `stderr` is empty.
pub fn execute_with_stderr_to(
    cmd: &str,
    stderr_file: &Path,
    logger: &AdLogger,
    on_fail: OnFail,
) -> anyhow::Result<CmdOutput> {
    logger.info(format!(
        "Executing command: {} (stderr to {})",
        cmd,
        stderr_file.display()
    ));

    let stderr = OpenOptions::new()
        .create(true)
        .append(true)
        .open(stderr_file)
        .with_context(|| format!("Could not open {}", stderr_file.display()))?;

    let output = Command::new("bash")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stderr(Stdio::from(stderr))
        .output()
        .with_context(|| format!("Failed to execute process: {}", cmd))?;

    Ok(handle_output(cmd, output, logger, on_fail))
}

fn handle_output(cmd: &str, output: Output, logger: &AdLogger, on_fail: OnFail) -> CmdOutput {
    let result = CmdOutput {
        stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        // INFO: killed by signal -> no exit code
        returncode: output.status.code().unwrap_or(-1),
    };

    if result.success() {
        logger.info(logger.msg("cmd_success", &[&result.returncode, &cmd]));
    } else {
        logger.exception(logger.msg(
            "cmd_fail",
            &[&result.returncode, &cmd, &result.stdout, &result.stderr],
        ));

        if on_fail == OnFail::Exit {
            logger.error("Exiting after failed command");
            std::process::exit(1);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn logger() -> AdLogger {
        AdLogger::console("runner_test", "ts")
    }

    #[test]
    fn test_captures_streams_and_returncode() {
        let out = execute_subprocess_command(
            "echo out; echo err >&2; exit 3",
            &logger(),
            OnFail::Continue,
        )
        .unwrap();

        assert_eq!(out.stdout, "out");
        assert_eq!(out.stderr, "err");
        assert_eq!(out.returncode, 3);
        assert!(!out.success());
        assert!(out.contains("err"));
    }

    #[test]
    fn test_trims_trailing_whitespace_only() {
        let out = execute_subprocess_command("printf '  a b \\n\\n'", &logger(), OnFail::Continue)
            .unwrap();
        assert_eq!(out.stdout, "  a b");
        assert!(out.success());
    }

    #[test]
    fn test_stderr_streams_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bcl2fastq2_output.log");
        std::fs::write(&file, "first\n").unwrap();

        let out = execute_with_stderr_to(
            "echo converting >&2; echo done",
            &file,
            &logger(),
            OnFail::Continue,
        )
        .unwrap();

        assert_eq!(out.stdout, "done");
        assert_eq!(out.stderr, "");
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "first\nconverting\n");
    }
}
