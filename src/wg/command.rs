//! Subprocess execution with sudo and timeouts

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Builds and runs commands that may need elevated privileges
#[derive(Debug, Clone)]
pub struct Privileged {
    use_sudo: bool,
    timeout: Duration,
}

impl Privileged {
    pub fn new(use_sudo: bool, timeout: Duration) -> Self {
        Self { use_sudo, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A command for `program`, prefixed with `sudo -n` when configured
    pub fn command(&self, program: &str) -> Command {
        if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(program);
            cmd
        } else {
            Command::new(program)
        }
    }

    /// Run a privileged command and return its stdout
    pub async fn run(&self, program: &str, args: &[&str], stdin: Option<&str>) -> Result<String> {
        let mut cmd = self.command(program);
        cmd.args(args);
        run(cmd, &describe(program, args), stdin, self.timeout).await
    }
}

/// Run an unprivileged command and return its stdout
pub async fn run_plain(
    program: &str,
    args: &[&str],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    run(cmd, &describe(program, args), stdin, timeout).await
}

/// Spawn `cmd`, feed it `stdin`, and collect stdout.
///
/// Stdin is written while stdout and stderr are drained, and the whole
/// exchange runs under `timeout`. Non-zero exits become [`Error::Command`]
/// carrying stderr; a command that outlives `timeout` is killed and
/// reported as [`Error::CommandTimeout`].
pub async fn run(
    mut cmd: Command,
    label: &str,
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<String> {
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| Error::Command {
        command: label.to_string(),
        message: e.to_string(),
    })?;

    let pipe = child.stdin.take();
    let feed = async move {
        let (Some(mut pipe), Some(input)) = (pipe, stdin) else {
            return Ok(());
        };
        match pipe.write_all(input.as_bytes()).await {
            // the child exited without reading everything; its status tells why
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            Err(e) => Err(e),
            Ok(()) => pipe.shutdown().await,
        }
    };
    let exchange = async {
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        fed.and(output)
    };

    let output = match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::CommandTimeout(label.to_string())),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        };
        return Err(Error::Command {
            command: label.to_string(),
            message,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn describe(program: &str, args: &[&str]) -> String {
    let mut label = program.to_string();
    for arg in args {
        label.push(' ');
        label.push_str(arg);
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout_and_stdin() {
        let out = run_plain("cat", &[], Some("hello"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_run_reports_failure() {
        let err = run_plain("sh", &["-c", "echo boom >&2; exit 3"], None, Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            Error::Command { command, message } => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let err = run_plain("sleep", &["5"], None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimeout(_)));
    }

    #[tokio::test]
    async fn test_large_stdin_is_echoed_back() {
        let input = "x".repeat(512 * 1024);
        let out = run_plain("tee", &["/dev/null"], Some(&input), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.len(), input.len());
    }

    #[tokio::test]
    async fn test_timeout_covers_stdin_write() {
        let input = "x".repeat(512 * 1024);
        let started = std::time::Instant::now();
        let err = run_plain("sleep", &["5"], Some(&input), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_sudo_prefix() {
        let cmd = Privileged::new(true, Duration::from_secs(1)).command("wg");
        assert_eq!(cmd.as_std().get_program(), "sudo");
        let cmd = Privileged::new(false, Duration::from_secs(1)).command("wg");
        assert_eq!(cmd.as_std().get_program(), "wg");
    }
}
