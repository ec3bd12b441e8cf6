//! External process invocation
//!
//! Every native tool this crate talks to (ipset, iptables, netsh, wmic,
//! PowerShell, the shell) runs through the [`CommandExecutor`] seam. The real
//! implementation, [`ProcessRunner`], hides the console window, asks for
//! elevation, and enforces a hard time budget after which the child is
//! killed. Tests substitute a mock executor.

use crate::error::{PlatformError, Result};
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

/// Time budget for a single external process
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Output from an external process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Whether the process was killed after exceeding its time budget
    pub timed_out: bool,
}

impl CommandOutput {
    /// Exited with code 0 inside the time budget
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }
}

/// Trait for command execution, allowing dependency injection for testing.
#[cfg_attr(test, automock)]
pub trait CommandExecutor: Send + Sync {
    /// Run `program` with `args` and wait for it (bounded by the executor's timeout)
    fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Same as [`CommandExecutor::execute`], feeding `stdin` to the child
    fn execute_with_stdin(&self, program: &str, args: &[String], stdin: &str)
        -> Result<CommandOutput>;
}

/// Real executor that spawns system processes
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
    elevate: bool,
}

impl ProcessRunner {
    /// Create a runner with the default 30 second timeout and elevation requested
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_PROCESS_TIMEOUT,
            elevate: true,
        }
    }

    /// Override the time budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable the elevation request
    pub fn with_elevation(mut self, elevate: bool) -> Self {
        self.elevate = elevate;
        self
    }

    /// Configured time budget
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build_command(&self, program: &str, args: &[String]) -> Command {
        #[cfg_attr(not(windows), allow(unused_mut))]
        let mut command = if self.elevate && !is_elevated() && cfg!(unix) {
            // Non-interactive sudo: fail fast instead of prompting for a password
            let mut command = Command::new("sudo");
            command.arg("-n").arg(program).args(args);
            command
        } else {
            let mut command = Command::new(program);
            command.args(args);
            command
        };

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        command
    }

    fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<CommandOutput> {
        info!("Running process: {} {}", program, args.join(" "));

        let mut command = self.build_command(program, args);
        command
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            PlatformError::Process(format!("Failed to execute {}: {}", program, e))
        })?;

        // Drain both pipes before feeding stdin so a chatty child cannot deadlock us
        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            if let Err(e) = pipe.write_all(data.as_bytes()) {
                debug!("Could not write stdin of {}: {}", program, e);
            }
        }

        let (status, timed_out) = self.wait_bounded(program, &mut child)?;

        if timed_out {
            // Readers may be held open by grandchildren; leave them detached
            return Ok(CommandOutput {
                code: status.and_then(|s| s.code()),
                timed_out: true,
                ..CommandOutput::default()
            });
        }

        Ok(CommandOutput {
            stdout: join_reader(stdout_reader),
            stderr: join_reader(stderr_reader),
            code: status.and_then(|s| s.code()),
            timed_out: false,
        })
    }

    fn wait_bounded(&self, program: &str, child: &mut Child) -> Result<(Option<ExitStatus>, bool)> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok((Some(status), false));
            }
            if Instant::now() >= deadline {
                warn!(
                    "Process {} exceeded {:?}, terminating it",
                    program, self.timeout
                );
                if let Err(e) = child.kill() {
                    warn!("Failed to kill {}: {}", program, e);
                }
                return Ok((child.wait().ok(), true));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for ProcessRunner {
    fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.run(program, args, None)
    }

    fn execute_with_stdin(
        &self,
        program: &str,
        args: &[String],
        stdin: &str,
    ) -> Result<CommandOutput> {
        self.run(program, args, Some(stdin))
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_reader(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Whether the current process already runs with root privileges
#[cfg(unix)]
pub fn is_elevated() -> bool {
    // SAFETY: geteuid() has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Whether the current process already runs with administrator privileges
#[cfg(not(unix))]
pub fn is_elevated() -> bool {
    false
}

/// Convert a slice of &str into the owned form the executor trait takes.
pub fn args_to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Run a process and, when `allowed_exit_codes` is given, require its exit
/// code to be one of them.
///
/// Without an allowed set every completion counts as success, including a
/// timeout. With one, a timeout yields [`PlatformError::Timeout`] and any
/// other code yields [`PlatformError::Process`].
pub fn run_process(
    executor: &dyn CommandExecutor,
    program: &str,
    args: &[&str],
    allowed_exit_codes: Option<&[i32]>,
) -> Result<CommandOutput> {
    let output = executor.execute(program, &args_to_strings(args))?;
    check_exit_code(program, &output, allowed_exit_codes)?;
    Ok(output)
}

/// [`run_process`] with data piped to the child's stdin.
pub fn run_process_with_stdin(
    executor: &dyn CommandExecutor,
    program: &str,
    args: &[&str],
    stdin: &str,
    allowed_exit_codes: Option<&[i32]>,
) -> Result<CommandOutput> {
    let output = executor.execute_with_stdin(program, &args_to_strings(args), stdin)?;
    check_exit_code(program, &output, allowed_exit_codes)?;
    Ok(output)
}

fn check_exit_code(
    program: &str,
    output: &CommandOutput,
    allowed_exit_codes: Option<&[i32]>,
) -> Result<()> {
    let Some(allowed) = allowed_exit_codes else {
        return Ok(());
    };

    if output.timed_out {
        return Err(PlatformError::Timeout(format!(
            "{} did not finish in time",
            program
        )));
    }

    match output.code {
        Some(code) if allowed.contains(&code) => Ok(()),
        code => Err(PlatformError::Process(format!(
            "{} exited with {} (allowed {:?}): {}",
            program,
            code.map_or_else(|| "no code".to_string(), |c| c.to_string()),
            allowed,
            output.stderr.trim()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn output(code: Option<i32>, timed_out: bool) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: "boom".to_string(),
            code,
            timed_out,
        }
    }

    #[test]
    fn test_args_to_strings() {
        assert_eq!(args_to_strings(&["save", "set"]), vec!["save", "set"]);
        assert!(args_to_strings(&[]).is_empty());
    }

    #[test]
    fn test_command_output_success() {
        assert!(output(Some(0), false).success());
        assert!(!output(Some(1), false).success());
        assert!(!output(Some(0), true).success());
        assert!(!CommandOutput::default().success());
    }

    #[test]
    fn test_unchecked_exit_code_is_tolerated() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .returning(|_, _| Ok(output(Some(7), false)));

        let result = run_process(&mock, "tool", &["x"], None).unwrap();
        assert_eq!(result.code, Some(7));
    }

    #[test]
    fn test_unchecked_timeout_is_tolerated() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().returning(|_, _| Ok(output(None, true)));

        assert!(run_process(&mock, "tool", &[], None).is_ok());
    }

    #[test]
    fn test_allowed_exit_code_accepted() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|program, args| program == "ipset" && args == ["test".to_string()])
            .times(1)
            .returning(|_, _| Ok(output(Some(1), false)));

        assert!(run_process(&mock, "ipset", &["test"], Some(&[0, 1])).is_ok());
    }

    #[test]
    fn test_disallowed_exit_code_rejected() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().returning(|_, _| Ok(output(Some(2), false)));

        let err = run_process(&mock, "ipset", &[], Some(&[0])).unwrap_err();
        assert!(matches!(err, PlatformError::Process(_)));
        assert!(err.to_string().contains("exited with 2"));
    }

    #[test]
    fn test_checked_timeout_rejected() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().returning(|_, _| Ok(output(None, true)));

        let err = run_process(&mock, "wmic", &[], Some(&[0])).unwrap_err();
        assert!(matches!(err, PlatformError::Timeout(_)));
    }

    #[test]
    fn test_stdin_variant_checks_code() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute_with_stdin()
            .withf(|program, _, stdin| program == "ipset" && stdin.contains("add"))
            .returning(|_, _, _| Ok(output(Some(1), false)));

        let err = run_process_with_stdin(
            &mock,
            "ipset",
            &["restore"],
            "add s 1.2.3.4\n",
            Some(&[0]),
        )
        .unwrap_err();
        assert!(matches!(err, PlatformError::Process(_)));
    }

    #[test]
    fn test_runner_defaults() {
        let runner = ProcessRunner::default();
        assert_eq!(runner.timeout(), DEFAULT_PROCESS_TIMEOUT);
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_runner_captures_stdout() {
        let runner = ProcessRunner::new().with_elevation(false);
        let out = runner
            .execute("echo", &args_to_strings(&["-n", "hello"]))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello");
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_runner_reports_exit_code() {
        let runner = ProcessRunner::new().with_elevation(false);
        let out = runner
            .execute("sh", &args_to_strings(&["-c", "exit 3"]))
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert!(!out.timed_out);
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_runner_feeds_stdin() {
        let runner = ProcessRunner::new().with_elevation(false);
        let out = runner.execute_with_stdin("cat", &[], "add set 1.2.3.4").unwrap();
        assert_eq!(out.stdout, "add set 1.2.3.4");
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_runner_kills_on_timeout() {
        let runner = ProcessRunner::new()
            .with_elevation(false)
            .with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let out = runner.execute("sleep", &args_to_strings(&["10"])).unwrap();
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));

        let err = check_exit_code("sleep", &out, Some(&[0])).unwrap_err();
        assert!(matches!(err, PlatformError::Timeout(_)));
    }

    #[test]
    #[serial]
    fn test_runner_missing_program() {
        let runner = ProcessRunner::new().with_elevation(false);
        let result = runner.execute("definitely-not-a-real-program-xyz", &[]);
        assert!(matches!(result, Err(PlatformError::Process(_))));
    }
}
