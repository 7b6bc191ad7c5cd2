use crate::BackendError;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured output of a probe or reload command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run a command with a hard deadline.
///
/// The child is polled with `try_wait` and killed once the deadline
/// passes, so a wedged probe can never hang the whole tool. Commands here
/// produce small output; stdout/stderr are drained after exit.
pub fn run_command(argv: &[&str], timeout: Duration) -> Result<CommandOutput, BackendError> {
    run_command_inner(argv, None, timeout)
}

/// Like [`run_command`], feeding `input` to the child's stdin first.
/// Used for `chpasswd`, which only accepts credentials on stdin.
pub fn run_command_with_input(
    argv: &[&str],
    input: &str,
    timeout: Duration,
) -> Result<CommandOutput, BackendError> {
    run_command_inner(argv, Some(input), timeout)
}

fn run_command_inner(
    argv: &[&str],
    input: Option<&str>,
    timeout: Duration,
) -> Result<CommandOutput, BackendError> {
    let command_str = argv.join(" ");
    debug!("running: {command_str} (timeout {}s)", timeout.as_secs());

    let mut child = Command::new(argv[0])
        .args(&argv[1..])
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BackendError::CommandFailed {
            command: command_str.clone(),
            detail: e.to_string(),
        })?;

    if let Some(data) = input {
        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits early closes its end; that is not an error.
            let _ = stdin.write_all(data.as_bytes());
        }
    }

    // Drain on threads while polling: a chatty child (package installs)
    // would otherwise fill the pipe and block forever.
    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait()? {
            Some(status) => {
                return Ok(CommandOutput {
                    success: status.success(),
                    stdout: join_reader(stdout_reader),
                    stderr: join_reader(stderr_reader),
                });
            }
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(BackendError::Timeout {
                        command: command_str,
                        seconds: timeout.as_secs(),
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = source.read_to_string(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<std::thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Whether something already accepts connections on a local TCP port.
pub fn port_in_use(port: u16, timeout: Duration) -> bool {
    let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
    TcpStream::connect_timeout(&addr.into(), timeout).is_ok()
}

/// Attempt a live name resolution through the system resolver.
///
/// Uses `getent hosts`, which goes through NSS and therefore exercises
/// whatever resolver configuration was just written.
pub fn resolve_probe(domain: &str, timeout: Duration) -> bool {
    matches!(
        run_command(&["getent", "hosts", domain], timeout),
        Ok(CommandOutput { success: true, .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn run_command_captures_output() {
        let out = run_command(&["echo", "hello"], Duration::from_secs(5)).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn run_command_reports_failure_status() {
        let out = run_command(&["false"], Duration::from_secs(5)).unwrap();
        assert!(!out.success);
    }

    #[test]
    fn run_command_missing_binary_errors() {
        let result = run_command(&["confit-no-such-binary-xyz"], Duration::from_secs(1));
        assert!(matches!(result, Err(BackendError::CommandFailed { .. })));
    }

    #[test]
    fn run_command_times_out() {
        let start = Instant::now();
        let result = run_command(&["sleep", "30"], Duration::from_millis(200));
        assert!(matches!(result, Err(BackendError::Timeout { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn stdin_is_fed_to_child() {
        let out =
            run_command_with_input(&["cat"], "user:secret\n", Duration::from_secs(5)).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "user:secret\n");
    }

    #[test]
    fn port_in_use_detects_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_in_use(port, Duration::from_millis(500)));
        drop(listener);
    }

    #[test]
    fn port_in_use_false_for_closed_port() {
        // Bind then drop to find a port that was just free.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!port_in_use(port, Duration::from_millis(500)));
    }
}
