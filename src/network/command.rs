use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, trace};

/// Run a read-only OS query, returning its raw output.
///
/// `None` when the program is missing, cannot be spawned or overruns
/// `timeout`; the child is killed in that last case.
pub async fn run(program: &str, args: &[&str], timeout: Duration) -> Option<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => {
            trace!("{} {:?} exited with {}", program, args, output.status);
            Some(output)
        }
        Ok(Err(e)) => {
            debug!("Failed to run {}: {}", program, e);
            None
        }
        Err(_) => {
            debug!("{} {:?} timed out after {:?}", program, args, timeout);
            None
        }
    }
}

/// Run a query and return stdout only when it exited successfully.
pub async fn stdout_of(program: &str, args: &[&str], timeout: Duration) -> Option<String> {
    let output = run(program, args, timeout).await?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        debug!(
            "{} {:?} failed: {}",
            program,
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        None
    }
}
