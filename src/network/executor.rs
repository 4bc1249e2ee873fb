use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{Credential, PermissionLevel};
use crate::error::ShareError;
use crate::network::script::{ConfigScript, ScriptKind};
use crate::network::types::SharingResult;

/// Phrases elevation tools print when they refuse to run something. Exit
/// codes are useless here: sudo, bash and netsh all exit 1 for everything.
const AUTH_DENIAL_PHRASES: &[&str] = &[
    "incorrect password",
    "authentication failure",
    "sorry, try again",
    "a password is required",
    "no password was provided",
    "is not in the sudoers",
    "access is denied",
    "requires elevation",
    "registry access is not allowed",
    "unauthorizedaccess",
];

/// How long sudo gets to relay SIGTERM to the script before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Classified result of one privileged script run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Success,
    AuthFailure(String),
    Timeout,
    OtherFailure(String),
}

impl ExecOutcome {
    pub fn into_sharing_result(self, timeout: Duration) -> SharingResult {
        match self {
            Self::Success => SharingResult::ok(),
            Self::AuthFailure(msg) => SharingResult::failed(ShareError::AuthFailure(msg)),
            Self::Timeout => SharingResult::failed(ShareError::Timeout(format!(
                "Network configuration took longer than {}s",
                timeout.as_secs()
            ))),
            Self::OtherFailure(msg) => SharingResult::failed(ShareError::Other(msg)),
        }
    }
}

/// How the script gets its privileges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    /// `sudo -S`, password on stdin
    Sudo,
    /// Process is already root / elevated; run the interpreter directly
    Direct,
}

impl From<PermissionLevel> for Elevation {
    fn from(level: PermissionLevel) -> Self {
        match level {
            PermissionLevel::NeedsPassword => Self::Sudo,
            PermissionLevel::Root | PermissionLevel::OsManaged => Self::Direct,
        }
    }
}

/// Runs generated configuration scripts with elevated privileges.
#[derive(Debug, Clone)]
pub struct PrivilegedExecutor {
    elevation: Elevation,
    timeout: Duration,
}

impl PrivilegedExecutor {
    pub fn new(elevation: Elevation, timeout: Duration) -> Self {
        Self { elevation, timeout }
    }

    pub fn elevation(&self) -> Elevation {
        self.elevation
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `script` once and classify the result.
    ///
    /// The script lives in a private temp file that is removed when this
    /// returns, whatever the outcome.
    pub async fn run(&self, script: &ConfigScript, credential: Option<&Credential>) -> ExecOutcome {
        let path = match write_script(script) {
            Ok(p) => p,
            Err(e) => {
                warn!("Could not stage configuration script: {}", e);
                return ExecOutcome::OtherFailure(format!("Could not write script: {}", e));
            }
        };
        self.run_staged(script.kind, &path, credential).await
    }

    async fn run_staged(
        &self,
        kind: ScriptKind,
        path: &Path,
        credential: Option<&Credential>,
    ) -> ExecOutcome {
        let mut cmd = self.command_for(kind, path, credential.is_some());
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ExecOutcome::OtherFailure(format!("Failed to start elevation: {}", e)),
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let (Elevation::Sudo, Some(cred)) = (self.elevation, credential) {
                let mut line = String::with_capacity(cred.expose().len() + 1);
                line.push_str(cred.expose());
                line.push('\n');
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    debug!("Could not hand credential to sudo: {}", e);
                }
            }
            drop(stdin);
        }

        // Drain the pipes alongside the wait so the child can be signalled on
        // timeout instead of being consumed by `wait_with_output`.
        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));

        info!("Running {:?} configuration script ({:?})", kind, self.elevation);
        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let stdout = collect(stdout).await;
                let stderr = collect(stderr).await;
                let outcome = classify(
                    status.success(),
                    &String::from_utf8_lossy(&stdout),
                    &String::from_utf8_lossy(&stderr),
                    status.code(),
                );
                debug!("Configuration script finished: {:?}", outcome_label(&outcome));
                outcome
            }
            Ok(Err(e)) => ExecOutcome::OtherFailure(e.to_string()),
            Err(_) => {
                warn!("Configuration script timed out after {:?}", self.timeout);
                terminate(&mut child).await;
                stdout.abort();
                stderr.abort();
                ExecOutcome::Timeout
            }
        }
    }

    fn command_for(&self, kind: ScriptKind, path: &Path, has_credential: bool) -> Command {
        match (kind, self.elevation) {
            (ScriptKind::PowerShell, _) => {
                let mut cmd = Command::new("powershell");
                cmd.args(["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-File"])
                    .arg(path);
                cmd
            }
            (ScriptKind::Shell, Elevation::Sudo) => {
                let mut cmd = Command::new("sudo");
                if has_credential {
                    cmd.args(["-S", "-p", ""]);
                } else {
                    // Without a password only a cached sudo timestamp can work.
                    cmd.arg("-n");
                }
                cmd.arg("bash").arg(path);
                cmd
            }
            (ScriptKind::Shell, Elevation::Direct) => {
                let mut cmd = Command::new("bash");
                cmd.arg(path);
                cmd
            }
        }
    }
}

/// SIGTERM first: sudo relays it to the elevated script, SIGKILL it cannot.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: plain signal delivery to a child we spawned and have not reaped.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok() {
                return;
            }
            warn!("Configuration script ignored SIGTERM, killing it");
        }
    }
    if let Err(e) = child.kill().await {
        debug!("Could not kill configuration script: {}", e);
    }
}

/// Output of an exited script. A daemon it left behind may still hold the
/// pipe open, so the read is bounded.
async fn collect(mut task: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(TERMINATE_GRACE, &mut task).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            task.abort();
            Vec::new()
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Could not read script output: {}", e);
        }
    }
    buf
}

fn write_script(script: &ConfigScript) -> std::io::Result<TempPath> {
    // tempfile creates the file 0600, so only the invoking user (and root)
    // can read it.
    let mut file = tempfile::Builder::new()
        .prefix("rm01-")
        .suffix(script.kind.file_suffix())
        .tempfile()?;
    file.write_all(script.body.as_bytes())?;
    file.flush()?;
    Ok(file.into_temp_path())
}

/// Turn exit status + output into an outcome. Auth denial is recognised by
/// phrase, in either stream.
pub fn classify(success: bool, stdout: &str, stderr: &str, code: Option<i32>) -> ExecOutcome {
    if success {
        return ExecOutcome::Success;
    }
    let stderr = stderr.trim();
    let stdout = stdout.trim();
    let combined = format!("{}\n{}", stderr, stdout).to_lowercase();
    let message = if !stderr.is_empty() {
        stderr.to_string()
    } else if !stdout.is_empty() {
        stdout.to_string()
    } else {
        match code {
            Some(c) => format!("Script exited with status {}", c),
            None => "Script was terminated by a signal".to_string(),
        }
    };

    if AUTH_DENIAL_PHRASES.iter().any(|p| combined.contains(p)) {
        ExecOutcome::AuthFailure(message)
    } else {
        ExecOutcome::OtherFailure(message)
    }
}

fn outcome_label(outcome: &ExecOutcome) -> &'static str {
    match outcome {
        ExecOutcome::Success => "success",
        ExecOutcome::AuthFailure(_) => "auth failure",
        ExecOutcome::Timeout => "timeout",
        ExecOutcome::OtherFailure(_) => "failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success_ignores_output() {
        assert_eq!(
            classify(true, "", "sorry, try again", Some(0)),
            ExecOutcome::Success
        );
    }

    #[test]
    fn test_classify_sudo_denials() {
        for msg in [
            "Sorry, try again.\nsudo: 3 incorrect password attempts",
            "sudo: a password is required",
            "alice is not in the sudoers file.  This incident will be reported.",
            "su: Authentication failure",
        ] {
            assert!(
                matches!(classify(false, "", msg, Some(1)), ExecOutcome::AuthFailure(_)),
                "expected auth failure for {msg:?}"
            );
        }
    }

    #[test]
    fn test_classify_windows_denials() {
        let outcome = classify(
            false,
            "The requested operation requires elevation (Run as administrator).",
            "",
            Some(1),
        );
        assert!(matches!(outcome, ExecOutcome::AuthFailure(_)));

        for msg in [
            "Set-ItemProperty : Requested registry access is not allowed.",
            "+ FullyQualifiedErrorId : System.UnauthorizedAccessException",
        ] {
            assert!(
                matches!(classify(false, "", msg, Some(1)), ExecOutcome::AuthFailure(_)),
                "expected auth failure for {msg:?}"
            );
        }
    }

    #[test]
    fn test_classify_mentioning_administrator_is_not_auth() {
        let outcome = classify(
            false,
            "",
            "netsh: the Administrator share profile could not be found",
            Some(1),
        );
        assert!(matches!(outcome, ExecOutcome::OtherFailure(_)));
    }

    #[test]
    fn test_classify_other_failure_keeps_message() {
        assert_eq!(
            classify(false, "", "iptables: No chain/target/match by that name.\n", Some(1)),
            ExecOutcome::OtherFailure("iptables: No chain/target/match by that name.".into())
        );
        assert_eq!(
            classify(false, "", "", Some(2)),
            ExecOutcome::OtherFailure("Script exited with status 2".into())
        );
    }

    #[test]
    fn test_outcome_to_sharing_result() {
        let timeout = Duration::from_secs(30);
        assert!(ExecOutcome::Success.into_sharing_result(timeout).success);
        let auth = ExecOutcome::AuthFailure("denied".into()).into_sharing_result(timeout);
        assert!(auth.error.unwrap().is_auth());
        let slow = ExecOutcome::Timeout.into_sharing_result(timeout);
        assert_eq!(slow.error.unwrap().kind(), "Timeout");
    }

    #[test]
    fn test_elevation_from_permission_level() {
        assert_eq!(Elevation::from(PermissionLevel::NeedsPassword), Elevation::Sudo);
        assert_eq!(Elevation::from(PermissionLevel::Root), Elevation::Direct);
        assert_eq!(Elevation::from(PermissionLevel::OsManaged), Elevation::Direct);
    }

    #[cfg(unix)]
    mod direct {
        use super::*;

        fn executor(timeout: Duration) -> PrivilegedExecutor {
            PrivilegedExecutor::new(Elevation::Direct, timeout)
        }

        #[tokio::test]
        async fn test_script_file_removed_after_success() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("script-path");
            let script = ConfigScript::shell(format!(
                "echo \"$0\" > '{}'\n",
                marker.display()
            ));

            let outcome = executor(Duration::from_secs(10)).run(&script, None).await;
            assert_eq!(outcome, ExecOutcome::Success);

            let staged = std::fs::read_to_string(&marker).unwrap();
            assert!(!Path::new(staged.trim()).exists());
        }

        #[tokio::test]
        async fn test_script_file_removed_after_failure() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("script-path");
            let script = ConfigScript::shell(format!(
                "echo \"$0\" > '{}'\necho 'boom' >&2\nexit 4\n",
                marker.display()
            ));

            let outcome = executor(Duration::from_secs(10)).run(&script, None).await;
            assert_eq!(outcome, ExecOutcome::OtherFailure("boom".into()));

            let staged = std::fs::read_to_string(&marker).unwrap();
            assert!(!Path::new(staged.trim()).exists());
        }

        #[tokio::test]
        async fn test_hung_script_times_out() {
            let script = ConfigScript::shell("sleep 10\n".into());
            let started = std::time::Instant::now();
            let outcome = executor(Duration::from_millis(300)).run(&script, None).await;
            assert_eq!(outcome, ExecOutcome::Timeout);
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[tokio::test]
        async fn test_timed_out_script_gets_sigterm() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("terminated");
            let script = ConfigScript::shell(format!(
                "trap \"touch '{}'; exit 143\" TERM\nsleep 30 &\nwait\n",
                marker.display()
            ));

            let outcome = executor(Duration::from_millis(300)).run(&script, None).await;
            assert_eq!(outcome, ExecOutcome::Timeout);
            assert!(marker.exists());
        }
    }
}
