use std::future::Future;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::network::command;

/// Administrator password, redacted in `Debug` and never written anywhere
/// except the elevation helper's stdin.
pub struct Credential(SecretString);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(SecretString::from(secret.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// Privilege level of the current process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionLevel {
    /// Already root; scripts run without a password
    Root,
    /// Needs `sudo` and therefore a password
    NeedsPassword,
    /// Elevation is decided by the OS (UAC), no password involved
    OsManaged,
}

impl PermissionLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::NeedsPassword => "sudo",
            Self::OsManaged => "os-managed",
        }
    }
}

/// Detect how configuration scripts will be elevated
#[cfg(unix)]
pub fn check_permissions() -> PermissionLevel {
    // SAFETY: geteuid has no preconditions and cannot fail.
    if unsafe { libc::geteuid() } == 0 {
        info!("Running as root, no password needed");
        return PermissionLevel::Root;
    }
    PermissionLevel::NeedsPassword
}

/// Detect how configuration scripts will be elevated
#[cfg(not(unix))]
pub fn check_permissions() -> PermissionLevel {
    info!("Elevation is handled by the OS");
    PermissionLevel::OsManaged
}

/// Source of an administrator credential.
///
/// `None` means the user cancelled (or nothing could ask them); the state
/// machine treats that as a silent return, not a failure.
pub trait CredentialPrompt: Send + Sync + 'static {
    fn request(&self) -> impl Future<Output = Option<Credential>> + Send;
}

impl<P: CredentialPrompt> CredentialPrompt for std::sync::Arc<P> {
    async fn request(&self) -> Option<Credential> {
        self.as_ref().request().await
    }
}

/// Credential supplied up front (`--password`).
pub struct StaticCredential(String);

impl StaticCredential {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }
}

impl CredentialPrompt for StaticCredential {
    async fn request(&self) -> Option<Credential> {
        if self.0.is_empty() {
            None
        } else {
            Some(Credential::new(self.0.clone()))
        }
    }
}

/// Reads a password from the controlling terminal without echo.
pub struct TerminalPrompt {
    label: String,
    timeout: Duration,
}

impl TerminalPrompt {
    pub fn new(label: impl Into<String>, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            timeout,
        }
    }
}

impl CredentialPrompt for TerminalPrompt {
    async fn request(&self) -> Option<Credential> {
        let label = format!("{}: ", self.label);
        let read = tokio::task::spawn_blocking(move || rpassword::prompt_password(label));

        match tokio::time::timeout(self.timeout, read).await {
            Ok(Ok(Ok(pw))) if !pw.is_empty() => Some(Credential::new(pw)),
            Ok(Ok(Ok(_))) => None,
            Ok(Ok(Err(e))) => {
                debug!("Password prompt aborted: {}", e);
                None
            }
            Ok(Err(e)) => {
                warn!("Password prompt task failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Password prompt timed out after {:?}", self.timeout);
                None
            }
        }
    }
}

/// Asks through a desktop password dialog: zenity or kdialog on Linux,
/// osascript on macOS. Used when there is no terminal to read from.
pub struct DialogPrompt {
    title: String,
    text: String,
    timeout: Duration,
}

impl DialogPrompt {
    pub fn new(title: impl Into<String>, text: impl Into<String>, timeout: Duration) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            timeout,
        }
    }

    fn candidates(&self) -> Vec<(&'static str, Vec<String>)> {
        if cfg!(target_os = "macos") {
            let script = format!(
                "text returned of (display dialog \"{}\" with title \"{}\" default answer \"\" with hidden answer)",
                self.text.replace('"', "'"),
                self.title.replace('"', "'")
            );
            vec![("osascript", vec!["-e".into(), script])]
        } else {
            vec![
                (
                    "zenity",
                    vec![
                        "--password".into(),
                        format!("--title={}", self.title),
                        format!("--text={}", self.text),
                    ],
                ),
                ("kdialog", vec!["--password".into(), self.text.clone()]),
            ]
        }
    }
}

impl CredentialPrompt for DialogPrompt {
    async fn request(&self) -> Option<Credential> {
        for (program, args) in self.candidates() {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            // A missing helper falls through to the next one; a helper that ran
            // and returned non-zero means the user dismissed it.
            let Some(output) = command::run(program, &args, self.timeout).await else {
                continue;
            };
            if !output.status.success() {
                debug!("{} password dialog dismissed", program);
                return None;
            }
            let pw = String::from_utf8_lossy(&output.stdout)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            return if pw.is_empty() {
                None
            } else {
                Some(Credential::new(pw))
            };
        }
        warn!("No password dialog helper available");
        None
    }
}
