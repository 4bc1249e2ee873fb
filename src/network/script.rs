//! Generated configuration scripts handed to the privileged executor.

/// Interpreter a script is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// POSIX shell, run through `bash`
    Shell,
    /// Windows PowerShell
    PowerShell,
}

impl ScriptKind {
    pub fn file_suffix(&self) -> &'static str {
        match self {
            Self::Shell => ".sh",
            Self::PowerShell => ".ps1",
        }
    }
}

/// A one-shot configuration script.
#[derive(Debug, Clone)]
pub struct ConfigScript {
    pub kind: ScriptKind,
    pub body: String,
}

impl ConfigScript {
    pub fn shell(body: String) -> Self {
        Self {
            kind: ScriptKind::Shell,
            body,
        }
    }

    pub fn powershell(body: String) -> Self {
        Self {
            kind: ScriptKind::PowerShell,
            body,
        }
    }
}

/// Quote a value for POSIX shells. Interface names come from the OS, but
/// macOS hardware ports routinely contain spaces.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Quote a value as a PowerShell single-quoted literal.
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
