use std::fmt;

use serde::Serialize;

use crate::error::ShareError;

/// A network interface as reported by the OS.
///
/// Re-detected on every query and never mutated; two values are the same
/// interface when their names match.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkInterface {
    /// OS-level identifier (`enx…` on Linux, hardware port on macOS,
    /// connection name on Windows)
    pub name: String,
    /// Colon-separated hex, or "N/A"
    pub mac: String,
    pub description: String,
}

impl NetworkInterface {
    pub fn new(name: impl Into<String>, mac: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mac: mac.into(),
            description: description.into(),
        }
    }
}

impl PartialEq for NetworkInterface {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for NetworkInterface {}

/// Overall sharing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    /// Covers both directions: enabling and tearing down
    Connecting,
    Connected,
    Failed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Outcome of a backend enable/disable call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharingResult {
    pub success: bool,
    pub error: Option<ShareError>,
}

impl SharingResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: ShareError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }

    /// Error to surface on failure; a failure without a classified kind still
    /// needs a message.
    pub fn into_error(self) -> Option<ShareError> {
        if self.success {
            None
        } else {
            Some(
                self.error
                    .unwrap_or_else(|| ShareError::Other("Sharing command failed".into())),
            )
        }
    }
}

/// Live OS view of whether sharing is really in place.
///
/// The adapter address is deliberately absent: the RM-01 hands out the same
/// address over DHCP whether or not sharing is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SharingProbe {
    pub nat_present: bool,
    pub forwarding_enabled: bool,
}

impl SharingProbe {
    /// Status the reconciler adopts for this snapshot.
    pub fn status(&self) -> ConnectionStatus {
        match (self.nat_present, self.forwarding_enabled) {
            (true, true) => ConnectionStatus::Connected,
            (true, false) => ConnectionStatus::Failed,
            (false, _) => ConnectionStatus::Idle,
        }
    }
}

/// Traffic rate seen from the RM-01's side, in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RateSample {
    pub upload: f64,
    pub download: f64,
}

impl RateSample {
    pub const ZERO: RateSample = RateSample {
        upload: 0.0,
        download: 0.0,
    };
}

/// Format bytes into human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else if b < GB {
        format!("{:.1} MB", b / MB)
    } else {
        format!("{:.2} GB", b / GB)
    }
}

/// Format a bytes/second rate
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec.max(0.0) as u64))
}
