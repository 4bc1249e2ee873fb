use thiserror::Error;

/// Unified error type for the connector.
///
/// The first group of variants are the outcome kinds the state machine
/// surfaces through its error channel. `Busy` is handed back to a caller whose
/// intent was ignored and is never emitted as an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShareError {
    #[error("No RM-01 adapter (AX88179A) detected")]
    NoAdapter,

    #[error("No upstream network found")]
    NoUpstream,

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Sharing is only partially configured (NAT present, IP forwarding disabled)")]
    PartialConfiguration,

    #[error("Cancelled by user")]
    UserCancelled,

    #[error("Another connect/disconnect is already in progress")]
    Busy,

    #[error("{0}")]
    Other(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl ShareError {
    /// Short, stable name of the variant (used for `--json` output and logs).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoAdapter => "NoAdapter",
            Self::NoUpstream => "NoUpstream",
            Self::AuthFailure(_) => "AuthFailure",
            Self::Timeout(_) => "Timeout",
            Self::PartialConfiguration => "PartialConfiguration",
            Self::UserCancelled => "UserCancelled",
            Self::Busy => "Busy",
            Self::Other(_) => "Other",
            Self::Config(_) => "Config",
        }
    }

    /// Elevation was denied or the credential was wrong.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthFailure(_))
    }
}

pub type ShareResult<T> = Result<T, ShareError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant_name() {
        assert_eq!(ShareError::NoAdapter.kind(), "NoAdapter");
        assert_eq!(ShareError::AuthFailure("x".into()).kind(), "AuthFailure");
        assert_eq!(ShareError::Other("boom".into()).kind(), "Other");
        assert_eq!(ShareError::PartialConfiguration.kind(), "PartialConfiguration");
    }

    #[test]
    fn test_only_auth_failure_is_auth() {
        assert!(ShareError::AuthFailure("sorry, try again".into()).is_auth());
        assert!(!ShareError::Timeout("30s".into()).is_auth());
        assert!(!ShareError::Other("permission".into()).is_auth());
    }

    #[test]
    fn test_other_displays_raw_message() {
        let err = ShareError::Other("iptables: command not found".into());
        assert_eq!(err.to_string(), "iptables: command not found");
    }
}
