//! Error taxonomy for the session core.
//!
//! None of these errors are retried automatically; recovery is always up
//! to the caller.

use crate::session::SessionState;
use thiserror::Error;

/// Errors produced by the catalog, session controller and IP resolver.
#[derive(Debug, Error)]
pub enum VpnError {
    /// The operation is not valid in the controller's current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the controller was in.
        state: SessionState,
    },

    /// The country has no Online servers. The user should pick another one.
    #[error("no online servers available in {country}")]
    NoServersAvailable {
        /// Country that was requested.
        country: String,
    },

    /// The tunnel could not be established.
    #[error("tunnel establishment failed: {0}")]
    TunnelEstablish(String),

    /// The public address lookup failed.
    #[error("address resolution failed: {0}")]
    Resolution(String),
}

impl VpnError {
    /// Whether the error should be shown to the user rather than treated as
    /// a caller bug.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, VpnError::InvalidState { .. })
    }
}

/// Convenience alias used across the core.
pub type Result<T> = std::result::Result<T, VpnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = VpnError::InvalidState {
            operation: "connect",
            state: SessionState::Connected,
        };
        assert_eq!(err.to_string(), "cannot connect while Connected");
        assert!(!err.is_user_visible());
    }

    #[test]
    fn test_no_servers_message() {
        let err = VpnError::NoServersAvailable {
            country: "Africa".to_string(),
        };
        assert_eq!(err.to_string(), "no online servers available in Africa");
        assert!(err.is_user_visible());
    }
}
