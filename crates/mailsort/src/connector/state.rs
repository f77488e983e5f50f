//! Per-instance connector lifecycle.
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> CONNECTED -> DISCONNECTED
//!                     |             |
//!                     v             v
//!                TOKEN_EXPIRING -> REFRESHING -> CONNECTED
//!                                      |
//!                                      v
//!                                 AUTH_FAILED (terminal)
//! ```

use std::fmt;

use super::error::{ConnectorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Connected,
    TokenExpiring,
    Refreshing,
    AuthFailed,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectorState::Disconnected => "DISCONNECTED",
            ConnectorState::Connecting => "CONNECTING",
            ConnectorState::Connected => "CONNECTED",
            ConnectorState::TokenExpiring => "TOKEN_EXPIRING",
            ConnectorState::Refreshing => "REFRESHING",
            ConnectorState::AuthFailed => "AUTH_FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct StateMachine {
    state: ConnectorState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            state: ConnectorState::Disconnected,
        }
    }
}

impl StateMachine {
    pub fn current(&self) -> ConnectorState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectorState::Connected
    }

    /// Fails fast once the instance has hit AUTH_FAILED.
    pub fn ensure_usable(&self) -> Result<()> {
        if self.state == ConnectorState::AuthFailed {
            return Err(ConnectorError::AuthFailedTerminal);
        }
        Ok(())
    }

    pub fn transition(&mut self, next: ConnectorState) -> Result<()> {
        use ConnectorState::*;

        let allowed = match (self.state, next) {
            (AuthFailed, _) => return Err(ConnectorError::AuthFailedTerminal),
            (Disconnected, Connecting) => true,
            (Connecting, Connected | TokenExpiring | Disconnected | AuthFailed) => true,
            (Connected, TokenExpiring | Disconnected) => true,
            (TokenExpiring, Refreshing) => true,
            (Refreshing, Connected | AuthFailed | Disconnected) => true,
            _ => false,
        };

        if !allowed {
            return Err(ConnectorError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        log::debug!("Connector state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectorState::*;

    #[test]
    fn test_refresh_path() {
        let mut sm = StateMachine::default();
        for next in [Connecting, TokenExpiring, Refreshing, Connected, Disconnected] {
            sm.transition(next).unwrap();
        }
        assert_eq!(sm.current(), Disconnected);
    }

    #[test]
    fn test_auth_failed_is_terminal() {
        let mut sm = StateMachine::default();
        sm.transition(Connecting).unwrap();
        sm.transition(TokenExpiring).unwrap();
        sm.transition(Refreshing).unwrap();
        sm.transition(AuthFailed).unwrap();

        assert!(matches!(
            sm.transition(Connecting),
            Err(ConnectorError::AuthFailedTerminal)
        ));
        assert!(sm.ensure_usable().is_err());
    }

    #[test]
    fn test_rejects_skipping_states() {
        let mut sm = StateMachine::default();
        assert!(matches!(
            sm.transition(Connected),
            Err(ConnectorError::InvalidTransition { .. })
        ));
        sm.transition(Connecting).unwrap();
        assert!(sm.transition(Refreshing).is_err());
    }
}
