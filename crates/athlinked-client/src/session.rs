//! Per-tab session state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Announced { user }
//!       ^______________________________________|  (disconnect, from anywhere)
//! ```
//!
//! Nothing survives a disconnect: after reconnecting the tab must announce
//! its user again before the server will accept sends.

use athlinked_shared::UserId;
use tracing::debug;

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    /// Transport is up but no identity has been announced.
    Connected,
    Announced {
        user: UserId,
    },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Announced { .. } => "announced",
        }
    }
}

#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn user(&self) -> Option<&UserId> {
        match &self.state {
            SessionState::Announced { user } => Some(user),
            _ => None,
        }
    }

    pub fn is_announced(&self) -> bool {
        matches!(self.state, SessionState::Announced { .. })
    }

    pub fn begin_connect(&mut self) -> Result<(), ClientError> {
        match self.state {
            SessionState::Disconnected => self.move_to(SessionState::Connecting),
            _ => Err(self.invalid("connecting")),
        }
    }

    pub fn connected(&mut self) -> Result<(), ClientError> {
        match self.state {
            SessionState::Connecting => self.move_to(SessionState::Connected),
            _ => Err(self.invalid("connected")),
        }
    }

    /// Record the announced identity. Announcing again on a live connection
    /// switches the user, matching the server's last-bind-wins rule.
    pub fn announce(&mut self, user: UserId) -> Result<(), ClientError> {
        match self.state {
            SessionState::Connected | SessionState::Announced { .. } => {
                self.move_to(SessionState::Announced { user })
            }
            _ => Err(self.invalid("announced")),
        }
    }

    /// Always succeeds; the identity is forgotten.
    pub fn disconnect(&mut self) {
        if self.state != SessionState::Disconnected {
            debug!(from = self.state.name(), "Session disconnected");
        }
        self.state = SessionState::Disconnected;
    }

    fn move_to(&mut self, next: SessionState) -> Result<(), ClientError> {
        debug!(from = self.state.name(), to = next.name(), "Session transition");
        self.state = next;
        Ok(())
    }

    fn invalid(&self, to: &'static str) -> ClientError {
        ClientError::InvalidTransition {
            from: self.state.name(),
            to,
        }
    }
}
