use crate::core::traits::SessionSource;
use std::sync::{PoisonError, RwLock};

/// Outcome of a session assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Assigned,
    /// The same id was already held
    Unchanged,
    /// A different id is held; the assignment was ignored
    Conflict { current: String },
}

/// Server-issued session id of the live connection
///
/// Written only by the connection. Everyone else sees it through
/// `SessionSource`.
#[derive(Debug, Default)]
pub struct SessionState {
    current: RwLock<Option<String>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn assign(&self, session_id: &str) -> SessionUpdate {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match current.as_deref() {
            None => {
                *current = Some(session_id.to_string());
                SessionUpdate::Assigned
            }
            Some(held) if held == session_id => SessionUpdate::Unchanged,
            Some(held) => SessionUpdate::Conflict {
                current: held.to_string(),
            },
        }
    }

    /// Drop the session, returning the id that was held
    pub(crate) fn clear(&self) -> Option<String> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl SessionSource for SessionState {
    fn current_session(&self) -> Option<String> {
        self.get()
    }
}
