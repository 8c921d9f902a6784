use super::AUTH_VERSION;
use crate::error::Result;
use crate::models::User;
use crate::storage::{LocalStore, SESSION_KEY};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub auth_version: String,
}

impl Session {
    pub fn new(user: User, now: DateTime<Utc>) -> Self {
        Self {
            user,
            created_at: now,
            last_activity: now,
            auth_version: AUTH_VERSION.to_string(),
        }
    }

    /// Inactive for at least `timeout`
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: ChronoDuration) -> bool {
        now - self.last_activity >= timeout
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
}

/// Session persisted in the local store
#[derive(Debug, Clone)]
pub struct SessionStore {
    store: LocalStore,
    timeout: ChronoDuration,
}

impl SessionStore {
    pub fn new(store: LocalStore, timeout: ChronoDuration) -> Self {
        Self { store, timeout }
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        self.store.set(SESSION_KEY, session)
    }

    /// Load the stored session if it is still usable.
    ///
    /// Sessions from another auth version or past the inactivity timeout are
    /// deleted.
    pub fn restore(&self, now: DateTime<Utc>) -> Option<Session> {
        let session: Session = self.store.get(SESSION_KEY)?;
        if session.auth_version != AUTH_VERSION {
            info!(
                stored = %session.auth_version,
                current = AUTH_VERSION,
                "discarding session from another auth version"
            );
            self.logout();
            return None;
        }
        if session.is_expired(now, self.timeout) {
            info!(user = %session.user.username, "session expired after inactivity");
            self.logout();
            return None;
        }
        Some(session)
    }

    /// Record activity on the stored session; returns the refreshed session
    pub fn touch(&self, now: DateTime<Utc>) -> Result<Option<Session>> {
        match self.restore(now) {
            Some(mut session) => {
                session.touch(now);
                self.save(&session)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    pub fn logout(&self) {
        self.store.delete(SESSION_KEY);
    }
}
