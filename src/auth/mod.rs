pub mod password;
pub mod session;

pub use password::{hash_password, hash_password_with_cost, verify_password};
pub use session::{Session, SessionStore};

use crate::models::{Role, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Stored sessions written under another version are discarded on load
pub const AUTH_VERSION: &str = "2";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("password hash error: {0}")]
    Hash(String),
}

/// One entry of the static user table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    /// bcrypt hash
    pub password_hash: String,
    pub role: Role,
    pub customer_id: String,
}

#[derive(Debug, Clone)]
pub struct Authenticator {
    users: Vec<UserConfig>,
    /// Checked for unknown usernames so they cost as much as a wrong password
    dummy_hash: Option<String>,
}

/// Work factor encoded in a bcrypt hash (`$2b$12$...`)
fn bcrypt_cost(hash: &str) -> Option<u32> {
    hash.split('$').nth(2)?.parse().ok()
}

impl Authenticator {
    pub fn new(users: Vec<UserConfig>) -> Self {
        let dummy_hash = users.first().and_then(|u| {
            let cost = bcrypt_cost(&u.password_hash).unwrap_or(bcrypt::DEFAULT_COST);
            match hash_password_with_cost("unknown-user", cost) {
                Ok(hash) => Some(hash),
                Err(e) => {
                    warn!(error = %e, "could not prepare dummy password hash");
                    None
                }
            }
        });
        Self { users, dummy_hash }
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Check credentials against the user table and open a session.
    pub fn login(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let username = username.trim();
        let Some(entry) = self.users.iter().find(|u| u.username == username) else {
            if let Some(hash) = &self.dummy_hash {
                let _ = verify_password(password, hash);
            }
            return Err(AuthError::InvalidCredentials);
        };

        match verify_password(password, &entry.password_hash) {
            Ok(true) => {
                info!(user = %entry.username, role = ?entry.role, "login succeeded");
                Ok(Session::new(
                    User {
                        username: entry.username.clone(),
                        role: entry.role,
                        customer_id: entry.customer_id.clone(),
                    },
                    now,
                ))
            }
            Ok(false) => Err(AuthError::InvalidCredentials),
            Err(e) => {
                warn!(user = %entry.username, error = %e, "stored password hash is unusable");
                Err(e)
            }
        }
    }
}
