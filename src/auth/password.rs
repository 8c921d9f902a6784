//! bcrypt hashing for the configured user table.

use super::AuthError;
use bcrypt::DEFAULT_COST;

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    hash_password_with_cost(password, DEFAULT_COST)
}

/// Hash with an explicit cost; low costs keep tests fast
pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost).map_err(|e| AuthError::Hash(e.to_string()))
}

/// Ok(false) on mismatch; Err only when `hash` is not a usable bcrypt hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::Hash(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_password() {
        let hash = hash_password_with_cost("installer-2024", 4).unwrap();

        assert!(hash.starts_with("$2"));
        assert!(verify_password("installer-2024", &hash).unwrap());
        assert!(!verify_password("installer-2025", &hash).unwrap());
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        assert!(matches!(
            verify_password("anything", "not-a-bcrypt-hash"),
            Err(AuthError::Hash(_))
        ));
    }
}
