use argon2::{Argon2, PasswordHash, PasswordVerifier};

/// Validates the token presented by an admin-channel client.
pub trait Authentication: Send + Sync {
    fn authenticate(&self, token: &str) -> bool;
}

/// Compares the token against a shared secret.
pub struct Secret {
    secret: String,
}

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl Authentication for Secret {
    fn authenticate(&self, token: &str) -> bool {
        self.secret.eq_ignore_ascii_case(token)
    }
}

/// Verifies the token against an Argon2 hash, so the secret itself never
/// lives in the proxy's configuration.
pub struct HashedSecret {
    hash: String,
}

impl HashedSecret {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
}

impl Authentication for HashedSecret {
    fn authenticate(&self, token: &str) -> bool {
        let Ok(hash) = PasswordHash::new(&self.hash) else {
            tracing::error!("configured authentication hash is not a valid Argon2 hash");
            return false;
        };
        Argon2::default()
            .verify_password(token.as_bytes(), &hash)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_compares_case_insensitively() {
        let auth = Secret::new("hunter2");
        assert!(auth.authenticate("hunter2"));
        assert!(auth.authenticate("HUNTER2"));
        assert!(!auth.authenticate("hunter3"));
    }

    #[test]
    fn invalid_hash_rejects_everything() {
        let auth = HashedSecret::new("not-a-hash");
        assert!(!auth.authenticate("anything"));
    }
}
