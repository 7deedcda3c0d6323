//! Password hashing and opaque token generation.

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use rand::Rng;
use sha2::{Digest, Sha256};

use super::AuthError;
use crate::config::AuthConfig;

/// Argon2id hasher with configurable cost.
///
/// Hashing and verification are CPU-bound, so the async entry points run
/// them on the blocking pool.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, AuthError> {
        let params = Params::new(memory_kib, iterations, parallelism, None).map_err(|e| {
            tracing::error!(error = %e, "Invalid Argon2 parameters");
            AuthError::Internal
        })?;
        Ok(Self { params })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        Self::new(
            config.argon2_memory_kib,
            config.argon2_iterations,
            config.argon2_parallelism,
        )
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password into a PHC string
    pub fn hash_blocking(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to hash password");
                AuthError::Internal
            })?;
        Ok(hash.to_string())
    }

    /// Verify a password against a PHC string. Malformed hashes never match.
    pub fn verify_blocking(&self, password: &str, hash: &str) -> bool {
        let parsed_hash = match PasswordHash::new(hash) {
            Ok(h) => h,
            Err(_) => return false,
        };
        self.argon2()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }

    pub async fn hash(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&password)).await?
    }

    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let hasher = self.clone();
        let password = password.to_string();
        let hash = hash.to_string();
        Ok(tokio::task::spawn_blocking(move || hasher.verify_blocking(&password, &hash)).await?)
    }
}

/// Generate a random 256-bit token, hex encoded
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether `token` could have come from `generate_token`.
pub fn is_well_formed_token(token: &str) -> bool {
    token.len() == 64 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> PasswordHasher {
        PasswordHasher::new(64, 1, 1).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = cheap();
        let hash = hasher.hash_blocking("secret1").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("secret1"));
        assert!(hasher.verify_blocking("secret1", &hash));
        assert!(!hasher.verify_blocking("secret2", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let hasher = cheap();
        let a = hasher.hash_blocking("secret1").unwrap();
        let b = hasher.hash_blocking("secret1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!cheap().verify_blocking("secret1", "not-a-phc-string"));
    }

    #[test]
    fn test_default_params_are_accepted() {
        assert!(PasswordHasher::from_config(&AuthConfig::default()).is_ok());
        assert!(PasswordHasher::new(0, 0, 0).is_err());
    }

    #[tokio::test]
    async fn test_async_verify() {
        let hasher = cheap();
        let hash = hasher.hash("secret1").await.unwrap();
        assert!(hasher.verify("secret1", &hash).await.unwrap());
        assert!(!hasher.verify("wrong", &hash).await.unwrap());
    }

    #[test]
    fn test_tokens() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(is_well_formed_token(&a));
        assert!(!is_well_formed_token("short"));
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), a);
        assert_eq!(hash_token(&a).len(), 64);
    }
}
