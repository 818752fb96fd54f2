//! Password hashers and random token generation

use crate::config::PasswordConfig;
use crate::traits::Hasher;
use crate::{AuthError, AuthResult};
use rand::{distributions::Alphanumeric, thread_rng, Rng};

#[cfg(feature = "argon2")]
use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2,
};

/// Argon2 password hasher implementation
#[cfg(feature = "argon2")]
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    memory_cost: u32,
    time_cost: u32,
    parallelism: u32,
}

#[cfg(feature = "argon2")]
impl Argon2Hasher {
    /// Create a new Argon2 hasher with custom parameters
    pub fn new(memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            memory_cost,
            time_cost,
            parallelism,
        }
    }

    /// Create an Argon2 hasher optimized for development (faster)
    pub fn development() -> Self {
        Self {
            memory_cost: 4096, // 4 MB
            time_cost: 2,
            parallelism: 2,
        }
    }

    fn argon2(&self) -> AuthResult<Argon2<'static>> {
        let params = argon2::Params::new(self.memory_cost, self.time_cost, self.parallelism, None)
            .map_err(|e| AuthError::crypto_error(e.to_string()))?;

        Ok(Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        ))
    }
}

#[cfg(feature = "argon2")]
impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

#[cfg(feature = "argon2")]
impl Hasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut thread_rng());
        let password_hash = self
            .argon2()?
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| AuthError::crypto_error(e.to_string()))?;

        Ok(password_hash.to_string())
    }

    fn check(&self, plaintext: &str, hash: &str) -> AuthResult<bool> {
        let parsed_hash =
            PasswordHash::new(hash).map_err(|e| AuthError::crypto_error(e.to_string()))?;

        Ok(self
            .argon2()?
            .verify_password(plaintext.as_bytes(), &parsed_hash)
            .is_ok())
    }

    fn hasher_name(&self) -> &str {
        "argon2"
    }
}

/// bcrypt password hasher implementation
#[cfg(feature = "bcrypt")]
#[derive(Debug, Clone)]
pub struct BcryptHasher {
    cost: u32,
}

#[cfg(feature = "bcrypt")]
impl BcryptHasher {
    /// Create a new bcrypt hasher with custom cost
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Create a bcrypt hasher optimized for development (faster)
    pub fn development() -> Self {
        Self { cost: 4 }
    }
}

#[cfg(feature = "bcrypt")]
impl Default for BcryptHasher {
    fn default() -> Self {
        Self {
            cost: bcrypt::DEFAULT_COST,
        }
    }
}

#[cfg(feature = "bcrypt")]
impl Hasher for BcryptHasher {
    fn hash(&self, plaintext: &str) -> AuthResult<String> {
        bcrypt::hash(plaintext, self.cost).map_err(AuthError::from)
    }

    fn check(&self, plaintext: &str, hash: &str) -> AuthResult<bool> {
        bcrypt::verify(plaintext, hash).map_err(AuthError::from)
    }

    fn hasher_name(&self) -> &str {
        "bcrypt"
    }
}

/// Build the hasher named by the password configuration
pub fn hasher_from_config(config: &PasswordConfig) -> AuthResult<Box<dyn Hasher>> {
    match config.hash_algorithm.as_str() {
        #[cfg(feature = "argon2")]
        "argon2" => Ok(Box::new(Argon2Hasher::new(
            config.argon2_memory,
            config.argon2_iterations,
            config.argon2_parallelism,
        ))),
        #[cfg(feature = "bcrypt")]
        "bcrypt" => Ok(Box::new(BcryptHasher::new(config.bcrypt_cost))),
        other => Err(AuthError::config_error(format!(
            "Unknown password hashing algorithm: {} (or feature not enabled)",
            other
        ))),
    }
}

/// Generate a random alphanumeric token of the given length
pub fn generate_token(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "argon2")]
    fn test_argon2_hasher() {
        let hasher = Argon2Hasher::development();
        let password = "test_password_123";

        let hash = hasher.hash(password).unwrap();
        assert!(!hash.is_empty());
        assert_ne!(hash, password);

        assert!(hasher.check(password, &hash).unwrap());
        assert!(!hasher.check("wrong_password", &hash).unwrap());
        assert!(hasher.check(password, "not-a-hash").is_err());
    }

    #[test]
    #[cfg(feature = "bcrypt")]
    fn test_bcrypt_hasher() {
        let hasher = BcryptHasher::development(); // Use low cost for tests
        let password = "test_password_123";

        let hash = hasher.hash(password).unwrap();
        assert_ne!(hash, password);

        assert!(hasher.check(password, &hash).unwrap());
        assert!(!hasher.check("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_hasher_from_config() {
        let mut config = PasswordConfig::default();
        config.hash_algorithm = "bcrypt".to_string();
        config.bcrypt_cost = 4;
        assert_eq!(hasher_from_config(&config).unwrap().hasher_name(), "bcrypt");

        config.hash_algorithm = "argon2".to_string();
        assert_eq!(hasher_from_config(&config).unwrap().hasher_name(), "argon2");

        config.hash_algorithm = "invalid".to_string();
        assert!(hasher_from_config(&config).is_err());
    }

    #[test]
    fn test_token_generation() {
        let token1 = generate_token(32);
        let token2 = generate_token(32);

        assert_eq!(token1.len(), 32);
        assert_ne!(token1, token2);
        assert!(token1.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
