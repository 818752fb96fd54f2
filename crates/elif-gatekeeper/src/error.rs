//! Authentication decision errors
//!
//! Ordinary "access denied" outcomes are plain `false`/`None` values. The
//! variants here are reserved for denials that carry structured context
//! (why, and for how long) and for collaborator or usage failures.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Throttling bucket a failed attempt is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleScope {
    /// Every failed attempt, site-wide
    Global,
    /// Failed attempts from one client address
    Ip,
    /// Failed attempts against one account
    User,
}

impl ThrottleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleScope::Global => "global",
            ThrottleScope::Ip => "ip",
            ThrottleScope::User => "user",
        }
    }
}

impl fmt::Display for ThrottleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication and authorization errors
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthError {
    /// The principal has not completed activation
    #[error("Your account has not been activated yet")]
    NotActivated { user_id: String, login: String },

    /// Too many failed attempts in the given scope
    #[error("{}", throttle_message(*scope, *delay))]
    Throttled { scope: ThrottleScope, delay: u64 },

    /// A second authentication factor must be verified first
    #[error("A second authentication factor is required")]
    SecondFactorRequired { user_id: String },

    /// Caller misused the API (malformed credentials, unknown checkpoint key...)
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A repository collaborator failed
    #[error("Store error: {message}")]
    Store { message: String },

    /// Cryptographic errors
    #[error("Cryptographic error: {message}")]
    Crypto { message: String },

    /// Configuration errors
    #[error("Authentication configuration error: {message}")]
    Configuration { message: String },
}

fn throttle_message(scope: ThrottleScope, delay: u64) -> String {
    match scope {
        ThrottleScope::Global => format!(
            "Too many unsuccessful attempts have been made globally, logins are locked for another [{}] second(s)",
            delay
        ),
        ThrottleScope::Ip => format!(
            "Suspicious activity has occurred on your IP address and you have been denied access for another [{}] second(s)",
            delay
        ),
        ThrottleScope::User => format!(
            "Too many unsuccessful login attempts have been made against your account. Please try again after another [{}] second(s)",
            delay
        ),
    }
}

impl AuthError {
    /// Get the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::NotActivated { .. } => "NOT_ACTIVATED",
            AuthError::Throttled { .. } => "THROTTLED",
            AuthError::SecondFactorRequired { .. } => "SECOND_FACTOR_REQUIRED",
            AuthError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            AuthError::Store { .. } => "STORE_ERROR",
            AuthError::Crypto { .. } => "CRYPTOGRAPHIC_ERROR",
            AuthError::Configuration { .. } => "CONFIGURATION_ERROR",
        }
    }

    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::NotActivated { .. } => 403,
            AuthError::Throttled { .. } => 429, // Too Many Requests
            AuthError::SecondFactorRequired { .. } => 202, // Accepted, but a second factor is needed
            AuthError::InvalidArgument { .. } => 400,
            AuthError::Store { .. } => 500,
            AuthError::Crypto { .. } => 500,
            AuthError::Configuration { .. } => 500,
        }
    }

    /// Whether this is a structured denial rather than a failure
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            AuthError::NotActivated { .. }
                | AuthError::Throttled { .. }
                | AuthError::SecondFactorRequired { .. }
        )
    }

    /// Remaining delay for throttling denials
    pub fn delay(&self) -> Option<u64> {
        match self {
            AuthError::Throttled { delay, .. } => Some(*delay),
            _ => None,
        }
    }

    /// Point in time a throttled caller may retry
    pub fn free_at(&self) -> Option<DateTime<Utc>> {
        self.delay()
            .map(|delay| Utc::now() + Duration::seconds(i64::try_from(delay).unwrap_or(i64::MAX)))
    }

    /// Create a throttling denial
    pub fn throttled(scope: ThrottleScope, delay: u64) -> Self {
        Self::Throttled { scope, delay }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Create a store error
    pub fn store_error(message: impl Into<String>) -> Self {
        Self::Store { message: message.into() }
    }

    /// Create a cryptographic error
    pub fn crypto_error(message: impl Into<String>) -> Self {
        Self::Crypto { message: message.into() }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}

#[cfg(feature = "argon2")]
impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        Self::crypto_error(err.to_string())
    }
}

#[cfg(feature = "bcrypt")]
impl From<bcrypt::BcryptError> for AuthError {
    fn from(err: bcrypt::BcryptError) -> Self {
        Self::crypto_error(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::config_error(err.to_string())
    }
}

impl From<serde_yaml::Error> for AuthError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::config_error(err.to_string())
    }
}
