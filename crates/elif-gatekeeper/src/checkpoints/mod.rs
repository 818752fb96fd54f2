//! Checkpoints: pluggable gates evaluated during login, session checks and
//! failed attempts
//!
//! This module contains the built-in checkpoints:
//! - Activation checkpoint
//! - Throttle checkpoint
//! - Second factor checkpoint

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::traits::Principal;
use crate::AuthResult;

pub mod activation;
pub mod second_factor;
pub mod throttle;

// Re-exports for convenience
pub use activation::*;
pub use second_factor::*;
pub use throttle::*;

/// The checkpoint method a pipeline cycle invokes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointEvent {
    /// A login attempt with a resolved principal
    Login,
    /// A session check for an already persisted login
    Check,
    /// A failed attempt, observed by every checkpoint
    Fail,
}

impl CheckpointEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointEvent::Login => "login",
            CheckpointEvent::Check => "check",
            CheckpointEvent::Fail => "fail",
        }
    }

    /// Whether a `false` result stops the cycle
    pub fn halts_on_false(&self) -> bool {
        !matches!(self, CheckpointEvent::Fail)
    }
}

impl fmt::Display for CheckpointEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single pass/fail gate
///
/// Returning `Ok(false)` from [`Checkpoint::login`] or [`Checkpoint::check`]
/// denies the attempt. A checkpoint that wants to surface a reason raises a
/// typed [`crate::AuthError`] instead.
#[async_trait]
pub trait Checkpoint<P: Principal>: Send + Sync {
    /// Gate a login attempt
    async fn login(&self, principal: &P) -> AuthResult<bool>;

    /// Gate a session check
    async fn check(&self, principal: &P) -> AuthResult<bool>;

    /// Observe a failed attempt. The result never blocks.
    async fn fail(&self, _principal: Option<&P>) -> AuthResult<bool> {
        Ok(true)
    }
}
