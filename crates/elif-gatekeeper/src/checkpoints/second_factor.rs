//! Requires an externally verified second factor on login

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::Checkpoint;
use crate::traits::{Principal, SecondFactorVerifier};
use crate::{AuthError, AuthResult};

/// Delegates to a [`SecondFactorVerifier`] (TOTP, WebAuthn, ...)
///
/// Only logins are gated. Sessions persisted after a verified login pass
/// their checks.
pub struct SecondFactorCheckpoint<P: Principal> {
    verifier: Arc<dyn SecondFactorVerifier<P>>,
}

impl<P: Principal> SecondFactorCheckpoint<P> {
    pub fn new(verifier: Arc<dyn SecondFactorVerifier<P>>) -> Self {
        Self { verifier }
    }
}

impl<P: Principal> std::fmt::Debug for SecondFactorCheckpoint<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondFactorCheckpoint").finish_non_exhaustive()
    }
}

#[async_trait]
impl<P: Principal> Checkpoint<P> for SecondFactorCheckpoint<P> {
    async fn login(&self, principal: &P) -> AuthResult<bool> {
        if self.verifier.is_satisfied(principal).await? {
            return Ok(true);
        }

        debug!("Second factor pending for principal {}", principal.id());
        Err(AuthError::SecondFactorRequired {
            user_id: principal.id().to_string(),
        })
    }

    async fn check(&self, _principal: &P) -> AuthResult<bool> {
        Ok(true)
    }
}
