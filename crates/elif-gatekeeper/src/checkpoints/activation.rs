//! Rejects principals without a completed activation

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::Checkpoint;
use crate::traits::{ActivationStore, Principal};
use crate::{AuthError, AuthResult};

pub struct ActivationCheckpoint<P: Principal> {
    activations: Arc<dyn ActivationStore<P>>,
}

impl<P: Principal> ActivationCheckpoint<P> {
    pub fn new(activations: Arc<dyn ActivationStore<P>>) -> Self {
        Self { activations }
    }

    async fn check_activation(&self, principal: &P) -> AuthResult<bool> {
        if self.activations.is_completed(principal).await? {
            return Ok(true);
        }

        debug!("Principal {} has not completed activation", principal.id());
        Err(AuthError::NotActivated {
            user_id: principal.id().to_string(),
            login: principal.login().to_string(),
        })
    }
}

impl<P: Principal> std::fmt::Debug for ActivationCheckpoint<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationCheckpoint").finish_non_exhaustive()
    }
}

#[async_trait]
impl<P: Principal> Checkpoint<P> for ActivationCheckpoint<P> {
    async fn login(&self, principal: &P) -> AuthResult<bool> {
        self.check_activation(principal).await
    }

    async fn check(&self, principal: &P) -> AuthResult<bool> {
        self.check_activation(principal).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryActivationStore;
    use crate::models::User;

    #[tokio::test]
    async fn test_pending_activation_is_rejected() {
        let store = Arc::new(InMemoryActivationStore::new());
        let checkpoint = ActivationCheckpoint::<User>::new(store.clone());
        let user = User::new("1", "jane@example.com", "");

        let err = checkpoint.login(&user).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::NotActivated { ref user_id, ref login }
                if user_id == "1" && login == "jane@example.com"
        ));
        assert!(checkpoint.check(&user).await.is_err());

        let activation = store.create(&user).await.unwrap();
        store.complete(&user, &activation.code).await.unwrap();

        assert!(checkpoint.login(&user).await.unwrap());
        assert!(checkpoint.check(&user).await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_is_a_no_op() {
        let checkpoint = ActivationCheckpoint::<User>::new(Arc::new(InMemoryActivationStore::new()));
        assert!(checkpoint.fail(None).await.unwrap());
    }
}
