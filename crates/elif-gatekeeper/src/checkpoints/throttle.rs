//! Delays logins after repeated failed attempts

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::Checkpoint;
use crate::throttle::ThrottleLedger;
use crate::traits::Principal;
use crate::{AuthError, AuthResult, ThrottleScope};

/// Throttling gate bound to the client address of the current request
#[derive(Debug, Clone)]
pub struct ThrottleCheckpoint {
    ledger: Arc<ThrottleLedger>,
    ip: Option<String>,
}

impl ThrottleCheckpoint {
    pub fn new(ledger: Arc<ThrottleLedger>, ip: Option<String>) -> Self {
        Self { ledger, ip }
    }

    pub fn ledger(&self) -> &Arc<ThrottleLedger> {
        &self.ledger
    }

    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    /// Global, then address, then account. The first non-zero delay wins.
    async fn check_login_delays<P: Principal>(&self, principal: Option<&P>) -> AuthResult<()> {
        let delay = self.ledger.global_delay().await?;
        if delay > 0 {
            return Err(throttled(ThrottleScope::Global, delay));
        }

        self.check_ip_delay().await?;

        if let Some(principal) = principal {
            let delay = self.ledger.user_delay(principal).await?;
            if delay > 0 {
                return Err(throttled(ThrottleScope::User, delay));
            }
        }

        Ok(())
    }

    async fn check_ip_delay(&self) -> AuthResult<()> {
        if let Some(ip) = &self.ip {
            let delay = self.ledger.ip_delay(ip).await?;
            if delay > 0 {
                return Err(throttled(ThrottleScope::Ip, delay));
            }
        }
        Ok(())
    }
}

fn throttled(scope: ThrottleScope, delay: u64) -> AuthError {
    warn!("Throttling {} logins for {}s", scope, delay);
    AuthError::throttled(scope, delay)
}

#[async_trait]
impl<P: Principal> Checkpoint<P> for ThrottleCheckpoint {
    async fn login(&self, principal: &P) -> AuthResult<bool> {
        self.check_login_delays(Some(principal)).await?;
        Ok(true)
    }

    /// Only the address delay applies: global and account delays must not
    /// lock out a session that is already authenticated.
    async fn check(&self, _principal: &P) -> AuthResult<bool> {
        self.check_ip_delay().await?;
        Ok(true)
    }

    /// A blocked client cannot register further attempts while blocked.
    async fn fail(&self, principal: Option<&P>) -> AuthResult<bool> {
        self.check_login_delays(principal).await?;
        self.ledger.log(self.ip.as_deref(), principal).await?;
        Ok(true)
    }
}
