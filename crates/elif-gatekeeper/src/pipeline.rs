//! Ordered, named checkpoint registry with halt-on-failure evaluation

use futures::future::{BoxFuture, FutureExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::debug;

use crate::checkpoints::{Checkpoint, CheckpointEvent};
use crate::traits::Principal;
use crate::{AuthError, AuthResult};

/// Checkpoints keyed by name, evaluated in registration order
pub struct CheckpointPipeline<P: Principal> {
    checkpoints: Vec<(String, Arc<dyn Checkpoint<P>>)>,
    enabled: bool,
}

impl<P: Principal> Default for CheckpointPipeline<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Principal> Clone for CheckpointPipeline<P> {
    fn clone(&self) -> Self {
        Self {
            checkpoints: self.checkpoints.clone(),
            enabled: self.enabled,
        }
    }
}

impl<P: Principal> std::fmt::Debug for CheckpointPipeline<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointPipeline")
            .field("checkpoints", &self.keys())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl<P: Principal> CheckpointPipeline<P> {
    pub fn new() -> Self {
        Self {
            checkpoints: Vec::new(),
            enabled: true,
        }
    }

    /// Register a checkpoint. Replacing an existing key keeps its position.
    pub fn add_checkpoint(&mut self, key: impl Into<String>, checkpoint: Arc<dyn Checkpoint<P>>) {
        let key = key.into();
        match self.checkpoints.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = checkpoint,
            None => self.checkpoints.push((key, checkpoint)),
        }
    }

    /// Builder-style [`CheckpointPipeline::add_checkpoint`]
    pub fn with_checkpoint(mut self, key: impl Into<String>, checkpoint: Arc<dyn Checkpoint<P>>) -> Self {
        self.add_checkpoint(key, checkpoint);
        self
    }

    pub fn remove_checkpoint(&mut self, key: &str) -> Option<Arc<dyn Checkpoint<P>>> {
        let pos = self.checkpoints.iter().position(|(k, _)| k == key)?;
        Some(self.checkpoints.remove(pos).1)
    }

    pub fn remove_checkpoints<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.remove_checkpoint(key.as_ref());
        }
    }

    pub fn get_checkpoint(&self, key: &str) -> Option<Arc<dyn Checkpoint<P>>> {
        self.checkpoints
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, checkpoint)| checkpoint.clone())
    }

    pub fn has_checkpoint(&self, key: &str) -> bool {
        self.checkpoints.iter().any(|(k, _)| k == key)
    }

    /// Registered keys in evaluation order
    pub fn keys(&self) -> Vec<&str> {
        self.checkpoints.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run `event` on every checkpoint in order
    ///
    /// Errors raised by a checkpoint propagate immediately. A `false` result
    /// stops the cycle only when `halt_on_false` is set. A disabled pipeline
    /// always succeeds.
    pub async fn cycle(&self, event: CheckpointEvent, principal: Option<&P>, halt_on_false: bool) -> AuthResult<bool> {
        if !self.enabled {
            return Ok(true);
        }

        for (key, checkpoint) in &self.checkpoints {
            let passed = match (event, principal) {
                (CheckpointEvent::Login, Some(principal)) => checkpoint.login(principal).await?,
                (CheckpointEvent::Check, Some(principal)) => checkpoint.check(principal).await?,
                (CheckpointEvent::Fail, principal) => checkpoint.fail(principal).await?,
                (event, None) => {
                    return Err(AuthError::invalid_argument(format!(
                        "Checkpoint event [{}] requires a principal",
                        event
                    )))
                }
            };

            if !passed && halt_on_false {
                debug!("Checkpoint [{}] denied the {} event", key, event);
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Gate a login attempt
    pub async fn login(&self, principal: &P) -> AuthResult<bool> {
        self.cycle(CheckpointEvent::Login, Some(principal), true).await
    }

    /// Gate a session check
    pub async fn check(&self, principal: &P) -> AuthResult<bool> {
        self.cycle(CheckpointEvent::Check, Some(principal), true).await
    }

    /// Let every checkpoint observe a failed attempt
    pub async fn fail(&self, principal: Option<&P>) -> AuthResult<bool> {
        self.cycle(CheckpointEvent::Fail, principal, false).await
    }

    /// Run `callback` with the given checkpoints removed, or all of them when
    /// `keys` is empty
    ///
    /// The registry is restored afterwards, whether the callback succeeds,
    /// fails or panics.
    pub async fn bypass<T, F>(&mut self, keys: &[&str], callback: F) -> AuthResult<T>
    where
        F: for<'a> FnOnce(&'a Self) -> BoxFuture<'a, AuthResult<T>>,
    {
        let suspended = self.suspend(keys)?;

        let this = &*self;
        let result = AssertUnwindSafe(async move { callback(this).await })
            .catch_unwind()
            .await;

        self.restore(suspended);

        match result {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Remove checkpoints for a bypass, returning the full registry to
    /// restore. Unknown keys fail before anything is removed.
    pub(crate) fn suspend(&mut self, keys: &[&str]) -> AuthResult<Vec<(String, Arc<dyn Checkpoint<P>>)>> {
        if let Some(unknown) = keys.iter().find(|key| !self.has_checkpoint(key)) {
            return Err(AuthError::invalid_argument(format!(
                "No checkpoint is registered under [{}]",
                unknown
            )));
        }

        let snapshot = self.checkpoints.clone();
        if keys.is_empty() {
            self.checkpoints.clear();
        } else {
            self.checkpoints.retain(|(k, _)| !keys.contains(&k.as_str()));
        }

        debug!("Bypassing checkpoints, {} left active", self.checkpoints.len());
        Ok(snapshot)
    }

    pub(crate) fn restore(&mut self, snapshot: Vec<(String, Arc<dyn Checkpoint<P>>)>) {
        self.checkpoints = snapshot;
    }
}
