//! Per-update serialization over the repository.
//!
//! The unit of isolation is one update aggregate. Every operation that reads
//! and then writes an update holds that update's lock from the read until
//! the commit, so two comments (or a comment and a request change) on the
//! same update never interleave. Different updates proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use karmagate_core::{Alias, Release, Update};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::debug;

use super::repository::UpdateRepository;
use crate::error::EngineError;

pub struct UpdateStore {
    repository: Arc<dyn UpdateRepository>,
    locks: Mutex<HashMap<Alias, Arc<Mutex<()>>>>,
}

impl UpdateStore {
    pub fn new(repository: Arc<dyn UpdateRepository>) -> Self {
        Self {
            repository,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn UpdateRepository> {
        &self.repository
    }

    /// Acquire the exclusive lock for one update.
    ///
    /// Never call this for a second update while holding one; use
    /// `lock_within` so that crossing operations cannot wait on each other
    /// forever.
    pub async fn lock(&self, alias: &Alias) -> OwnedMutexGuard<()> {
        let lock = self.lock_handle(alias).await;
        debug!("Waiting for lock on {}", alias);
        lock.lock_owned().await
    }

    /// Acquire the lock for one update, giving up after `wait`.
    pub async fn lock_within(&self, alias: &Alias, wait: Duration) -> Option<OwnedMutexGuard<()>> {
        let lock = self.lock_handle(alias).await;
        match timeout(wait, lock.lock_owned()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                debug!("Gave up waiting for lock on {}", alias);
                None
            }
        }
    }

    async fn lock_handle(&self, alias: &Alias) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // A handle only the map refers to has no holder and no waiter.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(alias.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    async fn tracked_locks(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn load(&self, alias: &Alias) -> Result<Update, EngineError> {
        self.repository
            .get_update(alias)
            .await?
            .ok_or_else(|| EngineError::not_found("update", alias.as_str()))
    }

    pub async fn release(&self, name: &str) -> Result<Release, EngineError> {
        self.repository
            .get_release(name)
            .await?
            .ok_or_else(|| EngineError::not_found("release", name))
    }

    pub async fn commit(&self, updates: &[Update]) -> Result<(), EngineError> {
        self.repository.commit(updates).await?;
        Ok(())
    }
}
