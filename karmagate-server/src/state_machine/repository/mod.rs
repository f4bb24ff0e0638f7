//! Repository abstraction for update persistence.
//!
//! This module defines the `UpdateRepository` trait that abstracts storage
//! of update aggregates and the reference data they point at. Entities are
//! loaded explicitly by key; nothing is fetched lazily.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use karmagate_core::{Alias, Bug, BuildrootOverride, Release, Update, UpdateStatus};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage { operation: String, message: String },

    #[error("corrupt {0} in storage")]
    Corruption(String),
}

impl RepositoryError {
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption(what.into())
    }
}

/// Storage for updates, releases, cached bug facts and buildroot overrides.
///
/// `commit` must be atomic across the updates it is given: either all of
/// them are written or none.
#[async_trait]
pub trait UpdateRepository: Send + Sync {
    async fn get_update(&self, alias: &Alias) -> Result<Option<Update>, RepositoryError>;

    /// Upsert several updates in one transaction.
    async fn commit(&self, updates: &[Update]) -> Result<(), RepositoryError>;

    /// Alias of the update currently owning the build, if any.
    async fn find_build_owner(&self, nvr: &str) -> Result<Option<Alias>, RepositoryError>;

    /// Updates of `release` with a build of `package`.
    async fn updates_for_package(
        &self,
        package: &str,
        release: &str,
    ) -> Result<Vec<Update>, RepositoryError>;

    async fn updates_with_status(
        &self,
        status: UpdateStatus,
    ) -> Result<Vec<Update>, RepositoryError>;

    async fn get_release(&self, name: &str) -> Result<Option<Release>, RepositoryError>;

    async fn put_release(&self, release: &Release) -> Result<(), RepositoryError>;

    /// Cached facts for the given bugs. Unknown ids are omitted.
    async fn get_bugs(&self, ids: &[u64]) -> Result<Vec<Bug>, RepositoryError>;

    async fn put_bug(&self, bug: &Bug) -> Result<(), RepositoryError>;

    async fn get_override(&self, nvr: &str) -> Result<Option<BuildrootOverride>, RepositoryError>;

    async fn put_override(&self, buildroot_override: &BuildrootOverride)
        -> Result<(), RepositoryError>;
}
