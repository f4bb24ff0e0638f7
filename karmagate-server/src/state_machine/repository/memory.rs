//! In-memory implementation of `UpdateRepository`.
//!
//! All state is held in memory and lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use karmagate_core::{Alias, Bug, BuildrootOverride, Release, Update, UpdateStatus};
use tokio::sync::RwLock;

use super::{RepositoryError, UpdateRepository};

#[derive(Default)]
pub struct InMemoryRepository {
    updates: RwLock<HashMap<Alias, Update>>,
    releases: RwLock<HashMap<String, Release>>,
    bugs: RwLock<HashMap<u64, Bug>>,
    overrides: RwLock<HashMap<String, BuildrootOverride>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UpdateRepository for InMemoryRepository {
    async fn get_update(&self, alias: &Alias) -> Result<Option<Update>, RepositoryError> {
        let updates = self.updates.read().await;
        Ok(updates.get(alias).cloned())
    }

    async fn commit(&self, batch: &[Update]) -> Result<(), RepositoryError> {
        let mut updates = self.updates.write().await;
        for update in batch {
            updates.insert(update.alias.clone(), update.clone());
        }
        Ok(())
    }

    async fn find_build_owner(&self, nvr: &str) -> Result<Option<Alias>, RepositoryError> {
        let updates = self.updates.read().await;
        Ok(updates
            .values()
            .find(|u| u.builds.iter().any(|b| b.nvr == nvr))
            .map(|u| u.alias.clone()))
    }

    async fn updates_for_package(
        &self,
        package: &str,
        release: &str,
    ) -> Result<Vec<Update>, RepositoryError> {
        let updates = self.updates.read().await;
        let mut found: Vec<Update> = updates
            .values()
            .filter(|u| u.release == release && u.builds.iter().any(|b| b.package == package))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(found)
    }

    async fn updates_with_status(
        &self,
        status: UpdateStatus,
    ) -> Result<Vec<Update>, RepositoryError> {
        let updates = self.updates.read().await;
        let mut found: Vec<Update> = updates
            .values()
            .filter(|u| u.status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(found)
    }

    async fn get_release(&self, name: &str) -> Result<Option<Release>, RepositoryError> {
        let releases = self.releases.read().await;
        Ok(releases.get(name).cloned())
    }

    async fn put_release(&self, release: &Release) -> Result<(), RepositoryError> {
        let mut releases = self.releases.write().await;
        releases.insert(release.name.clone(), release.clone());
        Ok(())
    }

    async fn get_bugs(&self, ids: &[u64]) -> Result<Vec<Bug>, RepositoryError> {
        let bugs = self.bugs.read().await;
        Ok(ids.iter().filter_map(|id| bugs.get(id).cloned()).collect())
    }

    async fn put_bug(&self, bug: &Bug) -> Result<(), RepositoryError> {
        let mut bugs = self.bugs.write().await;
        bugs.insert(bug.bug_id, bug.clone());
        Ok(())
    }

    async fn get_override(&self, nvr: &str) -> Result<Option<BuildrootOverride>, RepositoryError> {
        let overrides = self.overrides.read().await;
        Ok(overrides.get(nvr).cloned())
    }

    async fn put_override(
        &self,
        buildroot_override: &BuildrootOverride,
    ) -> Result<(), RepositoryError> {
        let mut overrides = self.overrides.write().await;
        overrides.insert(buildroot_override.nvr.clone(), buildroot_override.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::transition::test_support::{release, update};
    use karmagate_core::UpdateRequest;

    #[tokio::test]
    async fn test_commit_then_get() {
        let repo = InMemoryRepository::new();
        let update = update(UpdateStatus::Pending, Some(UpdateRequest::Testing));
        repo.commit(std::slice::from_ref(&update)).await.unwrap();
        assert_eq!(repo.get_update(&update.alias).await.unwrap(), Some(update));
    }

    #[tokio::test]
    async fn test_build_owner_and_package_lookup() {
        let repo = InMemoryRepository::new();
        let update = update(UpdateStatus::Testing, None);
        repo.commit(std::slice::from_ref(&update)).await.unwrap();

        assert_eq!(
            repo.find_build_owner("pkg-1.0-1.fc40").await.unwrap(),
            Some(update.alias.clone())
        );
        assert_eq!(repo.find_build_owner("pkg-9-9").await.unwrap(), None);
        assert_eq!(repo.updates_for_package("pkg", "F40").await.unwrap().len(), 1);
        assert!(repo.updates_for_package("pkg", "F39").await.unwrap().is_empty());
        assert_eq!(
            repo.updates_with_status(UpdateStatus::Testing).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_reference_data() {
        let repo = InMemoryRepository::new();
        repo.put_release(&release()).await.unwrap();
        assert_eq!(repo.get_release("F40").await.unwrap(), Some(release()));

        repo.put_bug(&Bug::new(3)).await.unwrap();
        assert_eq!(repo.get_bugs(&[3, 4]).await.unwrap(), vec![Bug::new(3)]);
    }
}
