//! Build-system tagging.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use karmagate_core::Nvr;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::CollaboratorError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub nvr: String,
    pub package: String,
}

/// Tag operations must be idempotent: tagging a tagged build and untagging
/// an absent tag both succeed.
#[async_trait]
pub trait BuildTagger: Send + Sync {
    async fn tag_build(&self, tag: &str, nvr: &str) -> Result<(), CollaboratorError>;

    async fn untag_build(&self, tag: &str, nvr: &str) -> Result<(), CollaboratorError>;

    async fn list_tags(&self, nvr: &str) -> Result<Vec<String>, CollaboratorError>;

    async fn list_tagged(
        &self,
        tag: &str,
        latest_only: bool,
    ) -> Result<Vec<BuildInfo>, CollaboratorError>;
}

/// Tagger holding tag membership in memory.
///
/// Used when running without a build system and in tests.
#[derive(Default)]
pub struct InMemoryTagger {
    tags: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl InMemoryTagger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_tagged(&self, tag: &str, nvr: &str) -> bool {
        let tags = self.tags.read().await;
        tags.get(tag).is_some_and(|builds| builds.contains(nvr))
    }
}

#[async_trait]
impl BuildTagger for InMemoryTagger {
    async fn tag_build(&self, tag: &str, nvr: &str) -> Result<(), CollaboratorError> {
        debug!("Tagging {} into {}", nvr, tag);
        let mut tags = self.tags.write().await;
        tags.entry(tag.to_string())
            .or_default()
            .insert(nvr.to_string());
        Ok(())
    }

    async fn untag_build(&self, tag: &str, nvr: &str) -> Result<(), CollaboratorError> {
        debug!("Untagging {} from {}", nvr, tag);
        let mut tags = self.tags.write().await;
        if let Some(builds) = tags.get_mut(tag) {
            builds.remove(nvr);
        }
        Ok(())
    }

    async fn list_tags(&self, nvr: &str) -> Result<Vec<String>, CollaboratorError> {
        let tags = self.tags.read().await;
        let mut found: Vec<String> = tags
            .iter()
            .filter(|(_, builds)| builds.contains(nvr))
            .map(|(tag, _)| tag.clone())
            .collect();
        found.sort();
        Ok(found)
    }

    async fn list_tagged(
        &self,
        tag: &str,
        latest_only: bool,
    ) -> Result<Vec<BuildInfo>, CollaboratorError> {
        let tags = self.tags.read().await;
        let Some(builds) = tags.get(tag) else {
            return Ok(vec![]);
        };

        let mut latest: HashMap<String, Nvr> = HashMap::new();
        let mut all = Vec::new();
        for nvr in builds {
            let parsed = Nvr::parse(nvr)
                .map_err(|e| CollaboratorError::rejected("tagger", e.to_string()))?;
            if latest_only {
                let newer = latest
                    .get(&parsed.name)
                    .map_or(true, |current| parsed.label_compare(current).is_gt());
                if newer {
                    latest.insert(parsed.name.clone(), parsed);
                }
            } else {
                all.push(BuildInfo {
                    nvr: nvr.clone(),
                    package: parsed.name,
                });
            }
        }

        if latest_only {
            all = latest
                .into_values()
                .map(|nvr| BuildInfo {
                    nvr: nvr.to_string(),
                    package: nvr.name,
                })
                .collect();
            all.sort_by(|a, b| a.nvr.cmp(&b.nvr));
        }
        Ok(all)
    }
}
