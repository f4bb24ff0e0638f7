//! Obsoletion of older in-flight updates by a newer one.
//!
//! When an update gains builds, older updates of the same packages that
//! have not reached stable are withdrawn if the new update fully covers
//! them. The new update inherits their bugs and notes.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Duration;

use karmagate_core::{Nvr, Update, UpdateRequest, UpdateStatus, UpdateType};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::state_machine::{Caveat, PendingEffects, RequestEvent, TransitionContext};

/// How long to wait for an obsoletion candidate's lock.
const CANDIDATE_LOCK_WAIT: Duration = Duration::from_secs(1);

/// Older updates changed by obsoletion. They must be committed together
/// with the new update, while `guards` are still held.
#[derive(Default)]
pub(crate) struct Obsoletion {
    pub obsoleted: Vec<Update>,
    pub effects: Vec<PendingEffects>,
    pub caveats: Vec<Caveat>,
    pub guards: Vec<OwnedMutexGuard<()>>,
}

/// Whether an update is still in flight and may be withdrawn.
fn in_flight(update: &Update) -> bool {
    if update.locked {
        return false;
    }
    match update.status {
        UpdateStatus::Pending => true,
        UpdateStatus::Testing => {
            matches!(update.request, None | Some(UpdateRequest::Testing))
        }
        _ => false,
    }
}

impl Engine {
    /// Obsolete older updates that `new` supersedes, mutating `new` to
    /// inherit what they carried.
    ///
    /// The caller must hold the lock on `new`.
    pub(crate) async fn resolve_obsoletes(
        &self,
        ctx: &TransitionContext<'_>,
        new: &mut Update,
    ) -> Result<Obsoletion, EngineError> {
        let mut result = Obsoletion::default();
        let mut seen = HashSet::new();
        seen.insert(new.alias.clone());
        let repository = self.store.repository().clone();

        for build in new.builds.clone() {
            let new_nvr = match Nvr::parse(&build.nvr) {
                Ok(nvr) => nvr,
                Err(e) => {
                    warn!("Cannot compare {} for obsoletion: {}", build.nvr, e);
                    continue;
                }
            };

            let candidates = repository
                .updates_for_package(&build.package, &new.release)
                .await?;
            for candidate in candidates {
                if !seen.insert(candidate.alias.clone()) || !in_flight(&candidate) {
                    continue;
                }

                // The caller holds the new update's lock; never wait on a
                // candidate without a bound.
                let Some(guard) = self
                    .store
                    .lock_within(&candidate.alias, CANDIDATE_LOCK_WAIT)
                    .await
                else {
                    warn!(
                        "{} is busy; not checking it for obsoletion by {}",
                        candidate.alias, new.alias
                    );
                    result.caveats.push(Caveat::new(
                        "update",
                        format!(
                            "{} was being modified and was not checked for obsoletion.",
                            candidate.alias
                        ),
                    ));
                    continue;
                };
                // Re-read under the candidate's own lock; it may have moved.
                let Some(old) = repository.get_update(&candidate.alias).await? else {
                    continue;
                };
                if !in_flight(&old) {
                    continue;
                }
                let Some(old_build) = old.builds.iter().find(|b| b.package == build.package)
                else {
                    continue;
                };
                let old_nvr = match Nvr::parse(&old_build.nvr) {
                    Ok(nvr) => nvr,
                    Err(e) => {
                        warn!("Cannot compare {} for obsoletion: {}", old_build.nvr, e);
                        continue;
                    }
                };

                let newer = new_nvr.label_compare(&old_nvr) == Ordering::Greater;
                let new_packages = new.packages();
                let covered = old.packages().is_subset(&new_packages);
                let obsoletable = newer && covered;
                let old_nvr_text = old_build.nvr.clone();

                if old.builds.len() != new.builds.len() && old.submitter != new.submitter {
                    result.caveats.push(Caveat::new(
                        "update",
                        format!(
                            "Please be aware that there is another update in flight owned by {}, \
                             containing {}. Are you coordinating with them?",
                            old.submitter, old_nvr_text
                        ),
                    ));
                }

                if !obsoletable {
                    debug!(
                        "{} does not obsolete {} (newer: {}, covered: {})",
                        build.nvr, old_nvr_text, newer, covered
                    );
                    continue;
                }
                info!("{} is obsoletable by {}", old_nvr_text, build.nvr);

                if old.update_type == UpdateType::Security && new.update_type != UpdateType::Security
                {
                    result.caveats.push(Caveat::new(
                        "update",
                        "Adjusting type of this update to security, since it obsoletes another \
                         security update",
                    ));
                    new.update_type = UpdateType::Security;
                }

                for bug in &old.bugs {
                    if !new.bugs.contains(bug) {
                        new.bugs.push(*bug);
                    }
                }
                new.notes = format!("{}\n\n----\n\n{}", new.notes, old.notes);

                let old_url = self.policy.update_url(&old.alias);
                let mut effects = Vec::new();
                let mut caveats = Vec::new();
                let (old, _) = self.apply(
                    ctx,
                    old,
                    RequestEvent::ObsoletedBy {
                        nvr: build.nvr.clone(),
                        alias: new.alias.clone(),
                    },
                    &mut effects,
                    &mut caveats,
                )?;
                result.caveats.extend(caveats);

                new.add_comment(ctx.system_comment(format!(
                    "This update has obsoleted [{}]({}), and has inherited its bugs and notes.",
                    old_nvr_text, old_url
                )));
                result.caveats.push(Caveat::new(
                    "update",
                    format!(
                        "This update has obsoleted {}, and has inherited its bugs and notes.",
                        old_nvr_text
                    ),
                ));

                result.effects.push(PendingEffects {
                    alias: old.alias.clone(),
                    effects,
                });
                result.obsoleted.push(old);
                result.guards.push(guard);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::harness;
    use crate::state_machine::transition::test_support::{now, release, update};
    use crate::state_machine::UpdateRepository;
    use karmagate_core::{Alias, Build};

    fn build(nvr: &str) -> Build {
        let parsed = Nvr::parse(nvr).unwrap();
        Build {
            nvr: nvr.to_string(),
            package: parsed.name,
            release: "F40".to_string(),
        }
    }

    fn with_builds(alias: &str, nvrs: &[&str], status: UpdateStatus) -> Update {
        let mut u = update(status, None);
        u.alias = Alias::from(alias);
        u.builds = nvrs.iter().map(|n| build(n)).collect();
        u
    }

    #[test]
    fn test_in_flight_filter() {
        assert!(in_flight(&update(UpdateStatus::Pending, Some(UpdateRequest::Testing))));
        assert!(in_flight(&update(UpdateStatus::Testing, None)));
        assert!(in_flight(&update(UpdateStatus::Testing, Some(UpdateRequest::Testing))));
        assert!(!in_flight(&update(UpdateStatus::Testing, Some(UpdateRequest::Stable))));
        assert!(!in_flight(&update(UpdateStatus::Stable, None)));
        let mut locked = update(UpdateStatus::Pending, None);
        locked.locked = true;
        assert!(!in_flight(&locked));
    }

    #[tokio::test]
    async fn test_partial_coverage_is_not_obsoleted() {
        let h = harness().await;
        let old = with_builds(
            "FEDORA-2024-0000000001",
            &["a-1.0-1.fc40", "b-1.0-1.fc40"],
            UpdateStatus::Testing,
        );
        h.repository.commit(std::slice::from_ref(&old)).await.unwrap();

        let mut new = with_builds("FEDORA-2024-0000000002", &["a-2.0-1.fc40"], UpdateStatus::Pending);
        new.submitter = "someone-else".to_string();
        let release = release();
        let ctx = h.engine.context(&release, now());
        let result = h.engine.resolve_obsoletes(&ctx, &mut new).await.unwrap();

        assert!(result.obsoleted.is_empty());
        assert_eq!(result.caveats.len(), 1);
        assert!(result.caveats[0]
            .description
            .starts_with("Please be aware that there is another update in flight owned by maintainer"));
    }

    #[tokio::test]
    async fn test_older_build_is_not_obsoleted_by_older_build() {
        let h = harness().await;
        let old = with_builds("FEDORA-2024-0000000001", &["a-2.0-1.fc40"], UpdateStatus::Testing);
        h.repository.commit(std::slice::from_ref(&old)).await.unwrap();

        let mut new = with_builds("FEDORA-2024-0000000002", &["a-1.9-1.fc40"], UpdateStatus::Pending);
        let release = release();
        let ctx = h.engine.context(&release, now());
        let result = h.engine.resolve_obsoletes(&ctx, &mut new).await.unwrap();
        assert!(result.obsoleted.is_empty());
        assert!(result.caveats.is_empty());
    }

    #[tokio::test]
    async fn test_security_type_is_inherited() {
        let h = harness().await;
        let mut old = with_builds("FEDORA-2024-0000000001", &["a-1.0-1.fc40"], UpdateStatus::Testing);
        old.update_type = UpdateType::Security;
        old.bugs = vec![10];
        old.notes = "old notes".to_string();
        h.repository.commit(std::slice::from_ref(&old)).await.unwrap();

        let mut new = with_builds("FEDORA-2024-0000000002", &["a-1.0-2.fc40"], UpdateStatus::Pending);
        new.bugs = vec![11];
        let release = release();
        let ctx = h.engine.context(&release, now());
        let result = h.engine.resolve_obsoletes(&ctx, &mut new).await.unwrap();

        assert_eq!(result.obsoleted.len(), 1);
        assert_eq!(result.obsoleted[0].status, UpdateStatus::Obsolete);
        assert_eq!(result.guards.len(), 1);
        assert_eq!(new.update_type, UpdateType::Security);
        assert_eq!(new.bugs, vec![11, 10]);
        assert_eq!(new.notes, "Fixes things\n\n----\n\nold notes");
        assert!(result
            .caveats
            .iter()
            .any(|c| c.description.starts_with("Adjusting type of this update to security")));
    }

    #[tokio::test]
    async fn test_busy_candidate_is_skipped_with_caveat() {
        let h = harness().await;
        let old = with_builds("FEDORA-2024-0000000001", &["a-1.0-1.fc40"], UpdateStatus::Testing);
        h.repository.commit(std::slice::from_ref(&old)).await.unwrap();
        let _held = h.engine.store().lock(&old.alias).await;

        let mut new = with_builds("FEDORA-2024-0000000002", &["a-2.0-1.fc40"], UpdateStatus::Pending);
        let release = release();
        let ctx = h.engine.context(&release, now());
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            h.engine.resolve_obsoletes(&ctx, &mut new),
        )
        .await
        .expect("obsoletion waited on a busy update")
        .unwrap();

        assert!(result.obsoleted.is_empty());
        assert_eq!(
            result.caveats[0].description,
            "FEDORA-2024-0000000001 was being modified and was not checked for obsoletion."
        );
        assert_eq!(new.notes, "Fixes things");
    }
}
