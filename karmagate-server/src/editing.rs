//! Creating and editing updates.

use std::collections::BTreeSet;

use chrono::Datelike;
use karmagate_core::{
    Alias, Bug, Build, BuildrootOverride, Nvr, Release, Timestamp, Update, UpdateRequest,
    UpdateSeverity, UpdateStatus, UpdateType,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::engine::{Engine, Outcome};
use crate::error::EngineError;
use crate::state_machine::{update_summary, Caveat, Effect, PendingEffects, RequestEvent};

/// A new update as submitted by a packager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUpdate {
    pub release: String,
    pub builds: Vec<String>,
    pub submitter: String,
    #[serde(default)]
    pub notes: String,
    pub update_type: UpdateType,
    #[serde(default)]
    pub severity: UpdateSeverity,
    #[serde(default)]
    pub bugs: Vec<u64>,
    pub stable_karma: Option<i32>,
    pub unstable_karma: Option<i32>,
    pub stable_days: Option<u32>,
    pub autokarma: bool,
    pub autotime: bool,
    pub close_bugs: bool,
    /// Initial request; `testing` when absent.
    pub request: Option<UpdateRequest>,
}

/// The full desired state of an edited update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEdit {
    pub builds: Vec<String>,
    pub notes: String,
    pub update_type: UpdateType,
    pub severity: UpdateSeverity,
    pub bugs: Vec<u64>,
    pub stable_karma: Option<i32>,
    pub unstable_karma: Option<i32>,
    pub stable_days: Option<u32>,
    pub autokarma: bool,
    pub autotime: bool,
    pub close_bugs: bool,
}

impl UpdateEdit {
    /// An edit that changes nothing.
    pub fn from_update(update: &Update) -> Self {
        Self {
            builds: update.nvrs(),
            notes: update.notes.clone(),
            update_type: update.update_type,
            severity: update.severity,
            bugs: update.bugs.clone(),
            stable_karma: update.stable_karma,
            unstable_karma: update.unstable_karma,
            stable_days: update.stable_days,
            autokarma: update.autokarma,
            autotime: update.autotime,
            close_bugs: update.close_bugs,
        }
    }
}

fn check_severity(update_type: UpdateType, severity: UpdateSeverity) -> Result<(), EngineError> {
    if update_type == UpdateType::Security && severity == UpdateSeverity::Unspecified {
        return Err(EngineError::PolicyViolation(
            "Must specify severity for a security update".to_string(),
        ));
    }
    Ok(())
}

fn parse_builds(release: &Release, nvrs: &[String]) -> Result<Vec<Build>, EngineError> {
    let mut packages = BTreeSet::new();
    let mut builds = Vec::with_capacity(nvrs.len());
    for nvr in nvrs {
        let parsed = Nvr::parse(nvr).map_err(|e| EngineError::Validation(e.to_string()))?;
        if !packages.insert(parsed.name.clone()) {
            return Err(EngineError::Validation(format!(
                "Multiple {} builds specified",
                parsed.name
            )));
        }
        builds.push(Build {
            nvr: nvr.clone(),
            package: parsed.name,
            release: release.name.clone(),
        });
    }
    Ok(builds)
}

fn new_alias(release: &Release, now: Timestamp) -> Alias {
    let suffix = Uuid::new_v4().simple().to_string();
    Alias(format!("{}-{}-{}", release.id_prefix, now.year(), &suffix[..10]))
}

impl Engine {
    /// Builds must not already belong to another update.
    async fn check_unowned(&self, builds: &[Build], owner: Option<&Alias>) -> Result<(), EngineError> {
        for build in builds {
            match self.store.repository().find_build_owner(&build.nvr).await? {
                Some(existing) if Some(&existing) != owner => {
                    return Err(EngineError::Validation(format!(
                        "Update for {} already exists",
                        build.nvr
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Placeholders for bugs not cached yet, and whether any cached bug is
    /// a security bug. Nothing is written.
    async fn stage_bugs(&self, bugs: &[u64]) -> Result<(Vec<Bug>, bool), EngineError> {
        let known = self.store.repository().get_bugs(bugs).await?;
        let unknown = bugs
            .iter()
            .filter(|id| !known.iter().any(|b| b.bug_id == **id))
            .map(|id| Bug::new(*id))
            .collect();
        Ok((unknown, known.iter().any(|b| b.security)))
    }

    /// Write the rows an operation staged. Called once every check that
    /// can refuse the operation has passed.
    async fn write_staged(
        &self,
        bugs: &[Bug],
        overrides: &[BuildrootOverride],
    ) -> Result<(), EngineError> {
        let repository = self.store.repository();
        for bug in bugs {
            repository.put_bug(bug).await?;
        }
        for buildroot_override in overrides {
            repository.put_override(buildroot_override).await?;
        }
        Ok(())
    }

    pub async fn create_update(&self, new: NewUpdate) -> Result<Outcome, EngineError> {
        if new.builds.is_empty() {
            return Err(EngineError::Validation(
                "An update must contain at least one build".to_string(),
            ));
        }
        check_severity(new.update_type, new.severity)?;

        let now = self.now();
        let release = self.store.release(&new.release).await?;
        let builds = parse_builds(&release, &new.builds)?;
        self.check_unowned(&builds, None).await?;

        let alias = loop {
            let candidate = new_alias(&release, now);
            if self.store.repository().get_update(&candidate).await?.is_none() {
                break candidate;
            }
        };
        let guard = self.store.lock(&alias).await;
        let ctx = self.context(&release, now);

        let mut caveats = Vec::new();
        let mut effects: Vec<Effect> = new
            .bugs
            .iter()
            .map(|bug_id| Effect::RefreshBug { bug_id: *bug_id })
            .collect();

        let (unknown_bugs, security_bug) = self.stage_bugs(&new.bugs).await?;
        let critpath = self
            .policy
            .is_critpath(builds.iter().map(|b| b.package.as_str()));

        let mandatory = self.policy.mandatory_days(critpath, &release);
        let mut stable_days = new.stable_days;
        if stable_days.unwrap_or(0) < mandatory {
            stable_days = Some(mandatory);
            caveats.push(Caveat::new(
                "stable days",
                format!(
                    "The number of stable days required was set to the mandatory release value of {} days",
                    mandatory
                ),
            ));
        }

        let update = Update {
            alias: alias.clone(),
            release: release.name.clone(),
            builds,
            submitter: new.submitter.clone(),
            bugs: new.bugs,
            cves: Vec::new(),
            notes: new.notes,
            update_type: if security_bug {
                UpdateType::Security
            } else {
                new.update_type
            },
            severity: new.severity,
            status: UpdateStatus::Pending,
            request: None,
            autokarma: new.autokarma,
            autotime: new.autotime,
            stable_karma: new.stable_karma,
            unstable_karma: new.unstable_karma,
            stable_days,
            critpath,
            locked: false,
            pushed: false,
            close_bugs: new.close_bugs,
            comments: Vec::new(),
            date_submitted: now,
            date_modified: None,
            date_testing: None,
            date_stable: None,
            date_locked: None,
            date_pushed: None,
        };
        info!("Creating update {} for {}", alias, update.title());

        let (mut update, _) = self.apply(
            &ctx,
            update,
            RequestEvent::SetRequest {
                action: new.request.unwrap_or(UpdateRequest::Testing),
                actor: new.submitter,
            },
            &mut effects,
            &mut caveats,
        )?;

        let obsoletion = self.resolve_obsoletes(&ctx, &mut update).await?;
        caveats.extend(obsoletion.caveats);

        self.write_staged(&unknown_bugs, &[]).await?;
        let mut batch = vec![update.clone()];
        batch.extend(obsoletion.obsoleted);
        self.store.commit(&batch).await?;
        drop(obsoletion.guards);
        drop(guard);

        let mut pending = vec![PendingEffects { alias, effects }];
        pending.extend(obsoletion.effects);
        caveats.extend(self.run_effects(pending).await);
        Ok(Outcome { update, caveats })
    }

    pub async fn edit_update(
        &self,
        alias: &Alias,
        edit: UpdateEdit,
        editor: &str,
    ) -> Result<Outcome, EngineError> {
        if edit.builds.is_empty() {
            return Err(EngineError::Validation(
                "An update must contain at least one build".to_string(),
            ));
        }
        check_severity(edit.update_type, edit.severity)?;

        let now = self.now();
        let guard = self.store.lock(alias).await;
        let mut update = self.store.load(alias).await?;
        let release = self.store.release(&update.release).await?;
        let ctx = self.context(&release, now);
        let tags = &release.tags;

        let builds = parse_builds(&release, &edit.builds)?;
        let previous = update.nvrs();
        let added: Vec<String> = edit
            .builds
            .iter()
            .filter(|nvr| !previous.contains(nvr))
            .cloned()
            .collect();
        let removed: Vec<String> = previous
            .iter()
            .filter(|nvr| !edit.builds.contains(nvr))
            .cloned()
            .collect();
        let builds_changed = !added.is_empty() || !removed.is_empty();

        if builds_changed && update.locked {
            return Err(EngineError::LockedUpdate(alias.to_string()));
        }
        self.check_unowned(&builds, Some(alias)).await?;

        let mut caveats = Vec::new();
        let mut effects = Vec::new();
        let mut expired_overrides = Vec::new();

        let mandatory = self.policy.mandatory_days(
            self.policy.is_critpath(builds.iter().map(|b| b.package.as_str())),
            &release,
        );
        let mut stable_days = edit.stable_days;
        if stable_days.unwrap_or(0) < mandatory {
            stable_days = Some(mandatory);
            caveats.push(Caveat::new(
                "stable days",
                format!(
                    "The number of stable days required was raised to the mandatory release value of {} days",
                    mandatory
                ),
            ));
        }

        for nvr in &removed {
            effects.push(Effect::UntagKnown {
                nvr: nvr.clone(),
                tags: vec![
                    tags.pending_signing.clone(),
                    tags.pending_testing.clone(),
                    tags.pending_stable.clone(),
                    tags.testing.clone(),
                ],
            });
            effects.push(Effect::tag(&tags.candidate, nvr));

            if let Some(mut buildroot_override) = self.store.repository().get_override(nvr).await? {
                if !buildroot_override.is_expired() {
                    info!("Expiring buildroot override for {} because the build was removed", nvr);
                    buildroot_override.expired_date = Some(now);
                    effects.push(Effect::untag(&tags.override_tag, nvr));
                    effects.push(Effect::Publish {
                        topic: "buildroot_override.untag".to_string(),
                        payload: json!({ "override": buildroot_override }),
                    });
                    expired_overrides.push(buildroot_override);
                }
            }
        }

        update.builds = builds;
        update.critpath = self
            .policy
            .is_critpath(update.builds.iter().map(|b| b.package.as_str()));

        let mut text = format!("{} edited this update.", editor);
        if !added.is_empty() {
            text.push_str("\n\nNew build(s):\n");
            for nvr in &added {
                text.push_str(&format!("\n- {}", nvr));
            }
        }
        if !removed.is_empty() {
            text.push_str("\n\nRemoved build(s):\n");
            for nvr in &removed {
                text.push_str(&format!("\n- {}", nvr));
            }
        }
        if builds_changed {
            text.push_str("\n\nKarma has been reset.");
        }
        update.add_comment(ctx.system_comment(text.clone()));
        caveats.push(Caveat::new("builds", text));

        if builds_changed {
            if update.status != UpdateStatus::Pending {
                let result = crate::state_machine::transition(
                    &ctx,
                    update,
                    RequestEvent::SetRequest {
                        action: UpdateRequest::Unpush,
                        actor: editor.to_string(),
                    },
                )?
                .into_result()?;
                update = result.update;
                effects.extend(result.effects);
                caveats.push(Caveat::new(
                    "status",
                    "Builds changed.  Your update is being sent back to testing.",
                ));
            }

            for nvr in &added {
                effects.push(Effect::tag(&tags.pending_signing, nvr));
            }

            let (requested, _) = self.apply(
                &ctx,
                update,
                RequestEvent::SetRequest {
                    action: UpdateRequest::Testing,
                    actor: editor.to_string(),
                },
                &mut effects,
                &mut caveats,
            )?;
            update = requested;
        }

        let new_bugs: Vec<u64> = edit
            .bugs
            .iter()
            .filter(|id| !update.bugs.contains(id))
            .copied()
            .collect();
        effects.extend(new_bugs.iter().map(|bug_id| Effect::RefreshBug { bug_id: *bug_id }));
        let (unknown_bugs, security_bug) = self.stage_bugs(&edit.bugs).await?;

        update.notes = edit.notes;
        update.update_type = if security_bug {
            UpdateType::Security
        } else {
            edit.update_type
        };
        update.severity = edit.severity;
        update.bugs = edit.bugs;
        update.stable_karma = edit.stable_karma;
        update.unstable_karma = edit.unstable_karma;
        update.stable_days = stable_days;
        update.autokarma = edit.autokarma;
        update.autotime = edit.autotime;
        update.close_bugs = edit.close_bugs;
        update.date_modified = Some(now);

        effects.push(Effect::Publish {
            topic: "update.edit".to_string(),
            payload: json!({
                "update": update_summary(&update),
                "agent": editor,
                "new_bugs": new_bugs,
            }),
        });

        let obsoletion = if added.is_empty() {
            Default::default()
        } else {
            self.resolve_obsoletes(&ctx, &mut update).await?
        };
        caveats.extend(obsoletion.caveats);

        self.write_staged(&unknown_bugs, &expired_overrides).await?;
        let mut batch = vec![update.clone()];
        batch.extend(obsoletion.obsoleted);
        self.store.commit(&batch).await?;
        drop(obsoletion.guards);
        drop(guard);

        let mut pending = vec![PendingEffects {
            alias: alias.clone(),
            effects,
        }];
        pending.extend(obsoletion.effects);
        caveats.extend(self.run_effects(pending).await);
        Ok(Outcome { update, caveats })
    }
}
