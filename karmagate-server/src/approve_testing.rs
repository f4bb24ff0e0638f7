//! Periodic sweep over updates in testing.
//!
//! Updates that have met their testing requirements get a one-time comment
//! telling the maintainer they may push to stable. Updates with autotime
//! enabled that have spent their stable days in testing are pushed
//! directly instead.

use std::time::Duration;

use karmagate_core::{Alias, ThresholdEvaluator, UpdateRequest, UpdateStatus};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::state_machine::{Caveat, Effect, PendingEffects, RequestEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    /// Updates that received the stable eligibility comment.
    pub approved: usize,
    /// Updates requested for stable by autotime.
    pub pushed: usize,
    pub failed: usize,
    /// Refused pushes and failed effects of updates that were processed.
    pub caveats: usize,
}

enum Approval {
    Skipped,
    Approved,
    Pushed,
}

pub async fn approve_testing_loop(engine: Engine, period: Duration) {
    let mut interval = interval(period);

    loop {
        interval.tick().await;

        match engine.approve_testing().await {
            Ok(report) => info!(
                "Approve-testing sweep examined {} updates: {} approved, {} pushed, {} failed, {} caveats",
                report.examined, report.approved, report.pushed, report.failed, report.caveats
            ),
            Err(e) => error!("Error approving testing updates: {}", e),
        }
    }
}

impl Engine {
    /// Run one sweep. A failure on one update does not stop the others.
    pub async fn approve_testing(&self) -> Result<SweepReport, EngineError> {
        let testing = self
            .store
            .repository()
            .updates_with_status(UpdateStatus::Testing)
            .await?;

        let mut report = SweepReport::default();
        for update in testing.into_iter().filter(|u| u.request.is_none()) {
            report.examined += 1;
            match self.approve_one(&update.alias).await {
                Ok((approval, caveats)) => {
                    for caveat in &caveats {
                        warn!("{}: {}", update.alias, caveat.description);
                    }
                    report.caveats += caveats.len();
                    match approval {
                        Approval::Skipped => {}
                        Approval::Approved => report.approved += 1,
                        Approval::Pushed => report.pushed += 1,
                    }
                }
                Err(e) => {
                    error!("Error approving {}: {}", update.alias, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn approve_one(&self, alias: &Alias) -> Result<(Approval, Vec<Caveat>), EngineError> {
        let now = self.now();
        let guard = self.store.lock(alias).await;
        let mut update = self.store.load(alias).await?;
        if update.status != UpdateStatus::Testing || update.request.is_some() || update.locked {
            return Ok((Approval::Skipped, Vec::new()));
        }
        let release = self.store.release(&update.release).await?;
        let ctx = self.context(&release, now);
        let evaluator = ThresholdEvaluator::new(&self.policy);

        if release.mandatory_days_in_testing == 0 && !update.autotime {
            return Ok((Approval::Skipped, Vec::new()));
        }
        if !evaluator.meets_testing_requirements(&update, &release, now) {
            debug!("{} has not met testing requirements", alias);
            return Ok((Approval::Skipped, Vec::new()));
        }
        info!("{} now meets testing requirements", alias);

        let days = evaluator.days_in_testing(&update, now);
        let already_commented = evaluator.has_stable_comment(&update);
        let mut effects = Vec::new();
        let mut caveats = Vec::new();

        let approval = if update.autotime && days >= update.stable_days.unwrap_or(0) {
            if !already_commented {
                effects.push(Effect::publish(
                    "update.requirements_met.stable",
                    &update,
                    &self.policy.system_account,
                ));
            }
            info!("Automatically marking {} as stable", alias);
            let (pushed, accepted) = self.apply(
                &ctx,
                update,
                RequestEvent::SetRequest {
                    action: UpdateRequest::Stable,
                    actor: self.policy.system_account.clone(),
                },
                &mut effects,
                &mut caveats,
            )?;
            update = pushed;
            if accepted {
                Approval::Pushed
            } else {
                Approval::Skipped
            }
        } else if already_commented {
            debug!("{} already has its stable eligibility comment", alias);
            return Ok((Approval::Skipped, Vec::new()));
        } else {
            update.add_comment(ctx.system_comment(self.policy.testing_approval_msg(days)));
            effects.push(Effect::publish(
                "update.requirements_met.stable",
                &update,
                &self.policy.system_account,
            ));
            Approval::Approved
        };

        self.store.commit(std::slice::from_ref(&update)).await?;
        drop(guard);

        caveats.extend(
            self.run_effects(vec![PendingEffects {
                alias: alias.clone(),
                effects,
            }])
            .await,
        );
        Ok((approval, caveats))
    }
}
