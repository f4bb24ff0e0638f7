use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use karmagate_core::PolicyConfig;

use crate::state_machine::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    pub approve_testing_interval: Duration,
    pub retry: RetryPolicy,
    /// When unset, bug work is logged and skipped.
    pub bugzilla_url: Option<String>,
    pub bugzilla_api_key: Option<String>,
    pub policy: PolicyConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any source of variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| parse_optional(lookup(key));

        let state_dir = var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let approve_testing_interval = var("APPROVE_TESTING_INTERVAL_SECS")
            .unwrap_or_else(|| "3600".to_string())
            .parse::<u64>()
            .context("APPROVE_TESTING_INTERVAL_SECS must be a valid number")?;
        if approve_testing_interval == 0 {
            anyhow::bail!("APPROVE_TESTING_INTERVAL_SECS must be greater than zero");
        }

        let attempts = var("EXTERNAL_CALL_ATTEMPTS")
            .unwrap_or_else(|| "3".to_string())
            .parse::<u32>()
            .context("EXTERNAL_CALL_ATTEMPTS must be a valid number")?
            .max(1);
        let timeout_ms = var("EXTERNAL_CALL_TIMEOUT_MS")
            .unwrap_or_else(|| "10000".to_string())
            .parse::<u64>()
            .context("EXTERNAL_CALL_TIMEOUT_MS must be a valid number")?;
        let backoff_ms = var("EXTERNAL_CALL_BACKOFF_MS")
            .unwrap_or_else(|| "200".to_string())
            .parse::<u64>()
            .context("EXTERNAL_CALL_BACKOFF_MS must be a valid number")?;

        let mut policy = match var("SYSTEM_USER") {
            Some(account) => PolicyConfig::with_system_account(&account),
            None => PolicyConfig::default(),
        };
        if let Some(base_url) = var("UPDATES_BASE_URL") {
            policy.base_url = base_url;
        }
        if let Some(packages) = var("CRITPATH_PACKAGES") {
            policy.critpath_packages = parse_list(&packages);
        }
        if let Some(groups) = var("ADMIN_GROUPS") {
            policy.admin_groups = parse_list(&groups);
        }
        if let Some(min_karma) = var("CRITPATH_MIN_KARMA") {
            policy.critpath_min_karma = min_karma
                .parse::<i32>()
                .context("CRITPATH_MIN_KARMA must be a valid number")?;
        }
        policy.critpath_num_admin_approvals = parse_admin_approvals(
            lookup("CRITPATH_NUM_ADMIN_APPROVALS"),
            policy.critpath_num_admin_approvals,
        )?;
        if let Some(days) = var("CRITPATH_STABLE_AFTER_DAYS") {
            policy.critpath_stable_after_days_without_negative_karma = days
                .parse::<u32>()
                .context("CRITPATH_STABLE_AFTER_DAYS must be a valid number")?;
        }

        Ok(Config {
            state_dir,
            approve_testing_interval: Duration::from_secs(approve_testing_interval),
            retry: RetryPolicy {
                attempts,
                timeout: Duration::from_millis(timeout_ms),
                backoff: Duration::from_millis(backoff_ms),
            },
            bugzilla_url: var("BUGZILLA_URL"),
            bugzilla_api_key: var("BUGZILLA_API_KEY"),
            policy,
        })
    }
}

/// Treat missing, empty and whitespace-only values as unset.
pub fn parse_optional(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse a comma separated list, ignoring blank entries.
pub fn parse_list(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parse CRITPATH_NUM_ADMIN_APPROVALS.
///
/// Unset keeps `default`. Set but blank disables the admin approval gate.
pub fn parse_admin_approvals(value: Option<String>, default: Option<u32>) -> Result<Option<u32>> {
    match value {
        None => Ok(default),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .context("CRITPATH_NUM_ADMIN_APPROVALS must be a valid number"),
    }
}
