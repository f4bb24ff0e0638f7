//! Bug tracker integration.
//!
//! One implementation is chosen at startup: the Bugzilla REST client when a
//! tracker URL is configured, the no-op tracker otherwise.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};

use super::CollaboratorError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugDetails {
    pub title: String,
    pub security: bool,
    pub product: String,
}

#[async_trait]
pub trait BugTracker: Send + Sync {
    async fn comment(&self, bug_id: u64, text: &str) -> Result<(), CollaboratorError>;

    async fn set_status(
        &self,
        bug_id: u64,
        status: &str,
        comment: &str,
    ) -> Result<(), CollaboratorError>;

    async fn close(
        &self,
        bug_id: u64,
        fixed_in: &[String],
        comment: &str,
    ) -> Result<(), CollaboratorError>;

    async fn fetch_details(&self, bug_id: u64) -> Result<BugDetails, CollaboratorError>;
}

/// Tracker that accepts every call and changes nothing.
#[derive(Debug, Default)]
pub struct NoopBugTracker;

#[async_trait]
impl BugTracker for NoopBugTracker {
    async fn comment(&self, bug_id: u64, text: &str) -> Result<(), CollaboratorError> {
        debug!("noop bug tracker: comment on #{}: {}", bug_id, text);
        Ok(())
    }

    async fn set_status(
        &self,
        bug_id: u64,
        status: &str,
        _comment: &str,
    ) -> Result<(), CollaboratorError> {
        debug!("noop bug tracker: set #{} to {}", bug_id, status);
        Ok(())
    }

    async fn close(
        &self,
        bug_id: u64,
        fixed_in: &[String],
        _comment: &str,
    ) -> Result<(), CollaboratorError> {
        debug!("noop bug tracker: close #{} fixed in {:?}", bug_id, fixed_in);
        Ok(())
    }

    async fn fetch_details(&self, bug_id: u64) -> Result<BugDetails, CollaboratorError> {
        Ok(BugDetails {
            title: format!("Bug {}", bug_id),
            security: false,
            product: String::new(),
        })
    }
}

const SERVICE: &str = "bugzilla";
const API_KEY_HEADER: &str = "X-BUGZILLA-API-KEY";

pub struct BugzillaClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BugsResponse {
    bugs: Vec<BugRecord>,
}

#[derive(Debug, Deserialize)]
struct BugRecord {
    summary: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    product: String,
}

impl BugzillaClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn bug_url(&self, bug_id: u64) -> String {
        format!("{}/rest/bug/{}", self.base_url, bug_id)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, CollaboratorError> {
        let response = self
            .authorize(builder)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| CollaboratorError::unavailable(SERVICE, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        error!("Bugzilla API error: {} - {}", status, body);
        if status.is_server_error() {
            Err(CollaboratorError::unavailable(SERVICE, format!("{status}: {body}")))
        } else {
            Err(CollaboratorError::rejected(SERVICE, format!("{status}: {body}")))
        }
    }

    async fn update_bug(&self, bug_id: u64, body: serde_json::Value) -> Result<(), CollaboratorError> {
        self.send(self.client.put(self.bug_url(bug_id)).json(&body))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl BugTracker for BugzillaClient {
    async fn comment(&self, bug_id: u64, text: &str) -> Result<(), CollaboratorError> {
        info!("Commenting on bug #{}", bug_id);
        let url = format!("{}/comment", self.bug_url(bug_id));
        self.send(self.client.post(url).json(&json!({ "comment": text })))
            .await
            .map(|_| ())
    }

    async fn set_status(
        &self,
        bug_id: u64,
        status: &str,
        comment: &str,
    ) -> Result<(), CollaboratorError> {
        info!("Setting bug #{} to {}", bug_id, status);
        self.update_bug(
            bug_id,
            json!({ "status": status, "comment": { "body": comment } }),
        )
        .await
    }

    async fn close(
        &self,
        bug_id: u64,
        fixed_in: &[String],
        comment: &str,
    ) -> Result<(), CollaboratorError> {
        info!("Closing bug #{}", bug_id);
        self.update_bug(
            bug_id,
            json!({
                "status": "CLOSED",
                "resolution": "ERRATA",
                "cf_fixed_in": fixed_in.join(" "),
                "comment": { "body": comment },
            }),
        )
        .await
    }

    async fn fetch_details(&self, bug_id: u64) -> Result<BugDetails, CollaboratorError> {
        let response = self.send(self.client.get(self.bug_url(bug_id))).await?;
        let parsed: BugsResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::rejected(SERVICE, e.to_string()))?;
        let record = parsed
            .bugs
            .into_iter()
            .next()
            .ok_or_else(|| CollaboratorError::rejected(SERVICE, format!("bug {bug_id} missing")))?;

        Ok(BugDetails {
            title: record.summary,
            security: record.keywords.iter().any(|k| k == "Security"),
            product: record.product,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bug_url_strips_trailing_slash() {
        let client = BugzillaClient::new("https://bugzilla.example.org/", None);
        assert_eq!(
            client.bug_url(42),
            "https://bugzilla.example.org/rest/bug/42"
        );
    }

    #[test]
    fn test_bug_record_parsing() {
        let parsed: BugsResponse = serde_json::from_str(
            r#"{"bugs": [{"summary": "CVE-2024-0001 openssl: overflow", "keywords": ["Security", "SecurityTracking"], "product": "Fedora"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.bugs.len(), 1);
        assert!(parsed.bugs[0].keywords.contains(&"Security".to_string()));
    }

    #[tokio::test]
    async fn test_noop_tracker_accepts_everything() {
        let tracker = NoopBugTracker;
        tracker.comment(1, "hi").await.unwrap();
        tracker.set_status(1, "ON_QA", "pushed").await.unwrap();
        tracker.close(1, &["pkg-1.0-1".to_string()], "done").await.unwrap();
        assert!(!tracker.fetch_details(1).await.unwrap().security);
    }
}
