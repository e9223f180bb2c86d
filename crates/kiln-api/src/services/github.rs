//! GitHub client used to report failed builds as issues.

use async_trait::async_trait;
use kiln_config::GitHubSettings;
use kiln_core::{BuildRecord, Notifier, NotifyOutcome};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Per-request limit for GitHub API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Issue to open on the repository of a failed build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    number: u64,
    html_url: String,
}

/// Opens a GitHub issue for every failed build.
pub struct GitHubNotifier {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    labels: Vec<String>,
    timeout: Duration,
}

impl GitHubNotifier {
    pub fn new(settings: &GitHubSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            token: settings.token.clone().filter(|t| !t.trim().is_empty()),
            labels: settings.labels.clone(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn issue_for(&self, record: &BuildRecord) -> NewIssue {
        let mut body = format!(
            "Build `{}` failed.\n\n\
             **Commit:** {}\n\
             **Ref:** `{}`\n\
             **Author:** {} <{}>\n\n\
             **Message:**\n\n> {}\n\n\
             **Error:**\n\n```\n{}\n```\n",
            record.id,
            record.url,
            record.r#ref,
            record.author.name,
            record.author.email,
            record.message.lines().collect::<Vec<_>>().join("\n> "),
            record.error,
        );
        if let Some(time) = record.build_time {
            body.push_str(&format!("\nFinished at {}.\n", time.to_rfc3339()));
        }

        NewIssue {
            title: format!("Build failed on {}", record.branch()),
            body,
            labels: self.labels.clone(),
        }
    }

    /// Create an issue on `owner/repo`. Returns the issue URL.
    pub async fn create_issue(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        issue: &NewIssue,
    ) -> Result<String, GitHubError> {
        let url = format!("{}/repos/{}/{}/issues", self.api_url, owner, repo);

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", token))
            .header("User-Agent", "Kiln-CI")
            .header("Accept", "application/vnd.github+json")
            .json(issue)
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!(
                "Failed to create issue ({}): {}",
                status, text
            )));
        }

        let created: CreatedIssue = response
            .json()
            .await
            .map_err(|e| GitHubError::Parse(e.to_string()))?;
        info!(issue = created.number, url = %created.html_url, "Created GitHub issue");
        Ok(created.html_url)
    }
}

#[async_trait]
impl Notifier for GitHubNotifier {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn notify(&self, record: &BuildRecord) -> kiln_core::Result<NotifyOutcome> {
        let Some(token) = &self.token else {
            return Ok(NotifyOutcome::not_sent("no GitHub token configured"));
        };
        let Some(owner) = &record.repository.owner else {
            return Ok(NotifyOutcome::not_sent("repository owner unknown"));
        };

        let issue = self.issue_for(record);
        self.create_issue(token, &owner.name, &record.repository.name, &issue)
            .await
            .map_err(|e| kiln_core::Error::Notification(e.to_string()))?;
        Ok(NotifyOutcome::Sent)
    }
}

/// GitHub API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
