//! Build records and the trigger payloads they are created from.
//!
//! A [`BuildRecord`] is plain data. It knows how to move through its status
//! state machine but not how to persist itself; storage lives in `kiln-db`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{BuildId, BuildOutcome, Error, Result};

/// Status of a build attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Processing,
    Success,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Processing => "processing",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "processing" => Ok(BuildStatus::Processing),
            "success" => Ok(BuildStatus::Success),
            "failed" => Ok(BuildStatus::Failed),
            _ => Err(Error::Internal(format!("unknown build status: {}", s))),
        }
    }
}

/// A commit author or repository owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub email: String,
}

/// The repository a build belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub url: String,
    pub name: String,
    pub description: String,
    /// Only needed to route failure notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Person>,
}

/// A validated trigger payload, ready to be inserted by a storage adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBuild {
    pub repository: RepositoryInfo,
    /// URL of the commit being built.
    pub url: String,
    pub author: Person,
    pub message: String,
    pub timestamp: String,
    #[serde(rename = "ref")]
    pub r#ref: String,
}

/// A durable build record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: BuildId,
    pub repository: RepositoryInfo,
    pub url: String,
    pub author: Person,
    pub message: String,
    pub timestamp: String,
    #[serde(rename = "ref")]
    pub r#ref: String,
    pub status: BuildStatus,
    /// Empty unless `status` is [`BuildStatus::Failed`].
    pub error: String,
    /// When the last execution finished.
    pub build_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BuildRecord {
    /// Materialize a record for a freshly inserted build.
    pub fn from_new(id: BuildId, new: NewBuild, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            repository: new.repository,
            url: new.url,
            author: new.author,
            message: new.message,
            timestamp: new.timestamp,
            r#ref: new.r#ref,
            status: BuildStatus::Processing,
            error: String::new(),
            build_time: None,
            created_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record the outcome of the current attempt.
    ///
    /// Fails with [`Error::Conflict`] if the attempt already has a terminal status.
    pub fn finish(&mut self, outcome: &BuildOutcome, finished_at: DateTime<Utc>) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::Conflict(format!(
                "build {} already finished with status {}",
                self.id, self.status
            )));
        }

        match outcome {
            BuildOutcome::Success => {
                self.status = BuildStatus::Success;
                self.error.clear();
            }
            BuildOutcome::Failure(message) => {
                self.status = BuildStatus::Failed;
                // A failure must carry a message, otherwise it reads as a success.
                self.error = if message.trim().is_empty() {
                    "build failed without output".to_string()
                } else {
                    message.clone()
                };
            }
        }
        self.build_time = Some(finished_at);
        Ok(())
    }

    /// Start a new attempt for a rebuild.
    pub fn begin_attempt(&mut self) {
        self.status = BuildStatus::Processing;
        self.error.clear();
    }

    /// Whether `status` and `error` agree with each other.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            BuildStatus::Failed => !self.error.is_empty(),
            BuildStatus::Processing | BuildStatus::Success => self.error.is_empty(),
        }
    }

    /// Branch name with any `refs/heads/` prefix removed.
    pub fn branch(&self) -> &str {
        self.r#ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.r#ref)
    }

    pub fn summary(&self) -> BuildSummary {
        BuildSummary {
            id: self.id,
            repository: self.repository.name.clone(),
            r#ref: self.r#ref.clone(),
            author: self.author.name.clone(),
            message: self.message.lines().next().unwrap_or_default().to_string(),
        }
    }
}

/// Short description of a build, used for worker status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub id: BuildId,
    pub repository: String,
    #[serde(rename = "ref")]
    pub r#ref: String,
    pub author: String,
    pub message: String,
}

/// Inbound description of a commit to build.
///
/// Every field is optional here so that a missing field is reported by
/// [`TriggerPayload::validate`] instead of a serde error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerPayload {
    #[serde(default)]
    pub repository: Option<RepositoryPayload>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub author: Option<PersonPayload>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, rename = "ref")]
    pub r#ref: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryPayload {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<PersonPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl TriggerPayload {
    /// Check required fields and their shape.
    pub fn validate(self) -> Result<NewBuild> {
        let repository = self
            .repository
            .ok_or_else(|| missing("repository"))?;

        let repo_url = required("repository.url", repository.url)?;
        check_http_url("repository.url", &repo_url)?;
        let repo_name = required("repository.name", repository.name)?;
        let description = repository
            .description
            .ok_or_else(|| missing("repository.description"))?;

        // Owner is optional; keep it only when it has a usable name.
        let owner = repository.owner.and_then(|o| {
            let name = o.name.filter(|n| !n.trim().is_empty())?;
            Some(Person {
                name,
                email: o.email.unwrap_or_default(),
            })
        });

        let url = required("url", self.url)?;
        check_http_url("url", &url)?;

        let author = self.author.ok_or_else(|| missing("author"))?;
        let author_email = required("author.email", author.email)?;
        if !author_email.contains('@') {
            return Err(Error::Validation(format!(
                "author.email is not an email address: {}",
                author_email
            )));
        }
        let author_name = required("author.name", author.name)?;

        let message = required("message", self.message)?;

        let timestamp = required("timestamp", self.timestamp)?;
        if DateTime::parse_from_rfc3339(&timestamp).is_err() {
            return Err(Error::Validation(format!(
                "timestamp is not RFC 3339: {}",
                timestamp
            )));
        }

        let r#ref = required("ref", self.r#ref)?;
        check_ref_name(&r#ref)?;

        Ok(NewBuild {
            repository: RepositoryInfo {
                url: repo_url,
                name: repo_name,
                description,
                owner,
            },
            url,
            author: Person {
                name: author_name,
                email: author_email,
            },
            message,
            timestamp,
            r#ref,
        })
    }

    /// Build a trigger payload from a GitHub `push` webhook.
    ///
    /// Returns `None` for pushes without a head commit (branch deletions).
    pub fn from_github_push(payload: &serde_json::Value) -> Option<Self> {
        let head = payload.get("head_commit").filter(|c| !c.is_null())?;
        let repo = payload.get("repository")?;

        let str_at = |value: &serde_json::Value, key: &str| {
            value.get(key).and_then(|v| v.as_str()).map(String::from)
        };

        let owner = repo.get("owner").map(|o| PersonPayload {
            name: str_at(o, "name").or_else(|| str_at(o, "login")),
            email: str_at(o, "email"),
        });

        let author = head.get("author").map(|a| PersonPayload {
            name: str_at(a, "name"),
            email: str_at(a, "email"),
        });

        Some(TriggerPayload {
            repository: Some(RepositoryPayload {
                url: str_at(repo, "html_url").or_else(|| str_at(repo, "url")),
                name: str_at(repo, "name"),
                // GitHub sends null for repositories without a description.
                description: Some(str_at(repo, "description").unwrap_or_default()),
                owner,
            }),
            url: str_at(head, "url"),
            author,
            message: str_at(head, "message"),
            timestamp: str_at(head, "timestamp"),
            r#ref: str_at(payload, "ref"),
        })
    }
}

fn missing(field: &str) -> Error {
    Error::Validation(format!("missing required field: {}", field))
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(missing(field)),
    }
}

fn check_http_url(field: &str, value: &str) -> Result<()> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(Error::Validation(format!(
            "{} is not an http(s) URL: {}",
            field, value
        ))),
    }
}

/// Reject names `git check-ref-format --allow-onelevel` would refuse.
fn check_ref_name(name: &str) -> Result<()> {
    let bad_char = |c: char| c.is_ascii_control() || " ~^:?*[\\".contains(c);
    let bad_component = |part: &str| part.is_empty() || part.starts_with('.') || part.ends_with(".lock");

    let valid = name != "@"
        && !name.chars().any(bad_char)
        && !name.contains("..")
        && !name.contains("@{")
        && !name.ends_with('.')
        && !name.split('/').any(bad_component);

    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("ref is not a valid git ref name: {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> serde_json::Value {
        json!({
            "repository": {
                "url": "https://github.com/acme/widgets",
                "name": "widgets",
                "description": "a lightweight widget server",
                "owner": { "name": "acme", "email": "ops@acme.test" }
            },
            "url": "https://github.com/acme/widgets/commit/faea04357ef207d8f9f5c6a04607c7a53d8dc770",
            "author": { "email": "dev@acme.test", "name": "dev" },
            "message": "updating with changes from design review",
            "timestamp": "2012-12-15T20:05:07-08:00",
            "ref": "refs/heads/master"
        })
    }

    fn parse(value: serde_json::Value) -> TriggerPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_validate_good_payload() {
        let new = parse(sample_payload()).validate().unwrap();
        assert_eq!(new.repository.name, "widgets");
        assert_eq!(new.author.email, "dev@acme.test");
        assert_eq!(new.r#ref, "refs/heads/master");
        assert_eq!(new.repository.owner.unwrap().name, "acme");
    }

    #[test]
    fn test_validate_reports_each_missing_field() {
        let cases = [
            ("/repository/url", "repository.url"),
            ("/repository/name", "repository.name"),
            ("/repository/description", "repository.description"),
            ("/url", "url"),
            ("/author/email", "author.email"),
            ("/author/name", "author.name"),
            ("/message", "message"),
            ("/timestamp", "timestamp"),
            ("/ref", "ref"),
        ];

        for (pointer, field) in cases {
            let mut value = sample_payload();
            let (parent, key) = pointer.rsplit_once('/').unwrap();
            let target = if parent.is_empty() {
                &mut value
            } else {
                value.pointer_mut(parent).unwrap()
            };
            target.as_object_mut().unwrap().remove(key);

            match parse(value).validate() {
                Err(Error::Validation(msg)) => {
                    assert!(msg.ends_with(field), "{} -> {}", field, msg)
                }
                other => panic!("expected validation error for {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let mut value = sample_payload();
        value["url"] = json!("not a url");
        assert!(matches!(parse(value).validate(), Err(Error::Validation(_))));

        let mut value = sample_payload();
        value["author"]["email"] = json!("nobody");
        assert!(matches!(parse(value).validate(), Err(Error::Validation(_))));

        let mut value = sample_payload();
        value["timestamp"] = json!("yesterday");
        assert!(matches!(parse(value).validate(), Err(Error::Validation(_))));

        let mut value = sample_payload();
        value["message"] = json!("   ");
        assert!(matches!(parse(value).validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_bad_ref_names() {
        for bad in [
            "main; touch /tmp/owned",
            "refs/heads/a b",
            "refs//heads",
            "refs/heads/",
            "feature..x",
            "refs/heads/.hidden",
            "refs/heads/x.lock",
            "main@{1}",
            "@",
            "tab\tref",
        ] {
            let mut value = sample_payload();
            value["ref"] = json!(bad);
            match parse(value).validate() {
                Err(Error::Validation(msg)) => assert!(msg.contains("git ref"), "{}", msg),
                other => panic!("expected {:?} to be rejected, got {:?}", bad, other),
            }
        }

        for good in ["main", "refs/heads/feature/x-1", "refs/tags/v1.2.0"] {
            let mut value = sample_payload();
            value["ref"] = json!(good);
            assert!(parse(value).validate().is_ok(), "{}", good);
        }
    }

    #[test]
    fn test_wrong_type_fails_to_deserialize() {
        let mut value = sample_payload();
        value["message"] = json!(42);
        assert!(serde_json::from_value::<TriggerPayload>(value).is_err());
    }

    #[test]
    fn test_empty_description_is_allowed() {
        let mut value = sample_payload();
        value["repository"]["description"] = json!("");
        assert!(parse(value).validate().is_ok());
    }

    #[test]
    fn test_status_state_machine() {
        let new = parse(sample_payload()).validate().unwrap();
        let mut record = BuildRecord::from_new(BuildId::new(), new, Utc::now());
        assert_eq!(record.status, BuildStatus::Processing);
        assert!(record.error.is_empty());
        assert!(record.build_time.is_none());

        record
            .finish(&BuildOutcome::Failure("tests failed".into()), Utc::now())
            .unwrap();
        assert_eq!(record.status, BuildStatus::Failed);
        assert_eq!(record.error, "tests failed");
        assert!(record.is_consistent());

        // Terminal within an attempt.
        let err = record.finish(&BuildOutcome::Success, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(record.status, BuildStatus::Failed);

        record.begin_attempt();
        assert_eq!(record.status, BuildStatus::Processing);
        assert!(record.error.is_empty());

        record.finish(&BuildOutcome::Success, Utc::now()).unwrap();
        assert_eq!(record.status, BuildStatus::Success);
        assert!(record.is_consistent());
    }

    #[test]
    fn test_blank_failure_message_still_marks_failed() {
        let new = parse(sample_payload()).validate().unwrap();
        let mut record = BuildRecord::from_new(BuildId::new(), new, Utc::now());
        record
            .finish(&BuildOutcome::Failure(String::new()), Utc::now())
            .unwrap();
        assert!(!record.error.is_empty());
        assert!(record.is_consistent());
    }

    #[test]
    fn test_record_serializes_ref_and_status() {
        let new = parse(sample_payload()).validate().unwrap();
        let record = BuildRecord::from_new(BuildId::new(), new, Utc::now());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["ref"], "refs/heads/master");
        assert_eq!(value["status"], "processing");
        assert_eq!(record.branch(), "master");
    }

    #[test]
    fn test_from_github_push() {
        let push = json!({
            "ref": "refs/heads/main",
            "before": "0000000",
            "after": "abc1234",
            "repository": {
                "name": "widgets",
                "full_name": "acme/widgets",
                "html_url": "https://github.com/acme/widgets",
                "description": null,
                "owner": { "login": "acme" }
            },
            "head_commit": {
                "id": "abc1234",
                "url": "https://github.com/acme/widgets/commit/abc1234",
                "message": "Fix the flux capacitor",
                "timestamp": "2024-01-02T03:04:05Z",
                "author": { "name": "Dev", "email": "dev@acme.test" }
            }
        });

        let payload = TriggerPayload::from_github_push(&push).unwrap();
        let new = payload.validate().unwrap();
        assert_eq!(new.repository.url, "https://github.com/acme/widgets");
        assert_eq!(new.repository.description, "");
        assert_eq!(new.repository.owner.unwrap().name, "acme");
        assert_eq!(new.message, "Fix the flux capacitor");
    }

    #[test]
    fn test_from_github_push_without_head_commit() {
        let push = json!({
            "ref": "refs/heads/gone",
            "repository": { "name": "widgets" },
            "head_commit": null
        });
        assert!(TriggerPayload::from_github_push(&push).is_none());
    }
}
