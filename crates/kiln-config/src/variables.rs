//! Variable interpolation for build commands.
//!
//! Supports variables like:
//! - `${build.id}` - Build ID
//! - `${build.ref}` - Full ref (`refs/heads/main`)
//! - `${build.branch}` - Branch name (`main`)
//! - `${build.commit_url}` - URL of the commit being built
//! - `${build.message}` - Commit message (first line)
//! - `${build.author}` - Commit author name
//! - `${build.author_email}` - Commit author email
//! - `${repo.name}` - Repository name
//! - `${repo.url}` - Repository URL
//! - `${repo.owner}` - Repository owner (if known)
//! - `${env.VAR_NAME}` - Environment variable
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)
//! - `${datetime}` - ISO datetime
//! - `${NAME}` - Custom variable from `build { vars { ... } }`
//!
//! Substituted values are shell-quoted: the commands run through `sh -c`, and
//! most build fields come straight from the trigger payload.

use kiln_core::BuildRecord;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub build: BuildContext,
    pub repo: RepoContext,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Custom variables defined by user
    pub custom: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub id: String,
    pub ref_name: String,
    pub branch: String,
    pub commit_url: String,
    pub message: String,
    pub author: String,
    pub author_email: String,
}

#[derive(Debug, Clone, Default)]
pub struct RepoContext {
    pub name: String,
    pub url: String,
    pub owner: Option<String>,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}")
        .expect("variable pattern is valid")
});

impl VariableContext {
    /// Create a new empty variable context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context describing `record`.
    pub fn for_build(record: &BuildRecord) -> Self {
        Self {
            build: BuildContext {
                id: record.id.to_string(),
                ref_name: record.r#ref.clone(),
                branch: record.branch().to_string(),
                commit_url: record.url.clone(),
                message: record.message.lines().next().unwrap_or_default().to_string(),
                author: record.author.name.clone(),
                author_email: record.author.email.clone(),
            },
            repo: RepoContext {
                name: record.repository.name.clone(),
                url: record.repository.url.clone(),
                owner: record.repository.owner.as_ref().map(|o| o.name.clone()),
            },
            ..Self::default()
        }
    }

    /// Add environment variables visible as `${env.NAME}`.
    pub fn with_env<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (key, value) in vars {
            self.env.insert(key.clone(), value.clone());
        }
        self
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.entry(key).or_insert(value);
        }
    }

    /// Add custom variables visible as `${NAME}`.
    pub fn with_vars<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (key, value) in vars {
            self.custom.insert(key.clone(), value.clone());
        }
        self
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["build", "id"] => Some(self.build.id.clone()),
            ["build", "ref"] => Some(self.build.ref_name.clone()),
            ["build", "branch"] => Some(self.build.branch.clone()),
            ["build", "commit_url"] => Some(self.build.commit_url.clone()),
            ["build", "message"] => Some(self.build.message.clone()),
            ["build", "author"] => Some(self.build.author.clone()),
            ["build", "author_email"] => Some(self.build.author_email.clone()),

            ["repo", "name"] => Some(self.repo.name.clone()),
            ["repo", "url"] => Some(self.repo.url.clone()),
            ["repo", "owner"] => self.repo.owner.clone(),

            ["env", name] => self.env.get(*name).cloned(),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),
            ["datetime"] => Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),

            // Single-part names check custom variables
            [name] => self.custom.get(*name).cloned(),

            _ => None,
        }
    }

    /// Interpolate all variables in a shell command, quoting each value.
    /// Unknown variables are left untouched.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                match self.resolve(var_name) {
                    Some(value) => shell_quote(&value),
                    None => format!("${{{}}}", var_name),
                }
            })
            .to_string()
    }
}

/// POSIX single-quote `value` unless it is made only of characters the shell
/// treats literally.
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:@+,%".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kiln_core::build::{Person, RepositoryInfo};
    use kiln_core::{BuildId, NewBuild};

    fn record() -> BuildRecord {
        let new = NewBuild {
            repository: RepositoryInfo {
                url: "https://github.com/acme/widgets".to_string(),
                name: "widgets".to_string(),
                description: String::new(),
                owner: Some(Person {
                    name: "acme".to_string(),
                    email: String::new(),
                }),
            },
            url: "https://github.com/acme/widgets/commit/abc123".to_string(),
            author: Person {
                name: "Dev".to_string(),
                email: "dev@acme.test".to_string(),
            },
            message: "Fix things\n\nLonger body".to_string(),
            timestamp: "2024-01-02T03:04:05Z".to_string(),
            r#ref: "refs/heads/feature/x".to_string(),
        };
        BuildRecord::from_new(BuildId::new(), new, Utc::now())
    }

    #[test]
    fn test_build_interpolation() {
        let record = record();
        let ctx = VariableContext::for_build(&record);
        let result = ctx.interpolate("git checkout ${build.branch} # ${repo.owner}/${repo.name}");
        assert_eq!(result, "git checkout feature/x # acme/widgets");
        assert_eq!(
            ctx.interpolate("echo ${build.id}"),
            format!("echo {}", record.id)
        );
    }

    #[test]
    fn test_message_is_first_line() {
        let ctx = VariableContext::for_build(&record());
        assert_eq!(ctx.interpolate("${build.message}"), "'Fix things'");
    }

    #[test]
    fn test_untrusted_values_are_quoted() {
        let mut record = record();
        record.r#ref = "main; touch /tmp/owned".to_string();
        record.author.name = "O'Brien $(id)".to_string();
        let ctx = VariableContext::for_build(&record);

        assert_eq!(
            ctx.interpolate("git fetch origin ${build.ref}"),
            "git fetch origin 'main; touch /tmp/owned'"
        );
        assert_eq!(ctx.interpolate("${build.author}"), r"'O'\''Brien $(id)'");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("refs/heads/main"), "refs/heads/main");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("`id`"), "'`id`'");
    }

    #[test]
    fn test_env_variables() {
        let mut vars = HashMap::new();
        vars.insert("MODE".to_string(), "release".to_string());
        let ctx = VariableContext::new().with_env(&vars);
        assert_eq!(ctx.interpolate("make ${env.MODE}"), "make release");
    }

    #[test]
    fn test_custom_variables() {
        let mut vars = HashMap::new();
        vars.insert("suite".to_string(), "integration tests".to_string());
        let ctx = VariableContext::new().with_vars(&vars);
        assert_eq!(ctx.interpolate("run ${suite}"), "run 'integration tests'");
    }

    #[test]
    fn test_unknown_variable_is_kept() {
        let ctx = VariableContext::new();
        assert_eq!(ctx.interpolate("echo ${nope.nothing}"), "echo ${nope.nothing}");
        assert_eq!(ctx.interpolate("echo $HOME"), "echo $HOME");
    }

    #[test]
    fn test_date_format() {
        let ctx = VariableContext::new();
        let date = ctx.interpolate("${date}");
        assert_eq!(date.len(), 10);
        assert_eq!(&date[4..5], "-");
    }
}
