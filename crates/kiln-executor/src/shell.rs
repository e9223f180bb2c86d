//! Shell executor: runs the configured hooks and test command on the host.

use async_trait::async_trait;
use kiln_config::{BuildSettings, VariableContext};
use kiln_core::executor::{BuildExecutor, BuildOutcome};
use kiln_core::BuildRecord;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Number of trailing output lines kept in a failure message.
const TAIL_LINES: usize = 20;

/// Runs `pre-build`, `test` and `post-build` through `sh -c`, in that order.
///
/// The first step that exits non-zero fails the build. A missing test command
/// passes.
pub struct ShellExecutor {
    settings: BuildSettings,
    shell: String,
}

impl ShellExecutor {
    pub fn new(settings: BuildSettings) -> Self {
        Self {
            settings,
            shell: "sh".to_string(),
        }
    }

    /// Use a different shell binary (it must accept `-c <script>`).
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    fn steps(&self) -> Vec<(&'static str, &str)> {
        [
            ("pre-build", self.settings.pre_build.as_deref()),
            ("test", self.settings.test.as_deref()),
            ("post-build", self.settings.post_build.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, cmd)| cmd.map(|c| (name, c)))
        .filter(|(_, cmd)| !cmd.trim().is_empty())
        .collect()
    }

    fn command(&self, script: &str, record: &BuildRecord) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(script)
            .envs(&self.settings.env)
            .env("KILN_BUILD_ID", record.id.to_string())
            .env("KILN_REF", &record.r#ref)
            .env("KILN_REPO_URL", &record.repository.url)
            .env("KILN_COMMIT_URL", &record.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out build drops this future; take the child down with it.
            .kill_on_drop(true);

        // Own process group, so anything the script starts can be killed too.
        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(dir) = &self.settings.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn run_step(&self, step: &str, script: &str, record: &BuildRecord) -> Result<(), String> {
        debug!(build_id = %record.id, step, script, "Running build step");

        let child = self
            .command(script, record)
            .spawn()
            .map_err(|e| format!("{} could not start: {}", step, e))?;
        let group = KillGroupOnDrop::new(&child);
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("{} could not be awaited: {}", step, e))?;
        group.disarm();

        if output.status.success() {
            return Ok(());
        }

        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());

        let mut message = format!("{} failed (exit code {})", step, code);
        let tail = tail(&output.stderr).or_else(|| tail(&output.stdout));
        if let Some(tail) = tail {
            message.push_str(":\n");
            message.push_str(&tail);
        }
        Err(message)
    }
}

#[async_trait]
impl BuildExecutor for ShellExecutor {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn execute(&self, record: &BuildRecord) -> BuildOutcome {
        let mut vars = VariableContext::for_build(record)
            .with_env(&self.settings.env)
            .with_vars(&self.settings.vars);
        vars.populate_env();

        for (step, template) in self.steps() {
            let script = vars.interpolate(template);
            if let Err(message) = self.run_step(step, &script, record).await {
                warn!(build_id = %record.id, step, "Build step failed");
                return BuildOutcome::Failure(message);
            }
        }

        info!(build_id = %record.id, "All build steps passed");
        BuildOutcome::Success
    }
}

/// Kills a step's whole process group unless disarmed once the step exits.
struct KillGroupOnDrop(Option<u32>);

impl KillGroupOnDrop {
    fn new(child: &Child) -> Self {
        Self(child.id())
    }

    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for KillGroupOnDrop {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.0.and_then(|pid| libc::pid_t::try_from(pid).ok()) {
            debug!(pgid, "Killing build process group");
            // SAFETY: killpg has no memory safety requirements; a stale group
            // id only makes it fail with ESRCH.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

/// Last lines of a process stream, or `None` if it was empty.
fn tail(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().collect();
    if lines.iter().all(|l| l.trim().is_empty()) {
        return None;
    }
    let start = lines.len().saturating_sub(TAIL_LINES);
    Some(lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kiln_core::build::{Person, RepositoryInfo};
    use kiln_core::{BuildId, NewBuild};
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::TimeLimited;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln-shell-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn record() -> BuildRecord {
        let new = NewBuild {
            repository: RepositoryInfo {
                url: "https://github.com/acme/widgets".to_string(),
                name: "widgets".to_string(),
                description: String::new(),
                owner: None,
            },
            url: "https://github.com/acme/widgets/commit/abc123".to_string(),
            author: Person {
                name: "Dev".to_string(),
                email: "dev@acme.test".to_string(),
            },
            message: "Fix things".to_string(),
            timestamp: "2024-01-02T03:04:05Z".to_string(),
            r#ref: "refs/heads/main".to_string(),
        };
        BuildRecord::from_new(BuildId::new(), new, Utc::now())
    }

    fn settings(pre: Option<&str>, test: Option<&str>, post: Option<&str>) -> BuildSettings {
        BuildSettings {
            pre_build: pre.map(String::from),
            test: test.map(String::from),
            post_build: post.map(String::from),
            ..BuildSettings::default()
        }
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        let text: String = (0..30).map(|i| format!("line {}\n", i)).collect();
        let tail = tail(text.as_bytes()).unwrap();
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
        assert!(super::tail(b"  \n\n").is_none());
    }

    #[test]
    fn test_blank_steps_are_skipped() {
        let executor = ShellExecutor::new(settings(Some("  "), Some("make test"), None));
        assert_eq!(executor.steps(), vec![("test", "make test")]);
    }

    #[tokio::test]
    async fn test_no_commands_passes() {
        let executor = ShellExecutor::new(settings(None, None, None));
        assert_eq!(executor.execute(&record()).await, BuildOutcome::Success);
    }

    #[tokio::test]
    async fn test_passing_steps() {
        let executor = ShellExecutor::new(settings(Some("true"), Some("exit 0"), Some("true")));
        assert_eq!(executor.execute(&record()).await, BuildOutcome::Success);
    }

    #[tokio::test]
    async fn test_failing_step_is_reported() {
        let executor = ShellExecutor::new(settings(
            Some("true"),
            Some("echo 'assertion failed' >&2; exit 3"),
            Some("echo never"),
        ));
        match executor.execute(&record()).await {
            BuildOutcome::Failure(message) => {
                assert!(message.starts_with("test failed (exit code 3)"), "{}", message);
                assert!(message.contains("assertion failed"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_variables_and_env_reach_the_script() {
        let executor = ShellExecutor::new(settings(
            None,
            Some(r#"[ "${build.branch}" = main ] && [ "$KILN_REF" = refs/heads/main ]"#),
            None,
        ));
        assert_eq!(executor.execute(&record()).await, BuildOutcome::Success);
    }

    #[tokio::test]
    async fn test_missing_shell_fails_to_start() {
        let executor = ShellExecutor::new(settings(None, Some("true"), None))
            .with_shell("/nonexistent/kiln-shell");
        match executor.execute(&record()).await {
            BuildOutcome::Failure(message) => assert!(message.contains("could not start")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_custom_vars_reach_the_script() {
        let mut build = settings(None, Some("[ ${suite} = integration ]"), None);
        build.vars.insert("suite".to_string(), "integration".to_string());
        let executor = ShellExecutor::new(build);
        assert_eq!(executor.execute(&record()).await, BuildOutcome::Success);
    }

    #[tokio::test]
    async fn test_trigger_fields_cannot_inject_commands() {
        let dir = scratch_dir("inject");
        let marker = dir.join("owned");

        let mut record = record();
        record.r#ref = format!("main; touch {}", marker.display());
        record.message = format!("$(touch {})", marker.display());

        let executor = ShellExecutor::new(settings(
            Some("echo fetching ${build.ref}"),
            Some("echo ${build.message}"),
            None,
        ));
        assert_eq!(executor.execute(&record).await, BuildOutcome::Success);
        assert!(!marker.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_build_is_killed() {
        let dir = scratch_dir("timeout");
        let finished = dir.join("finished");
        let background = dir.join("background");
        let script = format!(
            "(sleep 2; touch {}) & sleep 2; touch {}",
            background.display(),
            finished.display()
        );

        let executor = TimeLimited::new(
            ShellExecutor::new(settings(None, Some(&script), None)),
            Some(Duration::from_secs(1)),
        );
        assert_eq!(
            executor.execute(&record()).await,
            BuildOutcome::Failure("build timed out after 1s".to_string())
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!finished.exists());
        assert!(!background.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
