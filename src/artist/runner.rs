use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::output_parser::parse_artifact_path;
use super::profile::ToolProfile;
use super::ArtistError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

/// Exit status plus stdout and stderr merged line by line in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub lines: Vec<String>,
}

#[async_trait]
pub trait ToolCommandRunner: Send + Sync + 'static {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ArtistError>;
}

pub type SharedToolCommandRunner = Arc<dyn ToolCommandRunner>;

pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(600);

/// How long to keep reading after the tool exits. Descendants that inherited
/// the pipes are not waited for beyond this.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct TokioToolCommandRunner {
    timeout: Duration,
}

impl TokioToolCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TokioToolCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_JOB_TIMEOUT)
    }
}

#[async_trait]
impl ToolCommandRunner for TokioToolCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ArtistError> {
        let mut command = Command::new(spec.program.as_str());
        command
            .args(spec.args.iter().map(String::as_str))
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        if let Some(cwd) = spec.cwd.as_ref() {
            command.current_dir(cwd);
        }

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| ArtistError::Launch {
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let readers = [
            tokio::spawn(forward_lines(child.stdout.take(), tx.clone())),
            tokio::spawn(forward_lines(child.stderr.take(), tx)),
        ];

        let mut lines = Vec::new();
        let waited = tokio::time::timeout(self.timeout, async {
            loop {
                tokio::select! {
                    Some(line) = rx.recv() => push_line(&mut lines, line),
                    status = child.wait() => break status,
                }
            }
        })
        .await;

        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                readers.iter().for_each(|reader| reader.abort());
                return Err(ArtistError::Process(source));
            }
            Err(_elapsed) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                let _ = child.start_kill();
                readers.iter().for_each(|reader| reader.abort());
                return Err(ArtistError::ProcessTimeout {
                    elapsed_ms: elapsed_ms(started),
                });
            }
        };

        let drained = tokio::time::timeout(OUTPUT_DRAIN_GRACE, async {
            while let Some(line) = rx.recv().await {
                push_line(&mut lines, line);
            }
        })
        .await
        .is_ok();

        if drained {
            for reader in readers {
                if let Ok(Err(source)) = reader.await {
                    return Err(ArtistError::Process(source));
                }
            }
        } else {
            warn!(
                program = %spec.program,
                "tool exited but a descendant still holds its output; stopped reading"
            );
            readers.iter().for_each(|reader| reader.abort());
        }

        Ok(CommandOutput {
            status_code: status.code().unwrap_or(-1),
            lines,
        })
    }
}

fn push_line(lines: &mut Vec<String>, line: String) {
    debug!(line = %line, "tool output");
    lines.push(line);
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // Safety: killpg only sends a signal. The child leads its own group via
    // process_group(0), so this cannot reach processes outside the job.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

async fn forward_lines<R>(
    stream: Option<R>,
    tx: mpsc::UnboundedSender<String>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return Ok(());
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(buf.as_slice())
            .trim_end_matches(['\r', '\n'])
            .to_string();
        if tx.send(line).is_err() {
            return Ok(());
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Launches a profile's tool and recovers the artifact path from its output.
#[derive(Clone)]
pub struct JobRunner {
    runner: SharedToolCommandRunner,
}

impl JobRunner {
    pub fn new(runner: SharedToolCommandRunner) -> Self {
        Self { runner }
    }

    pub async fn run(&self, profile: &ToolProfile) -> Result<PathBuf, ArtistError> {
        let spec = profile.command_spec();
        info!(
            version = %profile.version,
            program = %spec.program,
            parameter_file = %profile.parameter_file.display(),
            "launching generation tool"
        );

        let output = self.runner.run(&spec).await?;
        let Some(artifact_path) = parse_artifact_path(
            &profile.output_pattern,
            output.lines.iter().map(String::as_str),
        ) else {
            warn!(
                version = %profile.version,
                status_code = output.status_code,
                lines = output.lines.len(),
                "generation tool output did not name an artifact"
            );
            return Err(ArtistError::ArtifactNotFound {
                status_code: output.status_code,
                lines: output.lines.len(),
            });
        };

        if output.status_code != 0 {
            warn!(
                version = %profile.version,
                status_code = output.status_code,
                artifact = %artifact_path.display(),
                "generation tool exited non-zero but reported an artifact"
            );
        }
        Ok(artifact_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artist::profile::CommandTemplate;
    use crate::artist::ToolVersion;
    use regex::Regex;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRunner {
        seen: Mutex<Vec<CommandSpec>>,
        next: Mutex<Option<Result<CommandOutput, ArtistError>>>,
    }

    impl FakeRunner {
        fn with_lines(status_code: i32, lines: &[&str]) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                next: Mutex::new(Some(Ok(CommandOutput {
                    status_code,
                    lines: lines.iter().map(|line| line.to_string()).collect(),
                }))),
            }
        }

        fn take_seen(&self) -> Vec<CommandSpec> {
            std::mem::take(&mut *self.seen.lock().expect("fake runner mutex poisoned"))
        }
    }

    #[async_trait]
    impl ToolCommandRunner for FakeRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ArtistError> {
            self.seen
                .lock()
                .expect("fake runner mutex poisoned")
                .push(spec.clone());
            self.next
                .lock()
                .expect("fake runner mutex poisoned")
                .take()
                .unwrap_or_else(|| {
                    Ok(CommandOutput {
                        status_code: 0,
                        lines: Vec::new(),
                    })
                })
        }
    }

    fn profile() -> ToolProfile {
        ToolProfile {
            version: ToolVersion::V2,
            parameter_file: PathBuf::from("/srv/invokeai/params.txt"),
            invocation: CommandTemplate {
                program: String::from("invokeai"),
                args: vec![String::from("--from_file"), String::from("{parameter_file}")],
                cwd: None,
                env: Default::default(),
            },
            output_pattern: Regex::new(r"(?P<path>/\S*outputs/\S*?\d+\.\d+\.?png)")
                .expect("valid regex"),
        }
    }

    #[tokio::test]
    async fn job_runner_returns_single_matching_path() {
        let fake = Arc::new(FakeRunner::with_lines(
            0,
            &[">> Outputs:", "[1] /srv/invokeai/outputs/12345.6789png: \"x\""],
        ));
        let jobs = JobRunner::new(fake.clone());

        let path = jobs.run(&profile()).await.expect("artifact should be found");
        assert_eq!(path, PathBuf::from("/srv/invokeai/outputs/12345.6789png"));

        let seen = fake.take_seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].args,
            vec![
                String::from("--from_file"),
                String::from("/srv/invokeai/params.txt")
            ]
        );
    }

    #[tokio::test]
    async fn job_runner_prefers_last_match() {
        let fake = Arc::new(FakeRunner::with_lines(
            0,
            &[
                "/srv/invokeai/outputs/1.0001png",
                "/srv/invokeai/outputs/1.0002png",
            ],
        ));
        let path = JobRunner::new(fake)
            .run(&profile())
            .await
            .expect("artifact should be found");
        assert_eq!(path, PathBuf::from("/srv/invokeai/outputs/1.0002png"));
    }

    #[tokio::test]
    async fn job_runner_reports_exit_code_when_nothing_matches() {
        let fake = Arc::new(FakeRunner::with_lines(
            1,
            &["Traceback (most recent call last):", "RuntimeError: CUDA"],
        ));
        let err = JobRunner::new(fake)
            .run(&profile())
            .await
            .expect_err("no artifact in output");
        assert!(matches!(
            err,
            ArtistError::ArtifactNotFound {
                status_code: 1,
                lines: 2
            }
        ));
        assert!(err.to_string().starts_with("filename not found"));
    }

    #[tokio::test]
    async fn job_runner_accepts_artifact_despite_non_zero_exit() {
        let fake = Arc::new(FakeRunner::with_lines(
            3,
            &["[1] /srv/invokeai/outputs/9.1234png: \"x\""],
        ));
        let path = JobRunner::new(fake)
            .run(&profile())
            .await
            .expect("artifact should be found");
        assert_eq!(path, PathBuf::from("/srv/invokeai/outputs/9.1234png"));
    }

    #[cfg(unix)]
    fn shell(script: &str) -> CommandSpec {
        CommandSpec {
            program: String::from("sh"),
            args: vec![String::from("-c"), script.to_string()],
            cwd: None,
            env: Vec::new(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tokio_runner_merges_stdout_and_stderr() {
        let output = TokioToolCommandRunner::default()
            .run(&shell("echo from-stdout; echo from-stderr 1>&2; exit 3"))
            .await
            .expect("command should run");
        assert_eq!(output.status_code, 3);
        assert_eq!(output.lines.len(), 2);
        assert!(output.lines.contains(&String::from("from-stdout")));
        assert!(output.lines.contains(&String::from("from-stderr")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tokio_runner_applies_env_and_cwd() {
        let dir = std::env::temp_dir().join(format!("artist_runner_cwd_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.as_path()).expect("temp dir should exist");
        let mut spec = shell("echo \"$ARTIST_MARKER\"; pwd");
        spec.cwd = Some(dir.clone());
        spec.env = vec![(String::from("ARTIST_MARKER"), String::from("marker-value"))];

        let output = TokioToolCommandRunner::default()
            .run(&spec)
            .await
            .expect("command should run");
        assert_eq!(output.status_code, 0);
        assert_eq!(output.lines[0], "marker-value");
        let dir_name = dir
            .file_name()
            .and_then(|name| name.to_str())
            .expect("dir name");
        assert!(output.lines[1].ends_with(dir_name));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tokio_runner_kills_process_after_timeout() {
        let spec = CommandSpec {
            program: String::from("sleep"),
            args: vec![String::from("5")],
            cwd: None,
            env: Vec::new(),
        };
        let started = Instant::now();
        let err = TokioToolCommandRunner::new(Duration::from_millis(200))
            .run(&spec)
            .await
            .expect_err("sleep should time out");
        assert!(matches!(err, ArtistError::ProcessTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tokio_runner_returns_once_tool_exits_even_if_a_descendant_keeps_the_pipe() {
        let started = Instant::now();
        let output = TokioToolCommandRunner::new(Duration::from_secs(5))
            .run(&shell("echo /srv/outputs/1.2345png; sleep 5 &"))
            .await
            .expect("exited tool should not time out");
        assert_eq!(output.status_code, 0);
        assert_eq!(output.lines, vec![String::from("/srv/outputs/1.2345png")]);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tokio_runner_timeout_kills_descendants_too() {
        let dir = std::env::temp_dir().join(format!("artist_runner_group_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.as_path()).expect("temp dir should exist");
        let marker = dir.join("descendant-alive");
        let script = format!("(sleep 1; touch '{}') & sleep 30", marker.display());

        let err = TokioToolCommandRunner::new(Duration::from_millis(200))
            .run(&shell(script.as_str()))
            .await
            .expect_err("sleep should time out");
        assert!(matches!(err, ArtistError::ProcessTimeout { .. }));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn tokio_runner_reports_launch_failure() {
        let spec = CommandSpec {
            program: String::from("/nonexistent/artist-tool"),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        };
        let err = TokioToolCommandRunner::default()
            .run(&spec)
            .await
            .expect_err("missing binary should not launch");
        assert!(
            matches!(err, ArtistError::Launch { ref program, .. } if program == "/nonexistent/artist-tool")
        );
    }
}
