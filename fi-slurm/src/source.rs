use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::error::SourceError;

/// Upper bound on a single scheduler command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const SINFO: &str = "sinfo";
pub const SINFO_ARGS: &[&str] = &[
    "-h",
    "-N",
    "-ONodeList:.|,StateCompact:.,CPUsState:.,CPUsLoad:.,AllocMem:.,FreeMem:.,Memory:.,PartitionName:.",
];

pub const SQUEUE: &str = "squeue";
pub const SQUEUE_ARGS: &[&str] = &[
    "-a",
    "-r",
    "-h",
    "--states=all",
    "-OPartition:.|,tres-alloc:.,State:.,UserName:.,Account:.,Reason:.",
];

pub const SSHARE: &str = "sshare";
pub const SSHARE_ARGS: &[&str] = &["-n", "-P", "-o", "Account,EffectvUsage,TRESRunMins"];

/// Where the raw text of one domain comes from
pub trait Source: Send + Sync {
    fn fetch(&self) -> Result<String, SourceError>;

    /// Human-readable origin, used in logs
    fn describe(&self) -> String;
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn fetch(&self) -> Result<String, SourceError> {
        (**self).fetch()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Runs an external program and captures its standard output
///
/// The program is killed once it runs longer than its timeout. Output is decoded as
/// UTF-8 with invalid sequences replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSource {
    pub fn new<I, A>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn sinfo() -> Self {
        Self::new(SINFO, SINFO_ARGS.iter().copied())
    }

    pub fn squeue() -> Self {
        Self::new(SQUEUE, SQUEUE_ARGS.iter().copied())
    }

    pub fn sshare() -> Self {
        Self::new(SSHARE, SSHARE_ARGS.iter().copied())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the program while keeping the arguments, e.g. to point at a full path
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Source for CommandSource {
    fn fetch(&self) -> Result<String, SourceError> {
        let command = self.describe();

        // polls run on plain threads, each command gets its own small runtime
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| SourceError::Output {
                command: command.clone(),
                source,
            })?;

        runtime.block_on(self.run(command))
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl CommandSource {
    /// Spawning, waiting and reading the output all share one deadline
    async fn run(&self, command: String) -> Result<String, SourceError> {
        let started = Instant::now();

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SourceError::Spawn {
                command: command.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|source| SourceError::Output {
                command: command.clone(),
                source,
            })?,
            Err(_) => {
                // the child went down with the dropped future
                tracing::warn!(%command, timeout = ?self.timeout, "killed command after timeout");
                return Err(SourceError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(SourceError::Exit {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::debug!(
            %command,
            elapsed = ?started.elapsed(),
            bytes = output.stdout.len(),
            "command finished"
        );
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Replays captured command output from a file, re-read on every fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Source for FileSource {
    fn fetch(&self) -> Result<String, SourceError> {
        let bytes = fs::read(&self.path).map_err(|source| SourceError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Always yields the same text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticSource {
    text: String,
}

impl StaticSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Source for StaticSource {
    fn fetch(&self) -> Result<String, SourceError> {
        Ok(self.text.clone())
    }

    fn describe(&self) -> String {
        "static text".to_string()
    }
}
