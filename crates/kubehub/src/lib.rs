//! kflex kubehub: external tool invocation (kind, kubectl) and state probing.
//!
//! All processes go through [`CommandRunner`], so the orchestrator can be
//! driven by a scripted runner in tests.

#![forbid(unsafe_code)]

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::debug;

mod prober;

pub use prober::{cluster_listed, StateProber};

/// A program plus its arguments. No shell is involved unless `program` is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { program: program.into(), args: args.into_iter().map(Into::into).collect() }
    }

    /// Build from an argv vector (`argv[0]` is the program).
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self { program: program.clone(), args: args.to_vec() })
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args { write!(f, " {}", a)?; }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self { success: true, code: Some(0), stdout: stdout.into(), stderr: Vec::new() }
    }

    pub fn failed(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self { success: false, code: Some(code), stdout: Vec::new(), stderr: stderr.into() }
    }

    /// Short human description of a failure: exit code plus the last stderr line.
    pub fn failure_reason(&self) -> String {
        let status = match self.code {
            Some(c) => format!("exit status {}", c),
            None => "terminated by signal".to_string(),
        };
        let stderr = String::from_utf8_lossy(&self.stderr);
        match stderr.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
            Some(line) => format!("{}: {}", status, line),
            None => status,
        }
    }
}

/// Runs external commands to completion. No timeout, no cancellation: the
/// caller waits for the process to exit.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// `Err` only when the process could not be started or waited on; a
    /// non-zero exit is reported through [`CommandOutput::success`].
    async fn run(&self, cmd: &ToolCommand) -> std::io::Result<CommandOutput>;
}

#[async_trait::async_trait]
impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    async fn run(&self, cmd: &ToolCommand) -> std::io::Result<CommandOutput> { (**self).run(cmd).await }
}

/// Real process runner on top of `tokio::process`. Output is captured rather
/// than inherited so it does not tear through the progress line.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait::async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &ToolCommand) -> std::io::Result<CommandOutput> {
        debug!(program = %cmd.program, args = ?cmd.args, "spawning");
        counter!("kflex_commands_total", 1u64, "program" => cmd.program.clone());
        let out = tokio::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .output()
            .await?;
        debug!(program = %cmd.program, code = ?out.status.code(), "exited");
        Ok(CommandOutput { success: out.status.success(), code: out.status.code(), stdout: out.stdout, stderr: out.stderr })
    }
}

/// Command builder for the kind CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindCli {
    bin: String,
}

impl KindCli {
    pub fn new(bin: impl Into<String>) -> Self { Self { bin: bin.into() } }

    pub fn bin(&self) -> &str { &self.bin }

    /// `sh -c 'command -v "$1"' sh <kind>`: exits non-zero when the binary is
    /// not on PATH. The binary is passed as a positional parameter, never
    /// spliced into the script.
    pub fn presence_check(&self) -> ToolCommand {
        ToolCommand::new("sh", ["-c", r#"command -v "$1""#, "sh", self.bin.as_str()])
    }

    pub fn get_clusters(&self) -> ToolCommand { ToolCommand::new(&self.bin, ["get", "clusters"]) }

    pub fn create_cluster(&self, name: &str, config: &Path) -> ToolCommand {
        ToolCommand::new(
            &self.bin,
            ["create".to_string(), "cluster".into(), "--name".into(), name.to_string(), "--config".into(), config.display().to_string()],
        )
    }
}

/// Command builder for kubectl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubectlCli {
    bin: String,
}

impl KubectlCli {
    pub fn new(bin: impl Into<String>) -> Self { Self { bin: bin.into() } }

    pub fn apply_url(&self, manifest: &str) -> ToolCommand { ToolCommand::new(&self.bin, ["apply", "-f", manifest]) }

    pub fn patch_file(&self, namespace: &str, resource: &str, file: &Path) -> ToolCommand {
        ToolCommand::new(
            &self.bin,
            ["-n".to_string(), namespace.to_string(), "patch".into(), resource.to_string(), format!("--patch-file={}", file.display())],
        )
    }

    pub fn patch_json(&self, namespace: &str, resource: &str, patch: &str) -> ToolCommand {
        ToolCommand::new(
            &self.bin,
            ["-n".to_string(), namespace.to_string(), "patch".into(), resource.to_string(), "--type".into(), "json".into(), format!("-p={}", patch)],
        )
    }
}
