//! Allow-listed command execution.
//!
//! The policy is a prefix match on the leading token of the command and on
//! the path operands of `cat`/`head`/`tail`. It deters accidents; it is not a
//! privilege boundary. Not inspected:
//! - non-reader commands chained after an allowed head (`df; rm -rf /`,
//!   `ls && id`, pipes);
//! - stdin redirection into a reader (`head /etc/hostname - </root/secret`);
//! - command substitution and `..` segments;
//! - operands of non-reader commands such as `grep`.

use crate::config::GatewayConfig;
use crate::metrics::Metrics;
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::warn;

const PATH_RESTRICTED: [&str; 3] = ["cat", "head", "tail"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("command cannot be empty")]
    Empty,
    #[error("command not allowed: {reason}")]
    Forbidden { command: String, reason: String },
    #[error("command timed out after {}", format_timeout(.0))]
    Timeout(Duration),
    #[error("command exited with status {}: {}", exit_label(.code), .stderr.trim())]
    Failed {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("failed to start command: {0}")]
    Spawn(#[from] io::Error),
}

fn format_timeout(after: &Duration) -> String {
    humantime::format_duration(*after).to_string()
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl GatewayError {
    pub fn outcome_label(&self) -> &'static str {
        match self {
            GatewayError::Empty => "invalid",
            GatewayError::Forbidden { .. } => "forbidden",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Failed { .. } | GatewayError::Spawn(_) => "failed",
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, GatewayError::Empty | GatewayError::Forbidden { .. })
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &str) -> io::Result<ProcessOutput>;
}

/// `sh -c` runner. The child is killed when the future is dropped, so the
/// gateway timeout also reaps the process.
pub struct ShellRunner;

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, command: &str) -> io::Result<ProcessOutput> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(ProcessOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommandPolicy {
    allowed_commands: Vec<Vec<String>>,
    allowed_paths: Vec<String>,
}

impl CommandPolicy {
    pub fn new(allowed_commands: &[String], allowed_paths: &[String]) -> Self {
        Self {
            allowed_commands: allowed_commands
                .iter()
                .map(|c| c.split_whitespace().map(str::to_string).collect::<Vec<_>>())
                .filter(|tokens| !tokens.is_empty())
                .collect(),
            allowed_paths: allowed_paths.to_vec(),
        }
    }

    pub fn check(&self, command: &str) -> Result<(), GatewayError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(GatewayError::Empty);
        }

        let leading = leading_tokens(command);
        let permitted = self.allowed_commands.iter().any(|entry| {
            leading.len() >= entry.len() && entry.iter().zip(&leading).all(|(a, b)| a == b)
        });
        if !permitted {
            return Err(forbidden(
                command,
                format!(
                    "'{}' is not in the allow-list",
                    leading.first().copied().unwrap_or_default()
                ),
            ));
        }

        for (idx, segment) in pipeline_segments(command).enumerate() {
            let tokens = leading_tokens(segment);
            let Some(program) = tokens.first() else {
                continue;
            };
            if !PATH_RESTRICTED.contains(program) {
                continue;
            }
            let paths: Vec<&str> = tokens[1..]
                .iter()
                .map(|t| t.trim_matches(|c: char| c == '"' || c == '\''))
                .filter(|t| t.starts_with('/'))
                .collect();
            if idx == 0 && paths.is_empty() {
                return Err(forbidden(
                    command,
                    format!("{program} must name a file below an allowed directory"),
                ));
            }
            if let Some(path) = paths
                .iter()
                .find(|p| !self.allowed_paths.iter().any(|a| p.starts_with(a.as_str())))
            {
                return Err(forbidden(command, format!("path '{path}' is not allowed")));
            }
        }

        Ok(())
    }
}

fn forbidden(command: &str, reason: String) -> GatewayError {
    GatewayError::Forbidden {
        command: command.to_string(),
        reason,
    }
}

fn pipeline_segments(command: &str) -> impl Iterator<Item = &str> {
    command
        .split(|c: char| c == '|' || c == ';' || c == '&')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn leading_tokens(command: &str) -> Vec<&str> {
    let end = command
        .find(|c: char| matches!(c, '|' | ';' | '&' | '>' | '<'))
        .unwrap_or(command.len());
    command[..end].split_whitespace().collect()
}

pub struct CommandGateway {
    policy: CommandPolicy,
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl CommandGateway {
    pub fn new(policy: CommandPolicy, runner: Arc<dyn ProcessRunner>, timeout: Duration) -> Self {
        Self {
            policy,
            runner,
            timeout,
            metrics: None,
        }
    }

    pub fn from_config(cfg: &GatewayConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self::new(
            CommandPolicy::new(&cfg.allowed_commands, &cfg.allowed_paths),
            runner,
            cfg.timeout(),
        )
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn execute(&self, command: &str) -> Result<CommandOutput, GatewayError> {
        let result = self.execute_inner(command).await;
        if let Some(metrics) = &self.metrics {
            let label = match &result {
                Ok(_) => "ok",
                Err(err) => err.outcome_label(),
            };
            metrics.inc_command(label);
        }
        result
    }

    async fn execute_inner(&self, command: &str) -> Result<CommandOutput, GatewayError> {
        if let Err(err) = self.policy.check(command) {
            warn!(command = %command.trim(), error = %err, "command rejected");
            return Err(err);
        }

        let output = match tokio::time::timeout(self.timeout, self.runner.run(command.trim())).await
        {
            Ok(result) => result?,
            Err(_elapsed) => return Err(GatewayError::Timeout(self.timeout)),
        };

        if !output.success {
            return Err(GatewayError::Failed {
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
