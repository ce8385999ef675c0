use crate::gateway::CommandGateway;
use serde::Serialize;
use std::path::Path;
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tracing::{debug, warn};

pub const ACCESS_ERROR_PREFIX: &str = "[ACCESS ERROR]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFileInfo {
    pub path: String,
    pub name: String,
    pub size_bytes: u64,
    pub last_modified: Option<i64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogsError {
    #[error("Invalid file path")]
    InvalidPath,
}

pub async fn list_available(files: &[String]) -> Vec<LogFileInfo> {
    let mut available = Vec::new();
    for path in files {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(err) => {
                debug!(path = %path, error = %err, "log file not available");
                continue;
            }
        };
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        available.push(LogFileInfo {
            path: path.clone(),
            name,
            size_bytes: metadata.len(),
            last_modified,
        });
    }
    available
}

pub async fn tail(
    gateway: &CommandGateway,
    file: &str,
    limit: u32,
) -> Result<Vec<String>, LogsError> {
    validate_path(file)?;
    match gateway.execute(&format!("tail -n {limit} {file}")).await {
        Ok(output) => Ok(output
            .stdout
            .trim_end_matches('\n')
            .split('\n')
            .map(str::to_string)
            .collect()),
        Err(err) => {
            warn!(file, error = %err, "log read failed");
            Ok(vec![format!(
                "{ACCESS_ERROR_PREFIX} Could not read {file}: {err}"
            )])
        }
    }
}

/// The path is spliced into a shell line, so only plain absolute paths pass.
fn validate_path(file: &str) -> Result<(), LogsError> {
    let plain = file.starts_with('/')
        && !file.contains("..")
        && !file.chars().any(|c| {
            c.is_whitespace()
                || matches!(c, ';' | '|' | '&' | '$' | '`' | '<' | '>' | '\'' | '"' | '\\' | '*' | '?')
        });
    if plain {
        Ok(())
    } else {
        Err(LogsError::InvalidPath)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tests::{gateway_with, ScriptedRunner};
    use std::sync::Arc;

    #[tokio::test]
    async fn tails_through_the_gateway() {
        let runner = Arc::new(
            ScriptedRunner::new().ok("tail -n 2 /var/log/syslog", "line one\nline two\n"),
        );
        let gateway = gateway_with(runner.clone());

        let lines = tail(&gateway, "/var/log/syslog", 2).await.unwrap();
        assert_eq!(lines, ["line one", "line two"]);
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn traversal_is_rejected_without_running_anything() {
        let runner = Arc::new(ScriptedRunner::new());
        let gateway = gateway_with(runner.clone());

        for file in ["/var/log/../../etc/shadow", "/var/log/syslog; reboot", "syslog"] {
            assert_eq!(
                tail(&gateway, file, 10).await,
                Err(LogsError::InvalidPath),
                "{file}"
            );
        }
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn forbidden_path_is_an_access_error_line() {
        let runner = Arc::new(ScriptedRunner::new());
        let gateway = gateway_with(runner.clone());

        let lines = tail(&gateway, "/root/.bash_history", 10).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with(ACCESS_ERROR_PREFIX));
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn unreadable_file_is_an_access_error_line() {
        let runner = Arc::new(ScriptedRunner::new().fail(
            "tail -n 5 /var/log/auth.log",
            1,
            "Permission denied",
        ));
        let gateway = gateway_with(runner);

        let lines = tail(&gateway, "/var/log/auth.log", 5).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Permission denied"));
    }

    #[tokio::test]
    async fn lists_only_existing_files() {
        let dir = std::env::temp_dir().join(format!("sentineld-logs-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let present = dir.join("app.log");
        std::fs::write(&present, b"hello\n").unwrap();
        let missing = dir.join("missing.log");

        let files = vec![
            missing.to_string_lossy().into_owned(),
            present.to_string_lossy().into_owned(),
        ];
        let listed = list_available(&files).await;
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "app.log");
        assert_eq!(listed[0].size_bytes, 6);
        assert!(listed[0].last_modified.is_some());
    }
}
