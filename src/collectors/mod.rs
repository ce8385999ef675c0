pub mod network;
pub mod security;
pub mod services;
pub mod system;

use crate::changes::Snapshot;
use crate::gateway::{CommandOutput, GatewayError};
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

pub use network::NetworkCollector;
pub use security::SecurityCollector;
pub use services::ServicesCollector;
pub use system::SystemCollector;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("all {attempted} {domain} commands failed")]
    AllCommandsFailed {
        domain: &'static str,
        attempted: usize,
    },
}

#[async_trait]
pub trait Collector: Send + Sync + 'static {
    type Snapshot: Snapshot;

    fn domain(&self) -> &'static str;

    async fn collect(&self) -> Result<Self::Snapshot, CollectError>;
}

pub(crate) struct Battery {
    domain: &'static str,
    attempted: usize,
    failed: usize,
}

impl Battery {
    pub(crate) fn new(domain: &'static str) -> Self {
        Self {
            domain,
            attempted: 0,
            failed: 0,
        }
    }

    pub(crate) fn settle(
        &mut self,
        command: &str,
        result: Result<CommandOutput, GatewayError>,
    ) -> Option<String> {
        self.attempted += 1;
        match result {
            Ok(output) => Some(output.stdout),
            Err(err) => {
                self.failed += 1;
                debug!(domain = self.domain, command, error = %err, "collector command failed");
                None
            }
        }
    }

    /// Like [`Battery::settle`], but keeps stdout of a non-zero exit.
    /// `systemctl is-active` prints the state and exits 3 when inactive.
    pub(crate) fn settle_lenient(
        &mut self,
        command: &str,
        result: Result<CommandOutput, GatewayError>,
    ) -> Option<String> {
        match result {
            Err(GatewayError::Failed { stdout, .. }) if !stdout.trim().is_empty() => {
                self.attempted += 1;
                Some(stdout)
            }
            other => self.settle(command, other),
        }
    }

    pub(crate) fn finish(self) -> Result<(), CollectError> {
        if self.attempted > 0 && self.failed == self.attempted {
            return Err(CollectError::AllCommandsFailed {
                domain: self.domain,
                attempted: self.attempted,
            });
        }
        Ok(())
    }
}

pub(crate) fn count_rows(text: &str) -> u32 {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .count()
        .saturating_sub(1) as u32
}

pub(crate) fn count_lines(text: &str) -> u32 {
    text.lines().filter(|l| !l.trim().is_empty()).count() as u32
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

pub(crate) struct PsRow<'a> {
    pub user: &'a str,
    pub pid: u32,
    pub cpu: f64,
    pub mem: f64,
    pub command: String,
}

pub(crate) fn parse_ps_rows(text: &str) -> impl Iterator<Item = PsRow<'_>> {
    text.lines().skip(1).filter_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 11 {
            return None;
        }
        Some(PsRow {
            user: cols[0],
            pid: cols[1].parse().ok()?,
            cpu: cols[2].parse().ok()?,
            mem: cols[3].parse().ok()?,
            command: cols[10..].join(" "),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ok(stdout: &str) -> Result<CommandOutput, GatewayError> {
        Ok(CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    #[test]
    fn battery_fails_only_when_every_command_failed() {
        let mut battery = Battery::new("system");
        assert_eq!(battery.settle("hostname", ok("web-1\n")), Some("web-1\n".to_string()));
        assert_eq!(
            battery.settle("nproc", Err(GatewayError::Timeout(Duration::from_secs(10)))),
            None
        );
        assert!(battery.finish().is_ok());

        let mut battery = Battery::new("network");
        battery.settle("ss -tun", Err(GatewayError::Empty));
        let err = battery.finish().unwrap_err();
        assert_eq!(err.to_string(), "all 1 network commands failed");
    }

    #[test]
    fn lenient_settle_keeps_state_printed_on_nonzero_exit() {
        let mut battery = Battery::new("security");
        let state = battery.settle_lenient(
            "systemctl is-active ufw",
            Err(GatewayError::Failed {
                code: Some(3),
                stdout: "inactive\n".to_string(),
                stderr: String::new(),
            }),
        );
        assert_eq!(state.as_deref(), Some("inactive\n"));
        assert!(battery.finish().is_ok());
    }

    #[test]
    fn ps_rows_skip_malformed_lines() {
        let text = "\
USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND
root 1 0.0 0.1 1000 200 ? Ss 09:00 0:01 /sbin/init splash
garbage line
www 42 x 1.0 1 1 ? S 09:00 0:00 nginx
";
        let rows: Vec<_> = parse_ps_rows(text).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pid, 1);
        assert_eq!(rows[0].command, "/sbin/init splash");
    }

    #[test]
    fn row_counts_ignore_header_and_blank_lines() {
        assert_eq!(count_rows("Netid State\nudp UNCONN\ntcp LISTEN\n\n"), 2);
        assert_eq!(count_rows(""), 0);
        assert_eq!(count_lines("a\n\nb\n"), 2);
    }
}
