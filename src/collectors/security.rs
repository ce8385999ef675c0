use crate::collectors::{parse_ps_rows, truncate_chars, Battery, CollectError, Collector};
use crate::gateway::CommandGateway;
use crate::snapshot::{
    ActiveSession, FailedLogin, LastLogin, SecuritySnapshot, SecurityStatus, SshConnection,
    SudoEntry, SuspiciousProcess,
};
use async_trait::async_trait;
use std::sync::Arc;

const MAX_FAILED_LOGINS: usize = 5;
const MAX_ACTIVE_USERS: usize = 8;
const MAX_SUDO: usize = 5;
const MAX_SUSPICIOUS: usize = 5;
const MAX_SSH: usize = 5;
const SUSPICIOUS_PERCENT: f64 = 80.0;
const COMMAND_WIDTH: usize = 40;
const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

const FAILED_PASSWORDS: &str = "grep \"Failed password\" /var/log/auth.log";
const WHO: &str = "who";
const SUDO_LOG: &str = "grep sudo: /var/log/auth.log";
const PROCESSES: &str = "ps aux";
const SSH_SESSIONS: &str = "ss -tn state established '( sport = :22 )'";
const LAST: &str = "last -n 5";
const FIREWALL: &str = "systemctl is-active ufw";
const SELINUX: &str = "getenforce";
const APPARMOR: &str = "systemctl is-active apparmor";

pub struct SecurityCollector {
    gateway: Arc<CommandGateway>,
}

impl SecurityCollector {
    pub fn new(gateway: Arc<CommandGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Collector for SecurityCollector {
    type Snapshot = SecuritySnapshot;

    fn domain(&self) -> &'static str {
        "security"
    }

    async fn collect(&self) -> Result<SecuritySnapshot, CollectError> {
        let gw = &self.gateway;
        let (failed, who, sudo, ps, ssh, last, firewall, selinux, apparmor) = tokio::join!(
            gw.execute(FAILED_PASSWORDS),
            gw.execute(WHO),
            gw.execute(SUDO_LOG),
            gw.execute(PROCESSES),
            gw.execute(SSH_SESSIONS),
            gw.execute(LAST),
            gw.execute(FIREWALL),
            gw.execute(SELINUX),
            gw.execute(APPARMOR),
        );

        // grep exits 1 on no match and 2 on a missing log; both mean "no events".
        let mut battery = Battery::new(self.domain());
        let failed = battery.settle(FAILED_PASSWORDS, failed);
        let who = battery.settle(WHO, who);
        let sudo = battery.settle(SUDO_LOG, sudo);
        let ps = battery.settle(PROCESSES, ps);
        let ssh = battery.settle(SSH_SESSIONS, ssh);
        let last = battery.settle(LAST, last);
        let firewall = battery.settle_lenient(FIREWALL, firewall);
        let selinux = battery.settle_lenient(SELINUX, selinux);
        let apparmor = battery.settle_lenient(APPARMOR, apparmor);
        battery.finish()?;

        let active_users = who.as_deref().map(parse_who).unwrap_or_default();
        let open_ssh_connections = ssh
            .as_deref()
            .map(|text| parse_ssh_peers(text, &active_users))
            .unwrap_or_default();

        let defaults = SecurityStatus::default();
        Ok(SecuritySnapshot {
            failed_logins: failed.as_deref().map(parse_failed_logins).unwrap_or_default(),
            active_users,
            sudo_activity: sudo.as_deref().map(parse_sudo).unwrap_or_default(),
            suspicious_processes: ps.as_deref().map(parse_suspicious).unwrap_or_default(),
            open_ssh_connections,
            last_logins: last.as_deref().map(parse_last).unwrap_or_default(),
            system_security_status: SecurityStatus {
                firewall: state_or(firewall.as_deref(), defaults.firewall),
                selinux: state_or(selinux.as_deref(), defaults.selinux),
                apparmor: state_or(apparmor.as_deref(), defaults.apparmor),
            },
        })
    }
}

fn state_or(output: Option<&str>, default: String) -> String {
    output
        .and_then(|s| s.lines().next())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
}

fn syslog_time(tokens: &[&str]) -> Option<String> {
    (tokens.len() >= 3).then(|| tokens[..3].join(" "))
}

fn token_after<'a>(tokens: &[&'a str], marker: &str) -> Option<&'a str> {
    let idx = tokens.iter().position(|t| *t == marker)?;
    tokens.get(idx + 1).copied()
}

fn most_recent<T>(mut items: Vec<T>, max: usize) -> Vec<T> {
    let excess = items.len().saturating_sub(max);
    items.drain(..excess);
    items
}

fn parse_failed_logins(text: &str) -> Vec<FailedLogin> {
    let entries = text
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let time = syslog_time(&tokens)?;
            let mut user = token_after(&tokens, "for")?;
            if user == "invalid" {
                user = token_after(&tokens, "user")?;
            }
            let ip = token_after(&tokens, "from")?;
            Some(FailedLogin {
                user: user.to_string(),
                ip: ip.to_string(),
                time,
            })
        })
        .collect();
    most_recent(entries, MAX_FAILED_LOGINS)
}

fn parse_who(text: &str) -> Vec<ActiveSession> {
    text.lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 3 {
                return None;
            }
            let from = tokens
                .iter()
                .find(|t| t.starts_with('(') && t.ends_with(')'))
                .map(|t| t.trim_matches(|c: char| c == '(' || c == ')').to_string())
                .unwrap_or_else(|| "local".to_string());
            let login_time = tokens[2..]
                .iter()
                .take_while(|t| !t.starts_with('('))
                .copied()
                .collect::<Vec<_>>()
                .join(" ");
            Some(ActiveSession {
                user: tokens[0].to_string(),
                tty: tokens[1].to_string(),
                from,
                login_time,
            })
        })
        .take(MAX_ACTIVE_USERS)
        .collect()
}

/// `... sudo:    alice : TTY=pts/0 ; PWD=/home/alice ; USER=root ; COMMAND=/usr/bin/apt update`
fn parse_sudo(text: &str) -> Vec<SudoEntry> {
    let entries = text
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let time = syslog_time(&tokens)?;
            let (_, rest) = line.split_once("sudo:")?;
            let (user, details) = rest.split_once(" : ")?;
            let (_, command) = details.split_once("COMMAND=")?;
            Some(SudoEntry {
                user: user.trim().to_string(),
                command: command.trim().to_string(),
                time,
            })
        })
        .collect();
    most_recent(entries, MAX_SUDO)
}

fn parse_suspicious(text: &str) -> Vec<SuspiciousProcess> {
    parse_ps_rows(text)
        .filter(|row| row.cpu > SUSPICIOUS_PERCENT || row.mem > SUSPICIOUS_PERCENT)
        .take(MAX_SUSPICIOUS)
        .map(|row| SuspiciousProcess {
            pid: row.pid,
            user: row.user.to_string(),
            command: truncate_chars(&row.command, COMMAND_WIDTH),
            cpu: row.cpu,
        })
        .collect()
}

/// Peers of established connections to port 22. With a state filter `ss`
/// drops the State column: `Recv-Q Send-Q Local:Port Peer:Port`.
fn parse_ssh_peers(text: &str, sessions: &[ActiveSession]) -> Vec<SshConnection> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let peer = tokens.get(3)?;
            let ip = strip_port(peer)?;
            let session = sessions.iter().find(|s| s.from == ip);
            Some(SshConnection {
                user: session.map_or_else(|| "unknown".to_string(), |s| s.user.clone()),
                ip,
                time: session.map_or_else(|| "established".to_string(), |s| s.login_time.clone()),
            })
        })
        .take(MAX_SSH)
        .collect()
}

fn strip_port(addr: &str) -> Option<String> {
    let (host, port) = addr.rsplit_once(':')?;
    if port.is_empty() {
        return None;
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = host.strip_prefix("::ffff:").unwrap_or(host);
    Some(host.to_string())
}

fn parse_last(text: &str) -> Vec<LastLogin> {
    text.lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 4 || tokens[0] == "wtmp" || tokens[0] == "reboot" {
                return None;
            }
            let (from, time_start) = if WEEKDAYS.contains(&tokens[2]) {
                ("local", 2)
            } else {
                (tokens[2], 3)
            };
            Some(LastLogin {
                user: tokens[0].to_string(),
                tty: tokens[1].to_string(),
                from: from.to_string(),
                time: tokens[time_start..].join(" "),
            })
        })
        .collect()
}
