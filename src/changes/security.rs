use crate::changes::{added, EventLog, Snapshot};
use crate::snapshot::{
    ActiveSession, FailedLogin, FieldValue, SecuritySnapshot, Severity, SshConnection, SudoEntry,
    SuspiciousProcess,
};

impl Snapshot for SecuritySnapshot {
    fn changes(previous: &Self, current: &Self, log: &mut EventLog) {
        let login_key = |l: &FailedLogin| (l.user.clone(), l.ip.clone(), l.time.clone());
        for login in added(&previous.failed_logins, &current.failed_logins, login_key) {
            log.push_about(
                "failedLogin",
                &login.ip,
                Severity::Warning,
                format!("Failed login for {} from {}", login.user, login.ip),
                FieldValue::Absent,
                login.time.as_str(),
            );
        }
        for login in added(&current.failed_logins, &previous.failed_logins, login_key) {
            log.push_about(
                "failedLogin",
                &login.ip,
                Severity::Info,
                format!(
                    "Failed login for {} from {} rotated out of the log window",
                    login.user, login.ip
                ),
                login.time.as_str(),
                FieldValue::Absent,
            );
        }

        let session_key = |s: &ActiveSession| (s.user.clone(), s.tty.clone());
        for session in added(&previous.active_users, &current.active_users, session_key) {
            log.push_about(
                "activeUser",
                &session.user,
                Severity::Info,
                format!(
                    "New session: {} on {} (from {})",
                    session.user, session.tty, session.from
                ),
                FieldValue::Absent,
                session.tty.as_str(),
            );
        }
        for session in added(&current.active_users, &previous.active_users, session_key) {
            log.push_about(
                "activeUser",
                &session.user,
                Severity::Info,
                format!("Session closed: {} on {}", session.user, session.tty),
                session.tty.as_str(),
                FieldValue::Absent,
            );
        }

        let sudo_key = |s: &SudoEntry| (s.user.clone(), s.command.clone(), s.time.clone());
        for entry in added(&previous.sudo_activity, &current.sudo_activity, sudo_key) {
            log.push_about(
                "sudoCommand",
                &entry.user,
                Severity::Warning,
                format!("{} ran sudo {}", entry.user, entry.command),
                FieldValue::Absent,
                entry.command.as_str(),
            );
        }

        let pid_key = |p: &SuspiciousProcess| p.pid;
        for process in added(
            &previous.suspicious_processes,
            &current.suspicious_processes,
            pid_key,
        ) {
            log.push_about(
                "suspiciousProcess",
                &process.pid.to_string(),
                Severity::Critical,
                format!(
                    "Suspicious process PID {} ({}) at {:.1}% CPU",
                    process.pid, process.command, process.cpu
                ),
                FieldValue::Absent,
                process.command.as_str(),
            );
        }

        let ip_key = |c: &SshConnection| c.ip.clone();
        for conn in added(
            &previous.open_ssh_connections,
            &current.open_ssh_connections,
            ip_key,
        ) {
            log.push_about(
                "sshConnection",
                &conn.ip,
                Severity::Warning,
                format!("New SSH connection from {}", conn.ip),
                FieldValue::Absent,
                conn.user.as_str(),
            );
        }
        for conn in added(
            &current.open_ssh_connections,
            &previous.open_ssh_connections,
            ip_key,
        ) {
            log.push_about(
                "sshConnection",
                &conn.ip,
                Severity::Info,
                format!("SSH connection from {} closed", conn.ip),
                conn.user.as_str(),
                FieldValue::Absent,
            );
        }

        let old = &previous.system_security_status;
        let new = &current.system_security_status;
        for (subject, label, before, after) in [
            ("firewall", "Firewall", &old.firewall, &new.firewall),
            ("selinux", "SELinux", &old.selinux, &new.selinux),
            ("apparmor", "AppArmor", &old.apparmor, &new.apparmor),
        ] {
            if before == after {
                continue;
            }
            let severity = if matches!(after.as_str(), "active" | "enforcing") {
                Severity::Info
            } else {
                Severity::Warning
            };
            log.push_about(
                "securityStatus",
                subject,
                severity,
                format!("{label} status changed: {before} → {after}"),
                before.as_str(),
                after.as_str(),
            );
        }
    }
}
