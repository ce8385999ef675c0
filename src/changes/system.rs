use crate::changes::{EventLog, Snapshot};
use crate::snapshot::{Severity, SystemSnapshot};

const SOCKET_NOISE: u32 = 10;

impl Snapshot for SystemSnapshot {
    fn changes(previous: &Self, current: &Self, log: &mut EventLog) {
        let (old_load, new_load) = (previous.load.load1, current.load.load1);
        if old_load != new_load {
            log.push(
                "load1",
                load_severity(new_load, current.cpu_cores),
                format!("Load average (1m) changed from {old_load:.2} to {new_load:.2}"),
                old_load,
                new_load,
            );
        }

        let (old_mem, new_mem) = (previous.memory.percent, current.memory.percent);
        if old_mem != new_mem {
            log.push(
                "memoryPercent",
                Severity::for_usage_percent(new_mem),
                format!("Memory usage changed from {old_mem}% to {new_mem}%"),
                old_mem,
                new_mem,
            );
        }

        for disk in &current.disks {
            let Some(old) = previous
                .disks
                .iter()
                .find(|d| d.filesystem == disk.filesystem)
            else {
                continue;
            };
            if old.percent != disk.percent {
                log.push_about(
                    "diskPercent",
                    &disk.filesystem,
                    Severity::for_usage_percent(disk.percent),
                    format!(
                        "Disk usage on {} changed from {}% to {}%",
                        disk.filesystem, old.percent, disk.percent
                    ),
                    old.percent,
                    disk.percent,
                );
            }
        }

        let (old_sockets, new_sockets) =
            (previous.network_connections, current.network_connections);
        if old_sockets.abs_diff(new_sockets) > SOCKET_NOISE {
            log.push(
                "listeningSockets",
                Severity::Info,
                format!("Listening sockets changed from {old_sockets} to {new_sockets}"),
                old_sockets,
                new_sockets,
            );
        }

        let (old_users, new_users) = (previous.active_users, current.active_users);
        if old_users != new_users {
            log.push(
                "activeUsers",
                Severity::Info,
                format!("Active sessions changed from {old_users} to {new_users}"),
                old_users,
                new_users,
            );
        }
    }
}

fn load_severity(load1: f64, cores: u32) -> Severity {
    let cores = f64::from(cores.max(1));
    if load1 > cores {
        Severity::Critical
    } else if load1 > cores * 0.8 {
        Severity::Warning
    } else {
        Severity::Info
    }
}
