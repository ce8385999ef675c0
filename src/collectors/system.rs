use crate::collectors::{
    count_lines, count_rows, parse_ps_rows, truncate_chars, Battery, CollectError, Collector,
};
use crate::gateway::CommandGateway;
use crate::snapshot::{DiskUsage, LoadAverage, MemoryDetails, ProcessInfo, SystemSnapshot, UNKNOWN};
use async_trait::async_trait;
use std::sync::Arc;

const TOP_PROCESSES: usize = 5;
const COMMAND_WIDTH: usize = 30;
const PSEUDO_FILESYSTEMS: [&str; 3] = ["tmpfs", "udev", "devtmpfs"];

const HOSTNAME: &str = "hostname";
const KERNEL: &str = "uname -r";
const OS_RELEASE: &str = "cat /etc/os-release";
const UPTIME: &str = "uptime -p";
const LOADAVG: &str = "cat /proc/loadavg";
const NPROC: &str = "nproc";
const DF: &str = "df -h";
const PS: &str = "ps aux --sort=-%cpu";
const SOCKETS: &str = "ss -tuln";
const WHO: &str = "who";
const FREE: &str = "free";

pub struct SystemCollector {
    gateway: Arc<CommandGateway>,
}

impl SystemCollector {
    pub fn new(gateway: Arc<CommandGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Collector for SystemCollector {
    type Snapshot = SystemSnapshot;

    fn domain(&self) -> &'static str {
        "system"
    }

    async fn collect(&self) -> Result<SystemSnapshot, CollectError> {
        let gw = &self.gateway;
        let (hostname, kernel, os_release, uptime, loadavg, nproc, df, ps, sockets, who, free) = tokio::join!(
            gw.execute(HOSTNAME),
            gw.execute(KERNEL),
            gw.execute(OS_RELEASE),
            gw.execute(UPTIME),
            gw.execute(LOADAVG),
            gw.execute(NPROC),
            gw.execute(DF),
            gw.execute(PS),
            gw.execute(SOCKETS),
            gw.execute(WHO),
            gw.execute(FREE),
        );

        let mut battery = Battery::new(self.domain());
        let hostname = battery.settle(HOSTNAME, hostname);
        let kernel = battery.settle(KERNEL, kernel);
        let os_release = battery.settle(OS_RELEASE, os_release);
        let uptime = battery.settle(UPTIME, uptime);
        let loadavg = battery.settle(LOADAVG, loadavg);
        let nproc = battery.settle(NPROC, nproc);
        let df = battery.settle(DF, df);
        let ps = battery.settle(PS, ps);
        let sockets = battery.settle(SOCKETS, sockets);
        let who = battery.settle(WHO, who);
        let free = battery.settle(FREE, free);
        battery.finish()?;

        Ok(SystemSnapshot {
            hostname: hostname.as_deref().map_or_else(unknown, text_or_unknown),
            kernel: kernel.as_deref().map_or_else(unknown, text_or_unknown),
            distro: os_release
                .as_deref()
                .and_then(parse_pretty_name)
                .unwrap_or_else(unknown),
            uptime: uptime.as_deref().map_or_else(unknown, text_or_unknown),
            load: loadavg.as_deref().and_then(parse_loadavg).unwrap_or_default(),
            cpu_cores: nproc
                .as_deref()
                .and_then(|s| s.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(1),
            disks: df.as_deref().map(parse_df).unwrap_or_default(),
            top_processes: ps.as_deref().map(parse_top_processes).unwrap_or_default(),
            network_connections: sockets.as_deref().map_or(0, count_rows),
            active_users: who.as_deref().map_or(0, count_lines),
            memory: free.as_deref().and_then(parse_free).unwrap_or_default(),
        })
    }
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

fn text_or_unknown(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        unknown()
    } else {
        text.to_string()
    }
}

fn parse_pretty_name(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

fn parse_loadavg(text: &str) -> Option<LoadAverage> {
    let mut fields = text.split_whitespace().map(str::parse::<f64>);
    Some(LoadAverage {
        load1: fields.next()?.ok()?,
        load5: fields.next()?.ok()?,
        load15: fields.next()?.ok()?,
    })
}

fn parse_df(text: &str) -> Vec<DiskUsage> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 6 || PSEUDO_FILESYSTEMS.contains(&cols[0]) {
                return None;
            }
            Some(DiskUsage {
                filesystem: cols[0].to_string(),
                used: cols[2].to_string(),
                available: cols[3].to_string(),
                percent: cols[4].trim_end_matches('%').parse().ok()?,
            })
        })
        .collect()
}

fn parse_top_processes(text: &str) -> Vec<ProcessInfo> {
    parse_ps_rows(text)
        .take(TOP_PROCESSES)
        .map(|row| ProcessInfo {
            user: row.user.to_string(),
            pid: row.pid,
            cpu: row.cpu,
            mem: row.mem,
            command: truncate_chars(&row.command, COMMAND_WIDTH),
        })
        .collect()
}

fn parse_free(text: &str) -> Option<MemoryDetails> {
    let line = text.lines().find(|l| l.trim_start().starts_with("Mem:"))?;
    let nums: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse().ok())
        .collect::<Option<_>>()?;
    if nums.len() < 6 {
        return None;
    }
    let (total, used, free, available) = (nums[0], nums[1], nums[2], nums[5]);
    let percent = if total > 0 {
        ((used as f64 / total as f64) * 100.0).round() as u32
    } else {
        0
    };
    Some(MemoryDetails {
        total_kib: total,
        used_kib: used,
        free_kib: free,
        available_kib: available,
        percent,
    })
}
