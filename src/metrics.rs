use crate::snapshot::{NetworkSnapshot, ServiceState, ServicesSnapshot, Severity, SystemSnapshot};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub sentinel_memory_usage_percent: Gauge,
    pub sentinel_load1: Gauge,
    pub sentinel_cpu_cores: Gauge,
    pub sentinel_disk_usage_percent: GaugeVec,
    pub sentinel_listening_sockets: Gauge,
    pub sentinel_active_users: Gauge,
    pub sentinel_net_rx_bytes_total: GaugeVec,
    pub sentinel_net_tx_bytes_total: GaugeVec,
    pub sentinel_net_connections: Gauge,
    pub sentinel_internet_connected: Gauge,
    pub sentinel_service_up: GaugeVec,
    pub sentinel_last_fetch_timestamp_seconds: GaugeVec,
    pub sentinel_uptime_seconds: Gauge,
    pub sentinel_commands_total: CounterVec,
    pub sentinel_fetch_total: CounterVec,
    pub sentinel_update_events_total: CounterVec,
    pub sentinel_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let sentinel_memory_usage_percent = Gauge::with_opts(opts!(
            "sentinel_memory_usage_percent",
            "Used memory in percent of total, from `free`"
        ))?;
        let sentinel_load1 =
            Gauge::with_opts(opts!("sentinel_load1", "One-minute load average"))?;
        let sentinel_cpu_cores =
            Gauge::with_opts(opts!("sentinel_cpu_cores", "Online CPU cores, from `nproc`"))?;
        let sentinel_disk_usage_percent = GaugeVec::new(
            opts!(
                "sentinel_disk_usage_percent",
                "Disk usage in percent by filesystem"
            ),
            &["filesystem"],
        )?;
        let sentinel_listening_sockets = Gauge::with_opts(opts!(
            "sentinel_listening_sockets",
            "Listening TCP/UDP sockets"
        ))?;
        let sentinel_active_users =
            Gauge::with_opts(opts!("sentinel_active_users", "Logged-in sessions"))?;
        let sentinel_net_rx_bytes_total = GaugeVec::new(
            opts!(
                "sentinel_net_rx_bytes_total",
                "Kernel receive byte counter per interface"
            ),
            &["iface"],
        )?;
        let sentinel_net_tx_bytes_total = GaugeVec::new(
            opts!(
                "sentinel_net_tx_bytes_total",
                "Kernel transmit byte counter per interface"
            ),
            &["iface"],
        )?;
        let sentinel_net_connections = Gauge::with_opts(opts!(
            "sentinel_net_connections",
            "Open TCP/UDP connections"
        ))?;
        let sentinel_internet_connected = Gauge::with_opts(opts!(
            "sentinel_internet_connected",
            "1 when the public IP lookup succeeded"
        ))?;
        let sentinel_service_up = GaugeVec::new(
            opts!("sentinel_service_up", "1 when the unit is active"),
            &["service"],
        )?;
        let sentinel_last_fetch_timestamp_seconds = GaugeVec::new(
            opts!(
                "sentinel_last_fetch_timestamp_seconds",
                "Unix time of the last successful fetch per domain"
            ),
            &["domain"],
        )?;
        let sentinel_uptime_seconds =
            Gauge::with_opts(opts!("sentinel_uptime_seconds", "Daemon uptime in seconds"))?;
        let sentinel_commands_total = CounterVec::new(
            opts!(
                "sentinel_commands_total",
                "Gateway command executions by outcome"
            ),
            &["outcome"],
        )?;
        let sentinel_fetch_total = CounterVec::new(
            opts!(
                "sentinel_fetch_total",
                "Polling fetch cycles by domain and outcome"
            ),
            &["domain", "outcome"],
        )?;
        let sentinel_update_events_total = CounterVec::new(
            opts!(
                "sentinel_update_events_total",
                "Change events emitted by domain and severity"
            ),
            &["domain", "severity"],
        )?;
        let sentinel_scrape_count_total = Counter::with_opts(opts!(
            "sentinel_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &sentinel_memory_usage_percent)?;
        register(&registry, &sentinel_load1)?;
        register(&registry, &sentinel_cpu_cores)?;
        register(&registry, &sentinel_disk_usage_percent)?;
        register(&registry, &sentinel_listening_sockets)?;
        register(&registry, &sentinel_active_users)?;
        register(&registry, &sentinel_net_rx_bytes_total)?;
        register(&registry, &sentinel_net_tx_bytes_total)?;
        register(&registry, &sentinel_net_connections)?;
        register(&registry, &sentinel_internet_connected)?;
        register(&registry, &sentinel_service_up)?;
        register(&registry, &sentinel_last_fetch_timestamp_seconds)?;
        register(&registry, &sentinel_uptime_seconds)?;
        register(&registry, &sentinel_commands_total)?;
        register(&registry, &sentinel_fetch_total)?;
        register(&registry, &sentinel_update_events_total)?;
        register(&registry, &sentinel_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            sentinel_memory_usage_percent,
            sentinel_load1,
            sentinel_cpu_cores,
            sentinel_disk_usage_percent,
            sentinel_listening_sockets,
            sentinel_active_users,
            sentinel_net_rx_bytes_total,
            sentinel_net_tx_bytes_total,
            sentinel_net_connections,
            sentinel_internet_connected,
            sentinel_service_up,
            sentinel_last_fetch_timestamp_seconds,
            sentinel_uptime_seconds,
            sentinel_commands_total,
            sentinel_fetch_total,
            sentinel_update_events_total,
            sentinel_scrape_count_total,
        }))
    }

    pub fn update_from_system(&self, snapshot: &SystemSnapshot) {
        self.sentinel_memory_usage_percent
            .set(snapshot.memory.percent as f64);
        self.sentinel_load1.set(snapshot.load.load1);
        self.sentinel_cpu_cores.set(snapshot.cpu_cores as f64);
        self.sentinel_listening_sockets
            .set(snapshot.network_connections as f64);
        self.sentinel_active_users.set(snapshot.active_users as f64);

        self.sentinel_disk_usage_percent.reset();
        for disk in &snapshot.disks {
            self.sentinel_disk_usage_percent
                .with_label_values(&[&disk.filesystem])
                .set(disk.percent as f64);
        }
    }

    pub fn update_from_network(&self, snapshot: &NetworkSnapshot) {
        self.sentinel_net_rx_bytes_total.reset();
        self.sentinel_net_tx_bytes_total.reset();
        for iface in &snapshot.interfaces {
            self.sentinel_net_rx_bytes_total
                .with_label_values(&[&iface.name])
                .set(iface.rx_bytes as f64);
            self.sentinel_net_tx_bytes_total
                .with_label_values(&[&iface.name])
                .set(iface.tx_bytes as f64);
        }
        self.sentinel_net_connections
            .set(snapshot.connection_count as f64);
        self.sentinel_internet_connected
            .set(if snapshot.internet_connected { 1.0 } else { 0.0 });
    }

    pub fn update_from_services(&self, snapshot: &ServicesSnapshot) {
        self.sentinel_service_up.reset();
        for service in &snapshot.services {
            let up = if service.status == ServiceState::Running {
                1.0
            } else {
                0.0
            };
            self.sentinel_service_up
                .with_label_values(&[&service.id])
                .set(up);
        }
    }

    pub fn record_fetch(&self, domain: &str, ok: bool, now_unix: i64) {
        let outcome = if ok { "ok" } else { "error" };
        self.sentinel_fetch_total
            .with_label_values(&[domain, outcome])
            .inc();
        if ok {
            self.sentinel_last_fetch_timestamp_seconds
                .with_label_values(&[domain])
                .set(now_unix as f64);
        }
    }

    pub fn inc_update_event(&self, domain: &str, severity: Severity) {
        self.sentinel_update_events_total
            .with_label_values(&[domain, severity.as_str()])
            .inc();
    }

    pub fn inc_command(&self, outcome: &str) {
        self.sentinel_commands_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.sentinel_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let uptime = now_unix().saturating_sub(self.started_at_unix) as f64;
        self.sentinel_uptime_seconds.set(uptime);

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{DiskUsage, LoadAverage, MemoryDetails, ServiceStatus};

    #[test]
    fn system_snapshot_populates_gauges() {
        let metrics = Metrics::new().expect("metrics init");
        let snapshot = SystemSnapshot {
            cpu_cores: 4,
            load: LoadAverage {
                load1: 1.5,
                load5: 1.0,
                load15: 0.5,
            },
            memory: MemoryDetails {
                percent: 42,
                ..MemoryDetails::default()
            },
            disks: vec![DiskUsage {
                filesystem: "/dev/sda1".to_string(),
                used: "40G".to_string(),
                available: "60G".to_string(),
                percent: 40,
            }],
            ..SystemSnapshot::default()
        };
        metrics.update_from_system(&snapshot);

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("sentinel_memory_usage_percent 42"));
        assert!(text.contains("sentinel_disk_usage_percent{filesystem=\"/dev/sda1\"} 40"));
        assert!(text.contains("sentinel_uptime_seconds"));
    }

    #[test]
    fn services_gauge_reflects_running_state() {
        let metrics = Metrics::new().expect("metrics init");
        let snapshot = ServicesSnapshot {
            services: vec![
                ServiceStatus {
                    id: "nginx".to_string(),
                    name: "Nginx".to_string(),
                    status: ServiceState::Running,
                    details: None,
                },
                ServiceStatus {
                    id: "mysql".to_string(),
                    name: "MySQL".to_string(),
                    status: ServiceState::Error,
                    details: None,
                },
            ],
        };
        metrics.update_from_services(&snapshot);

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("sentinel_service_up{service=\"nginx\"} 1"));
        assert!(text.contains("sentinel_service_up{service=\"mysql\"} 0"));
    }
}
