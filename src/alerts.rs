use crate::snapshot::{ServiceState, ServicesSnapshot, Severity, SystemSnapshot};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub level: AlertLevel,
    pub source: String,
    pub message: String,
    pub timestamp: i64,
}

pub fn derive_alerts(
    system: Option<&SystemSnapshot>,
    services: Option<&ServicesSnapshot>,
    now_ms: i64,
) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let mut push = |source: String, level: AlertLevel, message: String| {
        alerts.push(Alert {
            id: format!("{source}-{now_ms}"),
            level,
            source,
            message,
            timestamp: now_ms,
        });
    };

    if let Some(services) = services {
        for service in &services.services {
            let level = match service.status {
                ServiceState::Error => AlertLevel::Critical,
                ServiceState::Stopped => AlertLevel::Warning,
                ServiceState::Running | ServiceState::Pending => continue,
            };
            push(
                format!("service:{}", service.id),
                level,
                format!("Service {} ({}) is {}", service.name, service.id, service.status),
            );
        }
    }

    if let Some(system) = system {
        if let Some(level) = usage_level(system.memory.percent) {
            push(
                "memory".to_string(),
                level,
                format!("Memory usage at {}%", system.memory.percent),
            );
        }
        for disk in &system.disks {
            if let Some(level) = usage_level(disk.percent) {
                push(
                    format!("disk:{}", disk.filesystem),
                    level,
                    format!("Disk usage on {} at {}%", disk.filesystem, disk.percent),
                );
            }
        }
        let cores = system.cpu_cores.max(1);
        if system.load.load1 > f64::from(cores) {
            push(
                "load".to_string(),
                AlertLevel::Critical,
                format!(
                    "Load average {:.2} exceeds {cores} CPU cores",
                    system.load.load1
                ),
            );
        }
    }

    alerts
}

fn usage_level(percent: u32) -> Option<AlertLevel> {
    match Severity::for_usage_percent(percent) {
        Severity::Critical => Some(AlertLevel::Critical),
        Severity::Warning => Some(AlertLevel::Warning),
        Severity::Info => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{DiskUsage, LoadAverage, MemoryDetails, ServiceStatus};

    fn service(id: &str, status: ServiceState) -> ServiceStatus {
        ServiceStatus {
            id: id.to_string(),
            name: id.to_string(),
            status,
            details: None,
        }
    }

    #[test]
    fn failed_service_is_a_single_critical_alert() {
        let services = ServicesSnapshot {
            services: vec![service("nginx", ServiceState::Error)],
        };

        let alerts = derive_alerts(None, Some(&services), 7);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert!(alerts[0].message.contains("nginx"));
        assert_eq!(alerts[0].timestamp, 7);
    }

    #[test]
    fn running_and_pending_services_are_quiet() {
        let services = ServicesSnapshot {
            services: vec![
                service("nginx", ServiceState::Running),
                service("mysql", ServiceState::Pending),
                service("ssh", ServiceState::Stopped),
            ],
        };

        let alerts = derive_alerts(None, Some(&services), 1);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
        assert_eq!(alerts[0].source, "service:ssh");
    }

    #[test]
    fn system_thresholds() {
        let system = SystemSnapshot {
            cpu_cores: 2,
            load: LoadAverage {
                load1: 2.5,
                ..LoadAverage::default()
            },
            memory: MemoryDetails {
                percent: 70,
                ..MemoryDetails::default()
            },
            disks: vec![
                DiskUsage {
                    filesystem: "/dev/sda1".to_string(),
                    used: "90G".to_string(),
                    available: "5G".to_string(),
                    percent: 95,
                },
                DiskUsage {
                    filesystem: "/dev/sdb1".to_string(),
                    used: "1G".to_string(),
                    available: "99G".to_string(),
                    percent: 1,
                },
            ],
            ..SystemSnapshot::default()
        };

        let alerts = derive_alerts(Some(&system), None, 1);
        let summary: Vec<(&str, AlertLevel)> = alerts
            .iter()
            .map(|a| (a.source.as_str(), a.level))
            .collect();
        assert_eq!(
            summary,
            [
                ("memory", AlertLevel::Warning),
                ("disk:/dev/sda1", AlertLevel::Critical),
                ("load", AlertLevel::Critical),
            ]
        );
    }

    #[test]
    fn nothing_known_means_no_alerts() {
        assert!(derive_alerts(None, None, 1).is_empty());
        assert!(derive_alerts(Some(&SystemSnapshot::default()), None, 1).is_empty());
    }
}
