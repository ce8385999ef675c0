use crate::changes::{added, format_bytes, EventLog, Snapshot};
use crate::snapshot::{FieldValue, NetworkSnapshot, Severity, NOT_AVAILABLE};

const CONNECTION_NOISE: u32 = 10;
const CONNECTION_SURGE: u32 = 50;

impl Snapshot for NetworkSnapshot {
    fn changes(previous: &Self, current: &Self, log: &mut EventLog) {
        if previous.public_ip != current.public_ip {
            let severity = if current.public_ip == NOT_AVAILABLE {
                Severity::Critical
            } else {
                Severity::Warning
            };
            log.push(
                "publicIP",
                severity,
                format!(
                    "Public IP changed from {} to {}",
                    previous.public_ip, current.public_ip
                ),
                previous.public_ip.as_str(),
                current.public_ip.as_str(),
            );
        }

        if previous.internet_connected != current.internet_connected {
            let (severity, verb) = if current.internet_connected {
                (Severity::Info, "restored")
            } else {
                (Severity::Critical, "lost")
            };
            log.push(
                "internetConnected",
                severity,
                format!("Internet connection {verb}"),
                previous.internet_connected,
                current.internet_connected,
            );
        }

        if previous.vpn_status.connected != current.vpn_status.connected {
            let verb = if current.vpn_status.connected {
                "connected"
            } else {
                "disconnected"
            };
            log.push(
                "vpnStatus",
                Severity::Info,
                format!("VPN {verb}"),
                previous.vpn_status.connected,
                current.vpn_status.connected,
            );
        }

        for server in added(&current.dns_servers, &previous.dns_servers, |s| s.clone()) {
            log.push_about(
                "dnsServers",
                server,
                Severity::Warning,
                format!("DNS server {server} removed"),
                server.as_str(),
                FieldValue::Absent,
            );
        }
        for server in added(&previous.dns_servers, &current.dns_servers, |s| s.clone()) {
            log.push_about(
                "dnsServers",
                server,
                Severity::Warning,
                format!("DNS server {server} added"),
                FieldValue::Absent,
                server.as_str(),
            );
        }

        for old in &previous.interfaces {
            let Some(new) = current.interfaces.iter().find(|i| i.name == old.name) else {
                let severity = if old.is_important {
                    Severity::Warning
                } else {
                    Severity::Info
                };
                log.push_about(
                    "interfaces",
                    &old.name,
                    severity,
                    format!("Network interface {} removed", old.name),
                    old.ip.as_str(),
                    FieldValue::Absent,
                );
                continue;
            };

            if old.ip != new.ip {
                log.push_about(
                    "interfaceIP",
                    &old.name,
                    Severity::Warning,
                    format!(
                        "Interface {} IP changed from {} to {}",
                        old.name, old.ip, new.ip
                    ),
                    old.ip.as_str(),
                    new.ip.as_str(),
                );
            }
            if grew_by_more_than_tenth(old.rx_bytes, new.rx_bytes) {
                log.push_about(
                    "interfaceRX",
                    &old.name,
                    Severity::Info,
                    format!(
                        "High download activity on {}: {}",
                        old.name,
                        format_bytes(new.rx_bytes)
                    ),
                    old.rx_bytes,
                    new.rx_bytes,
                );
            }
            if grew_by_more_than_tenth(old.tx_bytes, new.tx_bytes) {
                log.push_about(
                    "interfaceTX",
                    &old.name,
                    Severity::Info,
                    format!(
                        "High upload activity on {}: {}",
                        old.name,
                        format_bytes(new.tx_bytes)
                    ),
                    old.tx_bytes,
                    new.tx_bytes,
                );
            }
        }

        for new in added(&previous.interfaces, &current.interfaces, |i| i.name.clone()) {
            log.push_about(
                "interfaces",
                &new.name,
                Severity::Info,
                format!("New network interface {} detected ({})", new.name, new.ip),
                FieldValue::Absent,
                new.ip.as_str(),
            );
        }

        let (old_count, new_count) = (previous.connection_count, current.connection_count);
        if old_count.abs_diff(new_count) > CONNECTION_NOISE {
            let severity = if new_count > old_count.saturating_add(CONNECTION_SURGE) {
                Severity::Warning
            } else {
                Severity::Info
            };
            log.push(
                "connectionCount",
                severity,
                format!("Network connections changed: {old_count} → {new_count}"),
                old_count,
                new_count,
            );
        }
    }
}

/// Kernel counters only grow; a drop means a counter reset and is ignored.
fn grew_by_more_than_tenth(old: u64, new: u64) -> bool {
    new > old && (new - old) as f64 / old.max(1) as f64 > 0.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::diff;
    use crate::snapshot::{InterfaceType, NetworkInterface};

    fn iface(name: &str, ip: &str) -> NetworkInterface {
        let kind = InterfaceType::classify(name);
        NetworkInterface {
            name: name.to_string(),
            ip: ip.to_string(),
            status: "UP".to_string(),
            kind,
            priority: kind.priority(),
            rx_bytes: 1_000,
            tx_bytes: 1_000,
            is_important: kind.is_important(),
        }
    }

    fn with_interfaces(interfaces: Vec<NetworkInterface>) -> NetworkSnapshot {
        NetworkSnapshot {
            interfaces,
            public_ip: "203.0.113.7".to_string(),
            internet_connected: true,
            connection_count: 40,
            ..NetworkSnapshot::default()
        }
    }

    #[test]
    fn interface_ip_change_is_a_single_event() {
        let previous = with_interfaces(vec![iface("eth0", "10.0.0.5")]);
        let current = with_interfaces(vec![iface("eth0", "10.0.0.9")]);

        let events = diff(Some(&previous), &current, 1);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.field, "interfaceIP");
        assert_eq!(event.severity, Severity::Warning);
        assert_eq!(event.previous_value, FieldValue::Text("10.0.0.5".to_string()));
        assert_eq!(event.new_value, FieldValue::Text("10.0.0.9".to_string()));
    }

    #[test]
    fn identical_snapshots_produce_nothing() {
        let snapshot = with_interfaces(vec![iface("eth0", "10.0.0.5"), iface("lo", "127.0.0.1")]);
        assert!(diff(Some(&snapshot), &snapshot.clone(), 1).is_empty());
    }

    #[test]
    fn losing_connectivity_is_critical() {
        let previous = with_interfaces(Vec::new());
        let current = NetworkSnapshot {
            public_ip: NOT_AVAILABLE.to_string(),
            internet_connected: false,
            ..previous.clone()
        };

        let events = diff(Some(&previous), &current, 1);
        let fields: Vec<(&str, Severity)> = events
            .iter()
            .map(|e| (e.field.as_str(), e.severity))
            .collect();
        assert_eq!(
            fields,
            [
                ("publicIP", Severity::Critical),
                ("internetConnected", Severity::Critical)
            ]
        );
    }

    #[test]
    fn interface_membership_and_traffic() {
        let previous = with_interfaces(vec![iface("eth0", "10.0.0.5"), iface("docker0", "172.17.0.1")]);
        let mut busy = iface("eth0", "10.0.0.5");
        busy.rx_bytes = 1_101;
        busy.tx_bytes = 1_100;
        let current = with_interfaces(vec![busy, iface("wlan0", "192.168.1.4")]);

        let events = diff(Some(&previous), &current, 1);
        let fields: Vec<(&str, Option<&str>, Severity)> = events
            .iter()
            .map(|e| (e.field.as_str(), e.subject.as_deref(), e.severity))
            .collect();
        assert_eq!(
            fields,
            [
                ("interfaceRX", Some("eth0"), Severity::Info),
                ("interfaces", Some("docker0"), Severity::Info),
                ("interfaces", Some("wlan0"), Severity::Info),
            ]
        );
    }

    #[test]
    fn removing_an_important_interface_warns() {
        let previous = with_interfaces(vec![iface("eth0", "10.0.0.5")]);
        let current = with_interfaces(Vec::new());

        let events = diff(Some(&previous), &current, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warning);
        assert_eq!(events[0].new_value, FieldValue::Absent);
    }

    #[test]
    fn dns_changes_report_removals_before_additions() {
        let previous = NetworkSnapshot {
            dns_servers: vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()],
            ..with_interfaces(Vec::new())
        };
        let current = NetworkSnapshot {
            dns_servers: vec!["8.8.8.8".to_string(), "9.9.9.9".to_string()],
            ..with_interfaces(Vec::new())
        };

        let events = diff(Some(&previous), &current, 1);
        let messages: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            ["DNS server 1.1.1.1 removed", "DNS server 9.9.9.9 added"]
        );
    }

    #[test]
    fn connection_count_surges_warn() {
        let previous = with_interfaces(Vec::new());
        let mut current = previous.clone();

        current.connection_count = 50;
        assert!(diff(Some(&previous), &current, 1).is_empty());

        current.connection_count = 60;
        assert_eq!(diff(Some(&previous), &current, 1)[0].severity, Severity::Info);

        current.connection_count = 91;
        assert_eq!(diff(Some(&previous), &current, 1)[0].severity, Severity::Warning);
    }

    #[test]
    fn counter_reset_is_not_activity() {
        assert!(!grew_by_more_than_tenth(5_000, 10));
        assert!(!grew_by_more_than_tenth(1_000, 1_100));
        assert!(grew_by_more_than_tenth(1_000, 1_101));
        assert!(grew_by_more_than_tenth(0, 1));
    }
}
