use crate::collectors::{count_rows, Battery, CollectError, Collector};
use crate::gateway::CommandGateway;
use crate::snapshot::{InterfaceType, NetworkInterface, NetworkSnapshot, VpnStatus, NOT_AVAILABLE};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

const MAX_DNS_SERVERS: usize = 3;
const VPN_DAEMONS: [&str; 3] = ["openvpn", "wireguard", "wg-quick"];

const ADDRESSES: &str = "ip -o -4 addr show";
const COUNTERS: &str = "cat /proc/net/dev";
const PUBLIC_IP: &str = "curl -s --connect-timeout 5 https://ipinfo.io/ip";
const RESOLV_CONF: &str = "cat /etc/resolv.conf";
const PROCESSES: &str = "ps aux";
const CONNECTIONS: &str = "ss -tun";

pub struct NetworkCollector {
    gateway: Arc<CommandGateway>,
}

impl NetworkCollector {
    pub fn new(gateway: Arc<CommandGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Collector for NetworkCollector {
    type Snapshot = NetworkSnapshot;

    fn domain(&self) -> &'static str {
        "network"
    }

    async fn collect(&self) -> Result<NetworkSnapshot, CollectError> {
        let gw = &self.gateway;
        let (addresses, counters, public_ip, resolv, processes, connections) = tokio::join!(
            gw.execute(ADDRESSES),
            gw.execute(COUNTERS),
            gw.execute(PUBLIC_IP),
            gw.execute(RESOLV_CONF),
            gw.execute(PROCESSES),
            gw.execute(CONNECTIONS),
        );

        let mut battery = Battery::new(self.domain());
        let addresses = battery.settle(ADDRESSES, addresses);
        let counters = battery.settle(COUNTERS, counters);
        let public_ip = battery.settle(PUBLIC_IP, public_ip);
        let resolv = battery.settle(RESOLV_CONF, resolv);
        let processes = battery.settle(PROCESSES, processes);
        let connections = battery.settle(CONNECTIONS, connections);
        battery.finish()?;

        let counters = counters.as_deref().map(parse_net_dev).unwrap_or_default();
        let interfaces = addresses
            .as_deref()
            .map(|text| build_interfaces(text, &counters))
            .unwrap_or_default();

        let public_ip = public_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| ip.parse::<Ipv4Addr>().is_ok())
            .unwrap_or(NOT_AVAILABLE)
            .to_string();
        let internet_connected = public_ip != NOT_AVAILABLE;

        let daemon_running = processes.as_deref().is_some_and(vpn_daemon_running);
        let vpn_iface = interfaces.iter().find(|i| i.kind == InterfaceType::Vpn);
        let vpn_status = VpnStatus {
            connected: daemon_running || vpn_iface.is_some(),
            name: vpn_iface.map(|i| i.name.clone()),
            ip: vpn_iface.map(|i| i.ip.clone()),
        };

        Ok(NetworkSnapshot {
            interfaces,
            public_ip,
            vpn_status,
            internet_connected,
            dns_servers: resolv.as_deref().map(parse_nameservers).unwrap_or_default(),
            connection_count: connections.as_deref().map_or(0, count_rows),
        })
    }
}

fn parse_net_dev(text: &str) -> HashMap<String, (u64, u64)> {
    text.lines()
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let fields: Vec<u64> = rest
                .split_whitespace()
                .map(|f| f.parse().ok())
                .collect::<Option<_>>()?;
            if fields.len() < 9 {
                return None;
            }
            Some((name.trim().to_string(), (fields[0], fields[8])))
        })
        .collect()
}

fn build_interfaces(text: &str, counters: &HashMap<String, (u64, u64)>) -> Vec<NetworkInterface> {
    let mut interfaces: Vec<NetworkInterface> = Vec::new();
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&raw_name) = tokens.get(1) else {
            continue;
        };
        let name = raw_name.split('@').next().unwrap_or(raw_name);
        let Some(ip) = tokens
            .iter()
            .position(|t| *t == "inet")
            .and_then(|idx| tokens.get(idx + 1))
            .and_then(|cidr| cidr.split('/').next())
        else {
            continue;
        };
        if interfaces.iter().any(|i| i.name == name) {
            continue;
        }

        let kind = InterfaceType::classify(name);
        let (rx_bytes, tx_bytes) = counters.get(name).copied().unwrap_or((0, 0));
        interfaces.push(NetworkInterface {
            name: name.to_string(),
            ip: ip.to_string(),
            status: "UP".to_string(),
            kind,
            priority: kind.priority(),
            rx_bytes,
            tx_bytes,
            is_important: kind.is_important(),
        });
    }
    interfaces.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    interfaces
}

fn parse_nameservers(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            match (tokens.next(), tokens.next()) {
                (Some("nameserver"), Some(addr)) => Some(addr.to_string()),
                _ => None,
            }
        })
        .take(MAX_DNS_SERVERS)
        .collect()
}

fn vpn_daemon_running(ps: &str) -> bool {
    ps.lines()
        .skip(1)
        .any(|line| VPN_DAEMONS.iter().any(|d| line.contains(d)))
}
