use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub hostname: String,
    pub kernel: String,
    pub distro: String,
    pub uptime: String,
    pub load: LoadAverage,
    pub cpu_cores: u32,
    pub disks: Vec<DiskUsage>,
    pub top_processes: Vec<ProcessInfo>,
    pub network_connections: u32,
    pub active_users: u32,
    pub memory: MemoryDetails,
}

impl Default for SystemSnapshot {
    fn default() -> Self {
        Self {
            hostname: UNKNOWN.to_string(),
            kernel: UNKNOWN.to_string(),
            distro: UNKNOWN.to_string(),
            uptime: UNKNOWN.to_string(),
            load: LoadAverage::default(),
            cpu_cores: 1,
            disks: Vec::new(),
            top_processes: Vec::new(),
            network_connections: 0,
            active_users: 0,
            memory: MemoryDetails::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoadAverage {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDetails {
    pub total_kib: u64,
    pub used_kib: u64,
    pub free_kib: u64,
    pub available_kib: u64,
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub filesystem: String,
    pub used: String,
    pub available: String,
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessInfo {
    pub user: String,
    pub pid: u32,
    pub cpu: f64,
    pub mem: f64,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSnapshot {
    pub interfaces: Vec<NetworkInterface>,
    #[serde(rename = "publicIP")]
    pub public_ip: String,
    pub vpn_status: VpnStatus,
    pub internet_connected: bool,
    pub dns_servers: Vec<String>,
    pub connection_count: u32,
}

impl Default for NetworkSnapshot {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            public_ip: NOT_AVAILABLE.to_string(),
            vpn_status: VpnStatus::default(),
            internet_connected: false,
            dns_servers: Vec::new(),
            connection_count: 0,
        }
    }
}

pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    pub ip: String,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: InterfaceType,
    pub priority: u8,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub is_important: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Ethernet,
    Wifi,
    Vpn,
    Docker,
    Loopback,
    Other,
}

impl InterfaceType {
    pub fn classify(name: &str) -> Self {
        let starts = |prefixes: &[&str]| prefixes.iter().any(|p| name.starts_with(p));
        if starts(&["eth", "enp", "eno"]) {
            InterfaceType::Ethernet
        } else if starts(&["wlan", "wlp"]) {
            InterfaceType::Wifi
        } else if starts(&["tun", "tap"]) || name.contains("vpn") {
            InterfaceType::Vpn
        } else if starts(&["lo"]) {
            InterfaceType::Loopback
        } else if starts(&["docker", "br-", "veth"]) {
            InterfaceType::Docker
        } else {
            InterfaceType::Other
        }
    }

    pub fn priority(self) -> u8 {
        match self {
            InterfaceType::Ethernet => 1,
            InterfaceType::Wifi => 2,
            InterfaceType::Vpn => 3,
            InterfaceType::Other => 8,
            InterfaceType::Docker => 9,
            InterfaceType::Loopback => 10,
        }
    }

    pub fn is_important(self) -> bool {
        matches!(
            self,
            InterfaceType::Ethernet | InterfaceType::Wifi | InterfaceType::Vpn
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VpnStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySnapshot {
    pub failed_logins: Vec<FailedLogin>,
    pub active_users: Vec<ActiveSession>,
    pub sudo_activity: Vec<SudoEntry>,
    pub suspicious_processes: Vec<SuspiciousProcess>,
    #[serde(rename = "openSSHConnections")]
    pub open_ssh_connections: Vec<SshConnection>,
    pub last_logins: Vec<LastLogin>,
    pub system_security_status: SecurityStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedLogin {
    pub user: String,
    pub ip: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub user: String,
    pub tty: String,
    pub from: String,
    pub login_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SudoEntry {
    pub user: String,
    pub command: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspiciousProcess {
    pub pid: u32,
    pub user: String,
    pub command: String,
    pub cpu: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshConnection {
    pub user: String,
    pub ip: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastLogin {
    pub user: String,
    pub tty: String,
    pub from: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityStatus {
    pub firewall: String,
    pub selinux: String,
    pub apparmor: String,
}

impl Default for SecurityStatus {
    fn default() -> Self {
        Self {
            firewall: "inactive".to_string(),
            selinux: "disabled".to_string(),
            apparmor: "inactive".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServicesSnapshot {
    pub services: Vec<ServiceStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub id: String,
    pub name: String,
    pub status: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServiceState {
    Running,
    Stopped,
    Error,
    Pending,
}

impl ServiceState {
    pub fn from_active_state(state: &str) -> Self {
        match state.trim() {
            "active" => ServiceState::Running,
            "activating" | "reloading" | "deactivating" => ServiceState::Pending,
            "failed" => ServiceState::Error,
            _ => ServiceState::Stopped,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServiceState::Running => "Running",
            ServiceState::Stopped => "Stopped",
            ServiceState::Error => "Error",
            ServiceState::Pending => "Pending",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn for_usage_percent(percent: u32) -> Self {
        if percent > 85 {
            Severity::Critical
        } else if percent >= 70 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Absent,
    Bool(bool),
    Count(u64),
    Number(f64),
    Text(String),
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Count(u64::from(value))
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Count(value)
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::Count(value as u64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Absent, Into::into)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    pub id: String,
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub timestamp: i64,
    pub severity: Severity,
    pub message: String,
    pub previous_value: FieldValue,
    pub new_value: FieldValue,
}

pub fn now_unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_names_are_classified_by_prefix() {
        let cases = [
            ("eth0", InterfaceType::Ethernet),
            ("enp3s0", InterfaceType::Ethernet),
            ("eno1", InterfaceType::Ethernet),
            ("wlan0", InterfaceType::Wifi),
            ("wlp2s0", InterfaceType::Wifi),
            ("tun0", InterfaceType::Vpn),
            ("tap1", InterfaceType::Vpn),
            ("myvpn", InterfaceType::Vpn),
            ("lo", InterfaceType::Loopback),
            ("docker0", InterfaceType::Docker),
            ("br-3f2a", InterfaceType::Docker),
            ("veth12ab", InterfaceType::Docker),
            ("virbr0", InterfaceType::Other),
        ];
        for (name, expected) in cases {
            assert_eq!(InterfaceType::classify(name), expected, "{name}");
        }
        assert!(InterfaceType::Vpn.is_important());
        assert!(!InterfaceType::Docker.is_important());
        assert!(InterfaceType::Ethernet.priority() < InterfaceType::Loopback.priority());
    }

    #[test]
    fn active_state_maps_to_service_state() {
        assert_eq!(ServiceState::from_active_state("active\n"), ServiceState::Running);
        assert_eq!(ServiceState::from_active_state("reloading"), ServiceState::Pending);
        assert_eq!(ServiceState::from_active_state("failed"), ServiceState::Error);
        assert_eq!(ServiceState::from_active_state("inactive"), ServiceState::Stopped);
        assert_eq!(ServiceState::from_active_state(""), ServiceState::Stopped);
    }

    #[test]
    fn usage_cutpoints_are_monotonic() {
        assert_eq!(Severity::for_usage_percent(69), Severity::Info);
        assert_eq!(Severity::for_usage_percent(70), Severity::Warning);
        assert_eq!(Severity::for_usage_percent(85), Severity::Warning);
        assert_eq!(Severity::for_usage_percent(86), Severity::Critical);
    }

    #[test]
    fn snapshots_serialize_with_dashboard_field_names() {
        let json = serde_json::to_value(NetworkSnapshot::default()).unwrap();
        assert_eq!(json["publicIP"], "N/A");
        assert_eq!(json["internetConnected"], false);
        assert!(json["vpnStatus"].get("name").is_none());

        let json = serde_json::to_value(SecuritySnapshot::default()).unwrap();
        assert!(json["openSSHConnections"].is_array());
        assert_eq!(json["systemSecurityStatus"]["selinux"], "disabled");
    }

    #[test]
    fn absent_field_value_is_null() {
        let value = serde_json::to_value(FieldValue::from(None::<String>)).unwrap();
        assert!(value.is_null());
        let value = serde_json::to_value(FieldValue::from(72_u32)).unwrap();
        assert_eq!(value, 72);
    }
}
