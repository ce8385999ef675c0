use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub diagnosis: DiagnosisConfig,
    #[serde(default)]
    pub logs: LogsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_command_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    #[serde(default = "default_allowed_paths")]
    pub allowed_paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    #[serde(default = "default_system_domain")]
    pub system: DomainPollConfig,
    #[serde(default = "default_network_domain")]
    pub network: DomainPollConfig,
    #[serde(default = "default_security_domain")]
    pub security: DomainPollConfig,
    #[serde(default = "default_services_domain")]
    pub services: DomainPollConfig,
    #[serde(default)]
    pub dismiss_updates_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct DomainPollConfig {
    pub interval_secs: u64,
    pub update_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiagnosisConfig {
    #[serde(default = "default_diagnosis_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_diagnosis_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_diagnosis_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogsConfig {
    #[serde(default = "default_log_files")]
    pub files: Vec<String>,
    #[serde(default = "default_log_limit")]
    pub default_limit: u32,
    #[serde(default = "default_log_max_limit")]
    pub max_limit: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_command_timeout_ms(),
            allowed_commands: default_allowed_commands(),
            allowed_paths: default_allowed_paths(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            system: default_system_domain(),
            network: default_network_domain(),
            security: default_security_domain(),
            services: default_services_domain(),
            dismiss_updates_after_secs: None,
        }
    }
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            endpoint: default_diagnosis_endpoint(),
            model: default_diagnosis_model(),
            api_key_env: default_api_key_env(),
            api_key: None,
            timeout_ms: default_diagnosis_timeout_ms(),
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            files: default_log_files(),
            default_limit: default_log_limit(),
            max_limit: default_log_max_limit(),
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl DomainPollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }

        validate_gateway(&self.gateway)?;
        validate_polling(&self.polling)?;
        validate_services(&self.services)?;
        validate_diagnosis(&self.diagnosis)?;
        validate_logs(&self.logs)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_gateway(cfg: &GatewayConfig) -> Result<(), ConfigError> {
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "gateway.timeout_ms must be > 0".to_string(),
        ));
    }
    if cfg.allowed_commands.is_empty() {
        return Err(ConfigError::Validation(
            "gateway.allowed_commands must not be empty".to_string(),
        ));
    }
    if cfg.allowed_commands.iter().any(|c| c.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "gateway.allowed_commands[*] must not be blank".to_string(),
        ));
    }
    if cfg.allowed_paths.is_empty() {
        return Err(ConfigError::Validation(
            "gateway.allowed_paths must not be empty".to_string(),
        ));
    }
    for path in &cfg.allowed_paths {
        if !path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "gateway.allowed_paths entry '{path}' must be an absolute path"
            )));
        }
    }
    Ok(())
}

fn validate_polling(cfg: &PollingConfig) -> Result<(), ConfigError> {
    let domains = [
        ("system", &cfg.system),
        ("network", &cfg.network),
        ("security", &cfg.security),
        ("services", &cfg.services),
    ];
    for (name, domain) in domains {
        if domain.interval_secs < 1 {
            return Err(ConfigError::Validation(format!(
                "polling.{name}.interval_secs must be >= 1"
            )));
        }
        if domain.update_capacity < 1 {
            return Err(ConfigError::Validation(format!(
                "polling.{name}.update_capacity must be >= 1"
            )));
        }
    }
    if cfg.dismiss_updates_after_secs == Some(0) {
        return Err(ConfigError::Validation(
            "polling.dismiss_updates_after_secs must be >= 1 when set".to_string(),
        ));
    }
    Ok(())
}

fn validate_services(services: &[ServiceConfig]) -> Result<(), ConfigError> {
    let mut ids = HashSet::new();
    for service in services {
        if service.id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "services[*].id must not be empty".to_string(),
            ));
        }
        if service.id.chars().any(|c| c.is_whitespace() || c == ';' || c == '|' || c == '&') {
            return Err(ConfigError::Validation(format!(
                "service id '{}' must be a plain unit name",
                service.id
            )));
        }
        if !ids.insert(service.id.clone()) {
            return Err(ConfigError::Validation(format!(
                "service id '{}' must be unique",
                service.id
            )));
        }
    }
    Ok(())
}

fn validate_diagnosis(cfg: &DiagnosisConfig) -> Result<(), ConfigError> {
    if cfg.endpoint.trim().is_empty() {
        return Err(ConfigError::Validation(
            "diagnosis.endpoint must not be empty".to_string(),
        ));
    }
    if cfg.model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "diagnosis.model must not be empty".to_string(),
        ));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "diagnosis.timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_logs(cfg: &LogsConfig) -> Result<(), ConfigError> {
    if cfg.max_limit < 1 {
        return Err(ConfigError::Validation(
            "logs.max_limit must be >= 1".to_string(),
        ));
    }
    if !(1..=cfg.max_limit).contains(&cfg.default_limit) {
        return Err(ConfigError::Validation(
            "logs.default_limit must be in 1..=logs.max_limit".to_string(),
        ));
    }
    Ok(())
}

const fn default_command_timeout_ms() -> u64 {
    10_000
}

pub fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "df", "free", "top", "ps", "uname", "uptime", "who", "whoami", "cat", "head", "tail",
        "grep", "find", "systemctl", "ss", "netstat", "ip", "awk", "curl", "last", "getenforce",
        "iptables", "hostname", "nproc",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn default_allowed_paths() -> Vec<String> {
    ["/var/log", "/etc", "/proc", "/sys/class", "/dev"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

const fn default_system_domain() -> DomainPollConfig {
    DomainPollConfig {
        interval_secs: 20,
        update_capacity: 20,
    }
}

const fn default_network_domain() -> DomainPollConfig {
    DomainPollConfig {
        interval_secs: 15,
        update_capacity: 20,
    }
}

const fn default_security_domain() -> DomainPollConfig {
    DomainPollConfig {
        interval_secs: 30,
        update_capacity: 50,
    }
}

const fn default_services_domain() -> DomainPollConfig {
    DomainPollConfig {
        interval_secs: 10,
        update_capacity: 20,
    }
}

fn default_services() -> Vec<ServiceConfig> {
    [
        ("nginx", "Nginx"),
        ("apache2", "Apache"),
        ("mysql", "MySQL"),
        ("ssh", "OpenSSH"),
    ]
    .iter()
    .map(|(id, name)| ServiceConfig {
        id: id.to_string(),
        name: name.to_string(),
    })
    .collect()
}

fn default_diagnosis_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_diagnosis_model() -> String {
    "gemini-1.5-pro".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

const fn default_diagnosis_timeout_ms() -> u64 {
    60_000
}

fn default_log_files() -> Vec<String> {
    [
        "/var/log/syslog",
        "/var/log/auth.log",
        "/var/log/kern.log",
        "/var/log/dmesg",
        "/var/log/messages",
        "/var/log/boot.log",
        "/var/log/apache2/access.log",
        "/var/log/apache2/error.log",
        "/var/log/nginx/access.log",
        "/var/log/nginx/error.log",
        "/var/log/mysql/error.log",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

const fn default_log_limit() -> u32 {
    50
}

const fn default_log_max_limit() -> u32 {
    1000
}
