use crate::collectors::{Battery, CollectError, Collector};
use crate::config::ServiceConfig;
use crate::gateway::{CommandGateway, CommandOutput, GatewayError};
use crate::snapshot::{ServiceState, ServiceStatus, ServicesSnapshot};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::warn;

pub struct ServicesCollector {
    gateway: Arc<CommandGateway>,
    services: Vec<ServiceConfig>,
}

impl ServicesCollector {
    pub fn new(gateway: Arc<CommandGateway>, services: Vec<ServiceConfig>) -> Self {
        Self { gateway, services }
    }
}

fn active_state_command(unit: &str) -> String {
    format!("systemctl show --property=ActiveState --value {unit}")
}

#[async_trait]
impl Collector for ServicesCollector {
    type Snapshot = ServicesSnapshot;

    fn domain(&self) -> &'static str {
        "services"
    }

    async fn collect(&self) -> Result<ServicesSnapshot, CollectError> {
        let mut tasks = JoinSet::new();
        for (idx, service) in self.services.iter().enumerate() {
            let gateway = self.gateway.clone();
            let command = active_state_command(&service.id);
            tasks.spawn(async move {
                let result = gateway.execute(&command).await;
                (idx, command, result)
            });
        }

        let mut results: Vec<Option<(String, Result<CommandOutput, GatewayError>)>> =
            (0..self.services.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, command, result)) => results[idx] = Some((command, result)),
                Err(err) => warn!(error = %err, "service probe task failed"),
            }
        }

        let mut battery = Battery::new(self.domain());
        let services = self
            .services
            .iter()
            .zip(results)
            .map(|(service, probe)| {
                let raw = match probe {
                    Some((command, result)) => battery.settle(&command, result),
                    None => battery.settle(
                        &active_state_command(&service.id),
                        Err(GatewayError::Spawn(std::io::Error::other("probe task aborted"))),
                    ),
                };
                let raw = raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
                ServiceStatus {
                    id: service.id.clone(),
                    name: service.name.clone(),
                    status: raw
                        .as_deref()
                        .map_or(ServiceState::Stopped, ServiceState::from_active_state),
                    details: raw,
                }
            })
            .collect();
        battery.finish()?;

        Ok(ServicesSnapshot { services })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tests::{gateway_with, ScriptedRunner};

    fn service(id: &str, name: &str) -> ServiceConfig {
        ServiceConfig {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn states_map_and_keep_configured_order() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .ok(&active_state_command("nginx"), "active\n")
                .ok(&active_state_command("mysql"), "failed\n")
                .ok(&active_state_command("apache2"), "inactive\n")
                .ok(&active_state_command("ssh"), "activating\n"),
        );
        let collector = ServicesCollector::new(
            Arc::new(gateway_with(runner.clone())),
            vec![
                service("nginx", "Nginx"),
                service("mysql", "MySQL"),
                service("apache2", "Apache"),
                service("ssh", "OpenSSH"),
            ],
        );

        let snapshot = collector.collect().await.unwrap();
        assert_eq!(runner.call_count(), 4);
        let states: Vec<(&str, ServiceState)> = snapshot
            .services
            .iter()
            .map(|s| (s.id.as_str(), s.status))
            .collect();
        assert_eq!(
            states,
            [
                ("nginx", ServiceState::Running),
                ("mysql", ServiceState::Error),
                ("apache2", ServiceState::Stopped),
                ("ssh", ServiceState::Pending),
            ]
        );
        assert_eq!(snapshot.services[1].details.as_deref(), Some("failed"));
    }

    #[tokio::test]
    async fn failed_probe_defaults_to_stopped() {
        let runner = Arc::new(ScriptedRunner::new().ok(&active_state_command("nginx"), "active\n"));
        let collector = ServicesCollector::new(
            Arc::new(gateway_with(runner)),
            vec![service("nginx", "Nginx"), service("ssh", "OpenSSH")],
        );

        let snapshot = collector.collect().await.unwrap();
        assert_eq!(snapshot.services[1].status, ServiceState::Stopped);
        assert_eq!(snapshot.services[1].details, None);
    }

    #[tokio::test]
    async fn no_configured_services_is_an_empty_snapshot() {
        let runner = Arc::new(ScriptedRunner::new());
        let collector = ServicesCollector::new(Arc::new(gateway_with(runner.clone())), Vec::new());

        let snapshot = collector.collect().await.unwrap();
        assert!(snapshot.services.is_empty());
        assert_eq!(runner.call_count(), 0);
    }
}
