use crate::changes::{EventLog, Snapshot};
use crate::snapshot::{ServiceState, ServicesSnapshot, Severity};

impl Snapshot for ServicesSnapshot {
    fn changes(previous: &Self, current: &Self, log: &mut EventLog) {
        for service in &current.services {
            let Some(old) = previous.services.iter().find(|s| s.id == service.id) else {
                continue;
            };
            if old.status == service.status {
                continue;
            }
            let severity = match service.status {
                ServiceState::Error => Severity::Critical,
                ServiceState::Stopped => Severity::Warning,
                ServiceState::Running | ServiceState::Pending => Severity::Info,
            };
            log.push_about(
                "serviceStatus",
                &service.id,
                severity,
                format!(
                    "{} changed from {} to {}",
                    service.name, old.status, service.status
                ),
                old.status.to_string(),
                service.status.to_string(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::diff;
    use crate::snapshot::ServiceStatus;

    fn services(states: &[(&str, ServiceState)]) -> ServicesSnapshot {
        ServicesSnapshot {
            services: states
                .iter()
                .map(|(id, status)| ServiceStatus {
                    id: id.to_string(),
                    name: id.to_string(),
                    status: *status,
                    details: None,
                })
                .collect(),
        }
    }

    #[test]
    fn status_changes_are_classified() {
        let previous = services(&[
            ("nginx", ServiceState::Running),
            ("mysql", ServiceState::Running),
            ("ssh", ServiceState::Stopped),
            ("redis", ServiceState::Running),
        ]);
        let current = services(&[
            ("nginx", ServiceState::Error),
            ("mysql", ServiceState::Stopped),
            ("ssh", ServiceState::Pending),
            ("redis", ServiceState::Running),
        ]);

        let events = diff(Some(&previous), &current, 1);
        let summary: Vec<(Option<&str>, Severity)> = events
            .iter()
            .map(|e| (e.subject.as_deref(), e.severity))
            .collect();
        assert_eq!(
            summary,
            [
                (Some("nginx"), Severity::Critical),
                (Some("mysql"), Severity::Warning),
                (Some("ssh"), Severity::Info),
            ]
        );
        assert_eq!(events[0].message, "nginx changed from Running to Error");
    }

    #[test]
    fn services_missing_from_either_side_are_ignored() {
        let previous = services(&[("nginx", ServiceState::Running)]);
        let current = services(&[("apache2", ServiceState::Error)]);
        assert!(diff(Some(&previous), &current, 1).is_empty());
    }
}
