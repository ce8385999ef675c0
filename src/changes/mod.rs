mod network;
mod security;
mod services;
mod system;

use crate::snapshot::{FieldValue, Severity, UpdateEvent};
use serde::Serialize;
use std::fmt::Debug;

pub trait Snapshot: Debug + Clone + Serialize + Send + Sync + 'static {
    fn changes(previous: &Self, current: &Self, log: &mut EventLog);
}

pub fn diff<S: Snapshot>(previous: Option<&S>, current: &S, now_ms: i64) -> Vec<UpdateEvent> {
    let Some(previous) = previous else {
        return Vec::new();
    };
    let mut log = EventLog::new(now_ms);
    S::changes(previous, current, &mut log);
    log.into_events()
}

pub struct EventLog {
    now_ms: i64,
    events: Vec<UpdateEvent>,
}

impl EventLog {
    fn new(now_ms: i64) -> Self {
        Self {
            now_ms,
            events: Vec::new(),
        }
    }

    pub fn push(
        &mut self,
        field: &str,
        severity: Severity,
        message: String,
        previous: impl Into<FieldValue>,
        new: impl Into<FieldValue>,
    ) {
        self.record(field, None, severity, message, previous.into(), new.into());
    }

    pub fn push_about(
        &mut self,
        field: &str,
        subject: &str,
        severity: Severity,
        message: String,
        previous: impl Into<FieldValue>,
        new: impl Into<FieldValue>,
    ) {
        self.record(
            field,
            Some(subject.to_string()),
            severity,
            message,
            previous.into(),
            new.into(),
        );
    }

    fn record(
        &mut self,
        field: &str,
        subject: Option<String>,
        severity: Severity,
        message: String,
        previous_value: FieldValue,
        new_value: FieldValue,
    ) {
        let seq = self.events.len();
        self.events.push(UpdateEvent {
            id: format!("{field}-{}-{seq}", self.now_ms),
            field: field.to_string(),
            subject,
            timestamp: self.now_ms,
            severity,
            message,
            previous_value,
            new_value,
        });
    }

    fn into_events(self) -> Vec<UpdateEvent> {
        self.events
    }
}

pub(crate) fn added<'a, T, K: PartialEq>(
    previous: &'a [T],
    current: &'a [T],
    key: impl Fn(&T) -> K + 'a,
) -> impl Iterator<Item = &'a T> + 'a {
    current
        .iter()
        .filter(move |item| !previous.iter().any(|p| key(p) == key(*item)))
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ServicesSnapshot, SystemSnapshot};

    #[test]
    fn baseline_never_emits() {
        let current = SystemSnapshot {
            cpu_cores: 2,
            ..SystemSnapshot::default()
        };
        assert!(diff(None, &current, 1).is_empty());
        assert!(diff(None, &ServicesSnapshot::default(), 1).is_empty());
    }

    #[test]
    fn event_ids_are_unique_within_a_diff() {
        let mut log = EventLog::new(1_700_000_000_000);
        log.push("load1", Severity::Info, "a".to_string(), 0.5, 0.7);
        log.push("load1", Severity::Info, "b".to_string(), 0.7, 0.9);
        let events = log.into_events();
        assert_eq!(events[0].id, "load1-1700000000000-0");
        assert_eq!(events[1].id, "load1-1700000000000-1");
        assert_eq!(events[0].timestamp, 1_700_000_000_000);
    }

    #[test]
    fn added_uses_identity_key() {
        let previous = [("alice", 1), ("bob", 2)];
        let current = [("alice", 9), ("carol", 3)];
        let new: Vec<_> = added(&previous, &current, |(name, _)| *name).collect();
        assert_eq!(new, [&("carol", 3)]);
    }

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GB");
    }
}
