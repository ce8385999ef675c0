use crate::changes::diff;
use crate::collectors::Collector;
use crate::metrics::{now_unix, Metrics};
use crate::snapshot::{now_unix_millis, UpdateEvent};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainView<S> {
    pub snapshot: Option<S>,
    pub updates: VecDeque<UpdateEvent>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_update: Option<i64>,
}

impl<S> Default for DomainView<S> {
    fn default() -> Self {
        Self {
            snapshot: None,
            updates: VecDeque::new(),
            is_loading: false,
            error: None,
            last_update: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RefreshOutcome {
    Updated { events: usize },
    Failed { error: String },
    Skipped,
}

type SnapshotHook<S> = Box<dyn Fn(&S) + Send + Sync>;

struct Inner<C: Collector> {
    collector: C,
    capacity: usize,
    in_flight: AtomicBool,
    state: watch::Sender<DomainView<C::Snapshot>>,
    metrics: Option<Arc<Metrics>>,
    on_snapshot: Option<SnapshotHook<C::Snapshot>>,
}

pub struct PollingEngine<C: Collector> {
    inner: Arc<Inner<C>>,
    interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Collector> PollingEngine<C> {
    pub fn new(collector: C, interval: Duration, capacity: usize) -> Self {
        let (state, _) = watch::channel(DomainView::default());
        Self {
            inner: Arc::new(Inner {
                collector,
                capacity: capacity.max(1),
                in_flight: AtomicBool::new(false),
                state,
                metrics: None,
                on_snapshot: None,
            }),
            interval,
            timer: Mutex::new(None),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.metrics = Some(metrics);
        }
        self
    }

    pub fn on_snapshot(mut self, hook: impl Fn(&C::Snapshot) + Send + Sync + 'static) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.on_snapshot = Some(Box::new(hook));
        }
        self
    }

    pub fn domain(&self) -> &'static str {
        self.inner.collector.domain()
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        self.inner.refresh().await
    }

    pub fn view(&self) -> DomainView<C::Snapshot> {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DomainView<C::Snapshot>> {
        self.inner.state.subscribe()
    }

    pub fn clear_updates(&self) {
        self.inner.clear_updates();
    }

    pub fn clear_updates_after(&self, delay: Duration) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.clear_updates();
            }
        });
    }

    /// Starts the timer. The first tick fires immediately. No-op while the
    /// timer is already running.
    pub fn start(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        info!(
            domain = self.domain(),
            interval = %humantime::format_duration(self.interval),
            "polling started"
        );
        *timer = Some(tokio::spawn(run_timer(
            Arc::downgrade(&self.inner),
            self.interval,
        )));
    }

    pub fn stop(&self) {
        let handle = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!(domain = self.domain(), "polling stopped");
        }
    }
}

impl<C: Collector> Drop for PollingEngine<C> {
    fn drop(&mut self) {
        let timer = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }
}

async fn run_timer<C: Collector>(inner: Weak<Inner<C>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.refresh().await;
    }
}

/// Releases the in-flight flag and ends the loading state even when the
/// fetch future is dropped half-way.
struct FetchGuard<'a, C: Collector>(&'a Inner<C>);

impl<C: Collector> Drop for FetchGuard<'_, C> {
    fn drop(&mut self) {
        self.0.state.send_if_modified(|view| {
            let was_loading = view.is_loading;
            view.is_loading = false;
            was_loading
        });
        self.0.in_flight.store(false, Ordering::Release);
    }
}

impl<C: Collector> Inner<C> {
    async fn refresh(&self) -> RefreshOutcome {
        let domain = self.collector.domain();
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(domain, "fetch already in flight, skipping");
            return RefreshOutcome::Skipped;
        }
        let _guard = FetchGuard(self);
        self.state.send_modify(|view| view.is_loading = true);

        match self.collector.collect().await {
            Ok(snapshot) => {
                let now = now_unix_millis();
                if let Some(hook) = &self.on_snapshot {
                    hook(&snapshot);
                }
                let mut emitted = 0;
                self.state.send_modify(|view| {
                    let events = diff(view.snapshot.as_ref(), &snapshot, now);
                    emitted = events.len();
                    for event in events {
                        if let Some(metrics) = &self.metrics {
                            metrics.inc_update_event(domain, event.severity);
                        }
                        view.updates.push_back(event);
                    }
                    while view.updates.len() > self.capacity {
                        view.updates.pop_front();
                    }
                    view.snapshot = Some(snapshot);
                    view.last_update = Some(now);
                    view.error = None;
                    view.is_loading = false;
                });
                if let Some(metrics) = &self.metrics {
                    metrics.record_fetch(domain, true, now_unix());
                }
                debug!(domain, events = emitted, "fetch completed");
                RefreshOutcome::Updated { events: emitted }
            }
            Err(err) => {
                let error = err.to_string();
                warn!(domain, error = %error, "fetch failed");
                self.state.send_modify(|view| {
                    view.error = Some(error.clone());
                    view.is_loading = false;
                });
                if let Some(metrics) = &self.metrics {
                    metrics.record_fetch(domain, false, now_unix());
                }
                RefreshOutcome::Failed { error }
            }
        }
    }

    fn clear_updates(&self) {
        self.state.send_if_modified(|view| {
            let had_updates = !view.updates.is_empty();
            view.updates.clear();
            had_updates
        });
    }
}

#[async_trait]
pub trait DomainEngine: Send + Sync {
    fn domain(&self) -> &'static str;
    fn view_json(&self) -> serde_json::Value;
    async fn refresh(&self) -> RefreshOutcome;
    fn clear_updates(&self);
    fn clear_updates_after(&self, delay: Duration);
    fn start(&self);
    fn stop(&self);
}

#[async_trait]
impl<C: Collector> DomainEngine for PollingEngine<C> {
    fn domain(&self) -> &'static str {
        PollingEngine::domain(self)
    }

    fn view_json(&self) -> serde_json::Value {
        serde_json::to_value(self.view()).unwrap_or(serde_json::Value::Null)
    }

    async fn refresh(&self) -> RefreshOutcome {
        PollingEngine::refresh(self).await
    }

    fn clear_updates(&self) {
        PollingEngine::clear_updates(self);
    }

    fn clear_updates_after(&self, delay: Duration) {
        PollingEngine::clear_updates_after(self, delay);
    }

    fn start(&self) {
        PollingEngine::start(self);
    }

    fn stop(&self) {
        PollingEngine::stop(self);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collectors::CollectError;
    use crate::snapshot::{MemoryDetails, Severity, SystemSnapshot};
    use std::sync::atomic::AtomicUsize;

    pub(crate) struct MemoryScript {
        pub calls: Arc<AtomicUsize>,
        steps: Vec<Option<u32>>,
        delay: Duration,
    }

    impl MemoryScript {
        pub(crate) fn new(steps: &[Option<u32>]) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                steps: steps.to_vec(),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    pub(crate) fn memory_snapshot(percent: u32) -> SystemSnapshot {
        SystemSnapshot {
            cpu_cores: 4,
            memory: MemoryDetails {
                percent,
                ..MemoryDetails::default()
            },
            ..SystemSnapshot::default()
        }
    }

    #[async_trait]
    impl Collector for MemoryScript {
        type Snapshot = SystemSnapshot;

        fn domain(&self) -> &'static str {
            "system"
        }

        async fn collect(&self) -> Result<SystemSnapshot, CollectError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let step = self.steps[call.min(self.steps.len() - 1)];
            step.map(memory_snapshot)
                .ok_or(CollectError::AllCommandsFailed {
                    domain: "system",
                    attempted: 11,
                })
        }
    }

    fn engine(steps: &[Option<u32>], capacity: usize) -> PollingEngine<MemoryScript> {
        PollingEngine::new(MemoryScript::new(steps), Duration::from_secs(10), capacity)
    }

    #[tokio::test]
    async fn first_fetch_is_a_baseline() {
        let engine = engine(&[Some(60)], 20);

        assert_eq!(engine.refresh().await, RefreshOutcome::Updated { events: 0 });
        let view = engine.view();
        assert_eq!(view.snapshot.unwrap().memory.percent, 60);
        assert!(view.updates.is_empty());
        assert!(!view.is_loading);
        assert!(view.last_update.is_some());
    }

    #[tokio::test]
    async fn memory_escalation_accumulates_events() {
        let engine = engine(&[Some(60), Some(72), Some(90)], 20);
        for _ in 0..3 {
            engine.refresh().await;
        }

        let severities: Vec<Severity> = engine.view().updates.iter().map(|e| e.severity).collect();
        assert_eq!(severities, [Severity::Warning, Severity::Critical]);
    }

    #[tokio::test]
    async fn buffer_is_capped_and_evicts_oldest() {
        let steps: Vec<Option<u32>> = (1..=7).map(Some).collect();
        let engine = engine(&steps, 3);
        for _ in 0..7 {
            engine.refresh().await;
        }

        let view = engine.view();
        assert_eq!(view.updates.len(), 3);
        let new_values: Vec<String> = view
            .updates
            .iter()
            .map(|e| serde_json::to_string(&e.new_value).unwrap())
            .collect();
        assert_eq!(new_values, ["5", "6", "7"]);
    }

    #[tokio::test]
    async fn failure_keeps_snapshot_and_updates() {
        let engine = engine(&[Some(60), Some(75), None], 20);
        engine.refresh().await;
        engine.refresh().await;

        let outcome = engine.refresh().await;
        assert!(matches!(outcome, RefreshOutcome::Failed { .. }));
        let view = engine.view();
        assert_eq!(view.snapshot.unwrap().memory.percent, 75);
        assert_eq!(view.updates.len(), 1);
        assert_eq!(view.error.as_deref(), Some("all 11 system commands failed"));
        assert!(!view.is_loading);
    }

    #[tokio::test]
    async fn success_after_failure_clears_error() {
        let engine = engine(&[None, Some(50)], 20);
        engine.refresh().await;
        assert!(engine.view().error.is_some());
        assert!(engine.view().snapshot.is_none());

        engine.refresh().await;
        let view = engine.view();
        assert!(view.error.is_none());
        assert!(view.snapshot.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_refreshes_run_one_fetch() {
        let script = MemoryScript::new(&[Some(60)]).delayed(Duration::from_secs(2));
        let calls = script.calls.clone();
        let engine = PollingEngine::new(script, Duration::from_secs(10), 20);

        let (first, second) = tokio::join!(engine.refresh(), engine.refresh());
        assert_eq!(first, RefreshOutcome::Updated { events: 0 });
        assert_eq!(second, RefreshOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(engine.refresh().await, RefreshOutcome::Updated { events: 0 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clear_updates_keeps_snapshot() {
        let engine = engine(&[Some(60), Some(80)], 20);
        engine.refresh().await;
        engine.refresh().await;
        assert_eq!(engine.view().updates.len(), 1);

        engine.clear_updates();
        let view = engine.view();
        assert!(view.updates.is_empty());
        assert_eq!(view.snapshot.unwrap().memory.percent, 80);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_clear_fires_after_delay() {
        let engine = engine(&[Some(60), Some(80)], 20);
        engine.refresh().await;
        engine.refresh().await;

        engine.clear_updates_after(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(engine.view().updates.len(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(engine.view().updates.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_until_stopped() {
        let script = MemoryScript::new(&[Some(60)]);
        let calls = script.calls.clone();
        let engine = PollingEngine::new(script, Duration::from_secs(10), 20);

        engine.start();
        engine.start();
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        engine.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_engine_cancels_its_timer() {
        let script = MemoryScript::new(&[Some(60)]);
        let calls = script.calls.clone();
        let engine = PollingEngine::new(script, Duration::from_secs(10), 20);
        engine.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(engine);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribers_see_new_snapshots() {
        let engine = engine(&[Some(60)], 20);
        let mut rx = engine.subscribe();

        engine.refresh().await;
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().snapshot.is_some());
    }

    #[tokio::test]
    async fn snapshot_hook_sees_every_success() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let engine = engine(&[Some(60), None, Some(70)], 20).on_snapshot(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..3 {
            engine.refresh().await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
