//! Integration Monitor.
//!
//! Endpoint status is never set directly. Every recorded event triggers a recomputation
//! over the configured trailing window, and only the result is cached on the endpoint.
//! Appending an event, recomputing status and raising an alert happen under one async
//! mutex per endpoint, so concurrent events for the same endpoint cannot lose updates.
//! Events for different endpoints proceed in parallel.

use crate::config::{MonitorConfig, StatusWindow};
use crate::integration::{
    AlertCondition, EndpointDefinition, EndpointStatus, EventRecord, IntegrationAlert,
    IntegrationEndpoint, IntegrationEvent, IntegrationMetric,
};
use crate::store::{EventQuery, IntegrationStore};
use crate::{Actor, BridgeError, BridgeResult, IdSequence};
use bridge_types::TimestampId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Derive endpoint status from events ordered newest first.
///
/// - no events: `unknown`
/// - a run of at least `failure_threshold` failures at the newest end: `down`
/// - error rate strictly above `degraded_error_rate`: `degraded`
/// - otherwise `healthy`
pub fn derive_status(events: &[EventRecord], config: &MonitorConfig) -> EndpointStatus {
    if events.is_empty() {
        return EndpointStatus::Unknown;
    }

    let consecutive = events
        .iter()
        .take_while(|e| e.event.is_failure())
        .count();
    if consecutive >= config.failure_threshold() {
        return EndpointStatus::Down;
    }

    let failures = events.iter().filter(|e| e.event.is_failure()).count();
    let error_rate = failures as f64 / events.len() as f64;
    if error_rate > config.degraded_error_rate() {
        EndpointStatus::Degraded
    } else {
        EndpointStatus::Healthy
    }
}

pub struct IntegrationMonitor {
    store: Arc<dyn IntegrationStore>,
    config: MonitorConfig,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    event_ids: IdSequence,
    alert_ids: IdSequence,
}

impl IntegrationMonitor {
    pub fn new(store: Arc<dyn IntegrationStore>, config: MonitorConfig) -> Self {
        Self {
            store,
            config,
            locks: RwLock::new(HashMap::new()),
            event_ids: IdSequence::default(),
            alert_ids: IdSequence::default(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Register an endpoint, or update the name, kind and address of an existing one.
    ///
    /// Re-registration keeps the endpoint's events and cached status.
    pub async fn register_endpoint(
        &self,
        definition: EndpointDefinition,
    ) -> BridgeResult<IntegrationEndpoint> {
        let lock = self.endpoint_lock(definition.id.as_str()).await;
        let _guard = lock.lock().await;

        let endpoint = match self.store.endpoint(definition.id.as_str()).await? {
            Some(existing) => IntegrationEndpoint {
                name: definition.name,
                kind: definition.kind,
                address: definition.address,
                ..existing
            },
            None => IntegrationEndpoint {
                id: definition.id,
                name: definition.name,
                kind: definition.kind,
                address: definition.address,
                status: EndpointStatus::Unknown,
                status_changed_at: None,
                registered_at: Utc::now(),
            },
        };
        self.store.upsert_endpoint(endpoint.clone()).await?;
        tracing::info!(endpoint = %endpoint.id, kind = ?endpoint.kind, "endpoint registered");
        Ok(endpoint)
    }

    pub async fn endpoints(&self) -> BridgeResult<Vec<IntegrationEndpoint>> {
        self.store.endpoints().await
    }

    /// Append an event for `endpoint_id` and return the recomputed status.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownEndpoint`] if the endpoint is not registered.
    pub async fn record_integration_event(
        &self,
        endpoint_id: &str,
        event: IntegrationEvent,
    ) -> BridgeResult<EndpointStatus> {
        let lock = self.existing_endpoint_lock(endpoint_id).await?;
        let _guard = lock.lock().await;

        let endpoint = self.require_endpoint(endpoint_id).await?;
        let now = Utc::now();
        let record = EventRecord {
            id: self.event_ids.next().await,
            endpoint_id: endpoint_id.to_owned(),
            recorded_at: now,
            event,
        };
        tracing::debug!(
            endpoint = endpoint_id,
            failure = record.event.is_failure(),
            "integration event recorded"
        );
        self.store.append_event(record).await?;

        self.recompute(&endpoint, now).await
    }

    /// The cached status of an endpoint.
    pub async fn get_endpoint_status(&self, endpoint_id: &str) -> BridgeResult<EndpointStatus> {
        Ok(self.require_endpoint(endpoint_id).await?.status)
    }

    /// Recompute status without a new event. Needed for time-bounded windows, where
    /// events age out of the window as time passes.
    pub async fn refresh_status(&self, endpoint_id: &str) -> BridgeResult<EndpointStatus> {
        let lock = self.existing_endpoint_lock(endpoint_id).await?;
        let _guard = lock.lock().await;

        let endpoint = self.require_endpoint(endpoint_id).await?;
        self.recompute(&endpoint, Utc::now()).await
    }

    /// Aggregate the events of `endpoint_id` within `window`.
    pub async fn get_metrics(
        &self,
        endpoint_id: &str,
        window: StatusWindow,
    ) -> BridgeResult<IntegrationMetric> {
        self.require_endpoint(endpoint_id).await?;
        let events = self
            .store
            .events(endpoint_id, EventQuery::window(window, Utc::now()))
            .await?;
        Ok(IntegrationMetric::from_events(endpoint_id, window, &events))
    }

    /// Alerts in raise order, for one endpoint or all of them.
    pub async fn list_alerts(&self, endpoint_id: Option<&str>) -> BridgeResult<Vec<IntegrationAlert>> {
        self.store.alerts(endpoint_id).await
    }

    /// Acknowledge an alert. After this a new alert may be raised for the same condition.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownAlert`] or [`BridgeError::AlertAlreadyAcknowledged`].
    pub async fn acknowledge_alert(
        &self,
        alert_id: &TimestampId,
        actor: &Actor,
    ) -> BridgeResult<IntegrationAlert> {
        let alert = self
            .store
            .acknowledge_alert(alert_id, actor, Utc::now())
            .await?;
        tracing::info!(
            endpoint = %alert.endpoint_id,
            alert = %alert.id,
            actor = %actor,
            "alert acknowledged"
        );
        Ok(alert)
    }

    async fn require_endpoint(&self, endpoint_id: &str) -> BridgeResult<IntegrationEndpoint> {
        self.store
            .endpoint(endpoint_id)
            .await?
            .ok_or_else(|| BridgeError::UnknownEndpoint(endpoint_id.to_owned()))
    }

    /// Endpoints are never removed, so a lock handed out here stays valid.
    async fn existing_endpoint_lock(&self, endpoint_id: &str) -> BridgeResult<Arc<Mutex<()>>> {
        self.require_endpoint(endpoint_id).await?;
        Ok(self.endpoint_lock(endpoint_id).await)
    }

    async fn endpoint_lock(&self, endpoint_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(endpoint_id) {
            return Arc::clone(lock);
        }
        Arc::clone(
            self.locks
                .write()
                .await
                .entry(endpoint_id.to_owned())
                .or_default(),
        )
    }

    /// Must be called with the endpoint's lock held.
    async fn recompute(
        &self,
        endpoint: &IntegrationEndpoint,
        now: DateTime<Utc>,
    ) -> BridgeResult<EndpointStatus> {
        let id = endpoint.id.as_str();
        let events = self
            .store
            .events(id, EventQuery::window(self.config.window(), now))
            .await?;
        let status = derive_status(&events, &self.config);
        if status == endpoint.status {
            return Ok(status);
        }

        self.store.update_endpoint_status(id, status, now).await?;
        match status {
            EndpointStatus::Degraded | EndpointStatus::Down => tracing::warn!(
                endpoint = id,
                from = %endpoint.status,
                to = %status,
                "endpoint status changed"
            ),
            EndpointStatus::Unknown | EndpointStatus::Healthy => tracing::info!(
                endpoint = id,
                from = %endpoint.status,
                to = %status,
                "endpoint status changed"
            ),
        }

        if let Some(condition) = AlertCondition::for_status(status) {
            self.raise_alert(endpoint, condition, &events, now).await?;
        }
        Ok(status)
    }

    async fn raise_alert(
        &self,
        endpoint: &IntegrationEndpoint,
        condition: AlertCondition,
        events: &[EventRecord],
        now: DateTime<Utc>,
    ) -> BridgeResult<()> {
        let id = endpoint.id.as_str();
        if let Some(open) = self.store.open_alert(id, condition).await? {
            tracing::debug!(endpoint = id, alert = %open.id, "alert already open");
            return Ok(());
        }

        let failures = events.iter().filter(|e| e.event.is_failure()).count();
        let alert = IntegrationAlert {
            id: self.alert_ids.next().await,
            endpoint_id: id.to_owned(),
            condition,
            message: format!(
                "{} is {condition}: {failures} of the last {} events failed",
                endpoint.name,
                events.len()
            ),
            raised_at: now,
            acknowledged_by: None,
            acknowledged_at: None,
        };
        tracing::warn!(endpoint = id, alert = %alert.id, condition = %condition, "alert raised");
        self.store.insert_alert(alert).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::{EndpointKind, IntegrationErrorKind};
    use crate::store::MemoryStore;
    use bridge_types::NonEmptyText;
    use std::time::Duration;

    fn config(window: usize, threshold: usize, rate: f64) -> MonitorConfig {
        MonitorConfig::new(StatusWindow::Count(window), threshold, rate).expect("valid config")
    }

    fn definition(id: &str) -> EndpointDefinition {
        EndpointDefinition {
            id: NonEmptyText::new(id).expect("id"),
            name: format!("{id} endpoint"),
            kind: EndpointKind::Satusehat,
            address: None,
        }
    }

    fn ok() -> IntegrationEvent {
        IntegrationEvent::Log {
            success: true,
            latency_ms: 40,
            status_code: Some(200),
            summary: None,
        }
    }

    fn fail() -> IntegrationEvent {
        IntegrationEvent::Error {
            kind: IntegrationErrorKind::EndpointUnavailable,
            message: "connection refused".into(),
        }
    }

    async fn monitor(config: MonitorConfig) -> IntegrationMonitor {
        let monitor = IntegrationMonitor::new(Arc::new(MemoryStore::new()), config);
        monitor
            .register_endpoint(definition("satusehat"))
            .await
            .expect("register");
        monitor
    }

    async fn record(monitor: &IntegrationMonitor, event: IntegrationEvent) -> EndpointStatus {
        monitor
            .record_integration_event("satusehat", event)
            .await
            .expect("record")
    }

    #[tokio::test]
    async fn new_endpoint_is_unknown() {
        let monitor = monitor(config(10, 5, 0.5)).await;
        assert_eq!(
            monitor.get_endpoint_status("satusehat").await.expect("status"),
            EndpointStatus::Unknown
        );
        assert_eq!(
            monitor.refresh_status("satusehat").await.expect("refresh"),
            EndpointStatus::Unknown
        );
    }

    #[tokio::test]
    async fn five_failures_take_endpoint_down_with_one_alert() {
        let monitor = monitor(config(10, 5, 0.6)).await;
        for _ in 0..5 {
            record(&monitor, ok()).await;
        }
        assert_eq!(
            monitor.get_endpoint_status("satusehat").await.expect("status"),
            EndpointStatus::Healthy
        );

        let mut statuses = Vec::new();
        for _ in 0..5 {
            statuses.push(record(&monitor, fail()).await);
        }
        assert_eq!(statuses[..4], [EndpointStatus::Healthy; 4]);
        assert_eq!(statuses[4], EndpointStatus::Down);

        let alerts = monitor.list_alerts(Some("satusehat")).await.expect("alerts");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].condition, AlertCondition::Down);
        assert!(alerts[0].is_open());

        assert_eq!(record(&monitor, fail()).await, EndpointStatus::Down);
        assert_eq!(monitor.list_alerts(Some("satusehat")).await.expect("alerts").len(), 1);
    }

    #[tokio::test]
    async fn error_rate_above_fraction_is_degraded() {
        let monitor = monitor(config(4, 3, 0.25)).await;
        record(&monitor, ok()).await;
        record(&monitor, fail()).await;
        record(&monitor, ok()).await;
        // 1 of 3 failed: above 0.25.
        assert_eq!(
            monitor.get_endpoint_status("satusehat").await.expect("status"),
            EndpointStatus::Degraded
        );
        record(&monitor, ok()).await;
        // 1 of 4 failed: not above 0.25.
        assert_eq!(
            monitor.get_endpoint_status("satusehat").await.expect("status"),
            EndpointStatus::Healthy
        );
        // The failure falls out of the four-event window.
        record(&monitor, ok()).await;
        record(&monitor, ok()).await;
        let metric = monitor
            .get_metrics("satusehat", StatusWindow::Count(4))
            .await
            .expect("metrics");
        assert_eq!(metric.failures, 0);
        assert_eq!(metric.total, 4);

        let alerts = monitor.list_alerts(None).await.expect("alerts");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].condition, AlertCondition::Degraded);
    }

    async fn down_then_recover(monitor: &IntegrationMonitor) {
        record(monitor, fail()).await;
        record(monitor, fail()).await;
        assert_eq!(
            monitor.get_endpoint_status("satusehat").await.expect("status"),
            EndpointStatus::Down
        );
        record(monitor, ok()).await;
        record(monitor, ok()).await;
        assert_eq!(
            monitor.get_endpoint_status("satusehat").await.expect("status"),
            EndpointStatus::Healthy
        );
    }

    #[tokio::test]
    async fn open_alert_suppresses_duplicates_until_acknowledged() {
        let monitor = monitor(config(2, 2, 0.9)).await;
        record(&monitor, ok()).await;
        down_then_recover(&monitor).await;
        down_then_recover(&monitor).await;
        let alerts = monitor.list_alerts(Some("satusehat")).await.expect("alerts");
        assert_eq!(alerts.len(), 1);

        let actor = Actor::new("ops.budi").expect("actor");
        let acked = monitor
            .acknowledge_alert(&alerts[0].id, &actor)
            .await
            .expect("acknowledge");
        assert!(!acked.is_open());

        down_then_recover(&monitor).await;
        let alerts = monitor.list_alerts(Some("satusehat")).await.expect("alerts");
        assert_eq!(alerts.len(), 2);
        assert!(!alerts[0].is_open());
        assert!(alerts[1].is_open());
    }

    #[tokio::test]
    async fn time_window_ages_out_events() {
        let window = StatusWindow::Duration(Duration::from_millis(1_000));
        let config = MonitorConfig::new(window, 1, 0.5).expect("valid config");
        let monitor = monitor(config).await;

        record(&monitor, fail()).await;
        assert_eq!(
            monitor.get_endpoint_status("satusehat").await.expect("status"),
            EndpointStatus::Down
        );

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(
            monitor.refresh_status("satusehat").await.expect("refresh"),
            EndpointStatus::Unknown
        );
    }

    #[tokio::test]
    async fn unknown_endpoint_is_rejected() {
        let monitor = monitor(config(10, 5, 0.5)).await;
        match monitor.record_integration_event("bpjs", ok()).await {
            Err(BridgeError::UnknownEndpoint(id)) => assert_eq!(id, "bpjs"),
            other => panic!("expected UnknownEndpoint, got {other:?}"),
        }
        assert!(monitor.get_metrics("bpjs", StatusWindow::Count(5)).await.is_err());
    }

    #[tokio::test]
    async fn re_registration_keeps_status() {
        let monitor = monitor(config(10, 1, 0.5)).await;
        record(&monitor, fail()).await;

        let mut renamed = definition("satusehat");
        renamed.name = "SATUSEHAT production".into();
        let endpoint = monitor.register_endpoint(renamed).await.expect("register");
        assert_eq!(endpoint.name, "SATUSEHAT production");
        assert_eq!(endpoint.status, EndpointStatus::Down);
    }

    #[tokio::test]
    async fn concurrent_events_are_all_counted() {
        let monitor = Arc::new(monitor(config(100, 100, 0.99)).await);
        let mut tasks = Vec::new();
        for n in 0..50 {
            let monitor = Arc::clone(&monitor);
            tasks.push(tokio::spawn(async move {
                let event = if n % 2 == 0 { ok() } else { fail() };
                monitor.record_integration_event("satusehat", event).await
            }));
        }
        for task in tasks {
            task.await.expect("task joins").expect("record");
        }

        let metric = monitor
            .get_metrics("satusehat", StatusWindow::Count(100))
            .await
            .expect("metrics");
        assert_eq!(metric.total, 50);
        assert_eq!(metric.failures, 25);
        assert_eq!(metric.error_rate, 0.5);
    }

    #[test]
    fn derive_status_rules() {
        let config = config(10, 3, 0.5);
        let at = |event: IntegrationEvent| EventRecord {
            id: TimestampId::generate(None),
            endpoint_id: "x".into(),
            recorded_at: Utc::now(),
            event,
        };

        assert_eq!(derive_status(&[], &config), EndpointStatus::Unknown);
        // Newest first: three failures at the head.
        let down = [at(fail()), at(fail()), at(fail()), at(ok())];
        assert_eq!(derive_status(&down, &config), EndpointStatus::Down);
        // Three failures, but not consecutive from the newest.
        let degraded = [at(ok()), at(fail()), at(fail()), at(fail())];
        assert_eq!(derive_status(&degraded, &config), EndpointStatus::Degraded);
        // Exactly at the fraction is not degraded.
        let healthy = [at(fail()), at(ok())];
        assert_eq!(derive_status(&healthy, &config), EndpointStatus::Healthy);
    }
}
