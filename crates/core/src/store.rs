//! Persistence capability consumed by the orchestrator and the monitor.
//!
//! The bridge does not own a database. Deployments plug their own storage in behind
//! [`IntegrationStore`]; [`MemoryStore`] backs the daemon, the CLI and the tests.

use crate::config::StatusWindow;
use crate::integration::{
    AlertCondition, EndpointStatus, EventRecord, IntegrationAlert, IntegrationEndpoint,
};
use crate::orchestrator::TransformationLog;
use crate::{Actor, BridgeError, BridgeResult};
use async_trait::async_trait;
use bridge_mapping::{Direction, TransformStatus};
use bridge_types::TimestampId;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Filter over the transformation audit trail. Empty fields match everything.
#[derive(Clone, Debug, Default)]
pub struct LogFilter {
    pub direction: Option<Direction>,
    pub status: Option<TransformStatus>,
    pub rule_id: Option<String>,
    /// Return at most this many entries (newest first).
    pub limit: Option<usize>,
}

impl LogFilter {
    pub fn matches(&self, log: &TransformationLog) -> bool {
        self.direction.map_or(true, |d| d == log.direction)
            && self.status.map_or(true, |s| s == log.status)
            && self
                .rule_id
                .as_deref()
                .map_or(true, |id| log.rule_id.as_deref() == Some(id))
    }
}

/// Bounds for an event query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Newest `n` events.
    pub limit: Option<usize>,
    /// Events recorded at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

impl EventQuery {
    /// The query selecting `window` as of `now`.
    pub fn window(window: StatusWindow, now: DateTime<Utc>) -> Self {
        match window {
            StatusWindow::Count(n) => Self {
                limit: Some(n),
                since: None,
            },
            StatusWindow::Duration(d) => Self {
                limit: None,
                since: chrono::Duration::from_std(d).ok().map(|d| now - d),
            },
        }
    }
}

#[async_trait]
pub trait IntegrationStore: Send + Sync {
    // Transformation audit trail.
    async fn append_transformation_log(&self, log: TransformationLog) -> BridgeResult<()>;
    async fn transformation_logs(&self, filter: &LogFilter) -> BridgeResult<Vec<TransformationLog>>;

    // Endpoints.
    async fn upsert_endpoint(&self, endpoint: IntegrationEndpoint) -> BridgeResult<()>;
    async fn endpoint(&self, id: &str) -> BridgeResult<Option<IntegrationEndpoint>>;
    async fn endpoints(&self) -> BridgeResult<Vec<IntegrationEndpoint>>;
    /// Overwrite the cached derived status. Only the monitor calls this.
    async fn update_endpoint_status(
        &self,
        id: &str,
        status: EndpointStatus,
        at: DateTime<Utc>,
    ) -> BridgeResult<()>;

    // Events.
    async fn append_event(&self, record: EventRecord) -> BridgeResult<()>;
    /// Events for one endpoint, newest first.
    async fn events(&self, endpoint_id: &str, query: EventQuery) -> BridgeResult<Vec<EventRecord>>;

    // Alerts.
    async fn insert_alert(&self, alert: IntegrationAlert) -> BridgeResult<()>;
    /// The unacknowledged alert for this endpoint and condition, if any.
    async fn open_alert(
        &self,
        endpoint_id: &str,
        condition: AlertCondition,
    ) -> BridgeResult<Option<IntegrationAlert>>;
    async fn acknowledge_alert(
        &self,
        id: &TimestampId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> BridgeResult<IntegrationAlert>;
    /// Alerts in raise order, optionally for one endpoint.
    async fn alerts(&self, endpoint_id: Option<&str>) -> BridgeResult<Vec<IntegrationAlert>>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    logs: RwLock<Vec<TransformationLog>>,
    endpoints: RwLock<BTreeMap<String, IntegrationEndpoint>>,
    events: RwLock<HashMap<String, Vec<EventRecord>>>,
    alerts: RwLock<Vec<IntegrationAlert>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntegrationStore for MemoryStore {
    async fn append_transformation_log(&self, log: TransformationLog) -> BridgeResult<()> {
        self.logs.write().await.push(log);
        Ok(())
    }

    async fn transformation_logs(&self, filter: &LogFilter) -> BridgeResult<Vec<TransformationLog>> {
        let logs = self.logs.read().await;
        let matching = logs.iter().rev().filter(|log| filter.matches(log)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn upsert_endpoint(&self, endpoint: IntegrationEndpoint) -> BridgeResult<()> {
        self.endpoints
            .write()
            .await
            .insert(endpoint.id.as_str().to_owned(), endpoint);
        Ok(())
    }

    async fn endpoint(&self, id: &str) -> BridgeResult<Option<IntegrationEndpoint>> {
        Ok(self.endpoints.read().await.get(id).cloned())
    }

    async fn endpoints(&self) -> BridgeResult<Vec<IntegrationEndpoint>> {
        Ok(self.endpoints.read().await.values().cloned().collect())
    }

    async fn update_endpoint_status(
        &self,
        id: &str,
        status: EndpointStatus,
        at: DateTime<Utc>,
    ) -> BridgeResult<()> {
        let mut endpoints = self.endpoints.write().await;
        let endpoint = endpoints
            .get_mut(id)
            .ok_or_else(|| BridgeError::UnknownEndpoint(id.to_owned()))?;
        endpoint.status = status;
        endpoint.status_changed_at = Some(at);
        Ok(())
    }

    async fn append_event(&self, record: EventRecord) -> BridgeResult<()> {
        self.events
            .write()
            .await
            .entry(record.endpoint_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn events(&self, endpoint_id: &str, query: EventQuery) -> BridgeResult<Vec<EventRecord>> {
        let events = self.events.read().await;
        let Some(events) = events.get(endpoint_id) else {
            return Ok(Vec::new());
        };
        let newest_first = events
            .iter()
            .rev()
            .take_while(|e| query.since.map_or(true, |since| e.recorded_at >= since))
            .cloned();
        Ok(match query.limit {
            Some(limit) => newest_first.take(limit).collect(),
            None => newest_first.collect(),
        })
    }

    async fn insert_alert(&self, alert: IntegrationAlert) -> BridgeResult<()> {
        self.alerts.write().await.push(alert);
        Ok(())
    }

    async fn open_alert(
        &self,
        endpoint_id: &str,
        condition: AlertCondition,
    ) -> BridgeResult<Option<IntegrationAlert>> {
        Ok(self
            .alerts
            .read()
            .await
            .iter()
            .find(|a| a.endpoint_id == endpoint_id && a.condition == condition && a.is_open())
            .cloned())
    }

    async fn acknowledge_alert(
        &self,
        id: &TimestampId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> BridgeResult<IntegrationAlert> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .iter_mut()
            .find(|a| &a.id == id)
            .ok_or_else(|| BridgeError::UnknownAlert(id.to_string()))?;
        if let Some(by) = &alert.acknowledged_by {
            return Err(BridgeError::AlertAlreadyAcknowledged {
                id: id.to_string(),
                by: by.to_string(),
            });
        }
        alert.acknowledged_by = Some(actor.clone());
        alert.acknowledged_at = Some(at);
        Ok(alert.clone())
    }

    async fn alerts(&self, endpoint_id: Option<&str>) -> BridgeResult<Vec<IntegrationAlert>> {
        Ok(self
            .alerts
            .read()
            .await
            .iter()
            .filter(|a| endpoint_id.map_or(true, |id| a.endpoint_id == id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::IntegrationEvent;
    use std::time::Duration;

    fn record(endpoint: &str, at: DateTime<Utc>, healthy: bool) -> EventRecord {
        EventRecord {
            id: TimestampId::generate(None),
            endpoint_id: endpoint.into(),
            recorded_at: at,
            event: IntegrationEvent::HealthCheck {
                healthy,
                latency_ms: None,
            },
        }
    }

    #[tokio::test]
    async fn events_are_returned_newest_first_within_window() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for minutes_ago in [30, 20, 10, 0] {
            let at = now - chrono::Duration::minutes(minutes_ago);
            store
                .append_event(record("lab", at, minutes_ago != 0))
                .await
                .expect("append");
        }
        store
            .append_event(record("other", now, true))
            .await
            .expect("append");

        let last_two = store
            .events("lab", EventQuery::window(StatusWindow::Count(2), now))
            .await
            .expect("events");
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].recorded_at, now);
        assert!(last_two[0].event.is_failure());

        let last_quarter = store
            .events(
                "lab",
                EventQuery::window(StatusWindow::Duration(Duration::from_secs(15 * 60)), now),
            )
            .await
            .expect("events");
        assert_eq!(last_quarter.len(), 2);

        assert!(store
            .events("missing", EventQuery::default())
            .await
            .expect("events")
            .is_empty());
    }

    #[tokio::test]
    async fn alerts_acknowledge_once() {
        let store = MemoryStore::new();
        let alert = IntegrationAlert {
            id: TimestampId::generate(None),
            endpoint_id: "lab".into(),
            condition: AlertCondition::Down,
            message: "down".into(),
            raised_at: Utc::now(),
            acknowledged_by: None,
            acknowledged_at: None,
        };
        store.insert_alert(alert.clone()).await.expect("insert");
        assert!(store
            .open_alert("lab", AlertCondition::Down)
            .await
            .expect("query")
            .is_some());
        assert!(store
            .open_alert("lab", AlertCondition::Degraded)
            .await
            .expect("query")
            .is_none());

        let actor = Actor::new("nurse.ani").expect("actor");
        let acked = store
            .acknowledge_alert(&alert.id, &actor, Utc::now())
            .await
            .expect("acknowledge");
        assert_eq!(acked.acknowledged_by, Some(actor.clone()));
        assert!(store
            .open_alert("lab", AlertCondition::Down)
            .await
            .expect("query")
            .is_none());

        match store.acknowledge_alert(&alert.id, &actor, Utc::now()).await {
            Err(BridgeError::AlertAlreadyAcknowledged { by, .. }) => assert_eq!(by, "nurse.ani"),
            other => panic!("expected AlertAlreadyAcknowledged, got {other:?}"),
        }
        let unknown = TimestampId::generate(None);
        assert!(matches!(
            store.acknowledge_alert(&unknown, &actor, Utc::now()).await,
            Err(BridgeError::UnknownAlert(_))
        ));
    }

    #[tokio::test]
    async fn status_update_requires_known_endpoint() {
        let store = MemoryStore::new();
        match store
            .update_endpoint_status("ghost", EndpointStatus::Down, Utc::now())
            .await
        {
            Err(BridgeError::UnknownEndpoint(id)) => assert_eq!(id, "ghost"),
            other => panic!("expected UnknownEndpoint, got {other:?}"),
        }
    }
}
