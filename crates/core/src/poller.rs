//! Background health polling.
//!
//! The poller runs on its own Tokio task, independent of transform calls. Each interval it
//! probes every registered endpoint that has an address, with a bounded timeout per probe,
//! and records the result through the monitor like any other integration event.
//!
//! Stopping takes effect between polls. A poll that is already running completes first.

use crate::integration::{EndpointStatus, IntegrationEndpoint, IntegrationErrorKind, IntegrationEvent};
use crate::monitor::IntegrationMonitor;
use crate::{BridgeError, BridgeResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Why a probe did not report the endpoint healthy.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("endpoint unavailable: {0}")]
    Unavailable(String),
    /// The endpoint answered but reported itself unhealthy.
    #[error("endpoint unhealthy: {0}")]
    Unhealthy(String),
}

/// Outbound check of one endpoint. Returns the observed latency when healthy.
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    async fn probe(&self, address: &str) -> Result<Duration, ProbeError>;
}

/// Measures TCP connect latency to `host:port`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpProbe;

#[async_trait]
impl EndpointProbe for TcpProbe {
    async fn probe(&self, address: &str) -> Result<Duration, ProbeError> {
        let started = Instant::now();
        tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| ProbeError::Unavailable(format!("{address}: {e}")))?;
        Ok(started.elapsed())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub struct HealthPoller {
    monitor: Arc<IntegrationMonitor>,
    probe: Arc<dyn EndpointProbe>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthPoller {
    /// # Arguments
    ///
    /// * `interval` - Time between the starts of two polls.
    /// * `probe_timeout` - Upper bound for a single probe; expiry is recorded as a
    ///   `timeout` integration error.
    pub fn new(
        monitor: Arc<IntegrationMonitor>,
        probe: Arc<dyn EndpointProbe>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            monitor,
            probe,
            interval,
            probe_timeout,
        }
    }

    /// Probe every endpoint with an address once and return the resulting statuses.
    ///
    /// A failure to record one endpoint's result is logged and does not stop the others.
    pub async fn poll_once(&self) -> BridgeResult<Vec<(String, EndpointStatus)>> {
        let endpoints = self.monitor.endpoints().await?;
        let mut statuses = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let Some(address) = endpoint.address.as_deref() else {
                tracing::debug!(endpoint = %endpoint.id, "no address; not probed");
                continue;
            };
            let event = self.check(&endpoint, address).await;
            match self
                .monitor
                .record_integration_event(endpoint.id.as_str(), event)
                .await
            {
                Ok(status) => statuses.push((endpoint.id.as_str().to_owned(), status)),
                Err(err) => {
                    tracing::warn!(endpoint = %endpoint.id, error = %err, "failed to record health check")
                }
            }
        }
        Ok(statuses)
    }

    async fn check(&self, endpoint: &IntegrationEndpoint, address: &str) -> IntegrationEvent {
        match tokio::time::timeout(self.probe_timeout, self.probe.probe(address)).await {
            Ok(Ok(latency)) => IntegrationEvent::HealthCheck {
                healthy: true,
                latency_ms: Some(millis(latency)),
            },
            Ok(Err(ProbeError::Unhealthy(reason))) => {
                tracing::debug!(endpoint = %endpoint.id, reason = %reason, "probe reported unhealthy");
                IntegrationEvent::HealthCheck {
                    healthy: false,
                    latency_ms: None,
                }
            }
            Ok(Err(err @ ProbeError::Unavailable(_))) => IntegrationEvent::Error {
                kind: IntegrationErrorKind::EndpointUnavailable,
                message: err.to_string(),
            },
            Err(_) => IntegrationEvent::Error {
                kind: IntegrationErrorKind::Timeout,
                message: format!("no answer within {}ms", millis(self.probe_timeout)),
            },
        }
    }

    /// Start polling on a new task. The first poll runs immediately.
    pub fn spawn(self) -> PollerHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_secs = self.interval.as_secs(), "health poller started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.changed() => break,
                }
                if *stop.borrow() {
                    break;
                }
                match self.poll_once().await {
                    Ok(statuses) => tracing::debug!(probed = statuses.len(), "health poll complete"),
                    Err(err) => tracing::warn!(error = %err, "health poll failed"),
                }
            }

            tracing::info!("health poller stopped");
        });

        PollerHandle { shutdown, task }
    }
}

/// Handle to a running [`HealthPoller`].
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Ask the poller to stop and wait for it. An in-flight poll finishes first.
    pub async fn stop(self) -> BridgeResult<()> {
        if self.shutdown.send(true).is_err() {
            tracing::debug!("health poller already exited before stop");
        }
        self.task
            .await
            .map_err(|e| BridgeError::Task(format!("health poller: {e}")))
    }
}
