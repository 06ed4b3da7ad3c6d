use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Liveness tracking for the long-running loops of a process.
///
/// The announcement worker is a single polling loop that is expected to
/// come around every poll interval. Each loop registers itself here and
/// reports in on every cycle. The registry is healthy only when every
/// registered component has reported within its deadline:
///   - a component that never reported is still `Starting` and unhealthy,
///   - a component that explicitly reported `Unhealthy` is unhealthy,
///   - a component whose last report is older than its deadline is `Stalled`.
///
/// An empty registry is unhealthy, so a probe cannot pass before the loop
/// has started.
#[derive(Default, Debug)]
pub struct HealthStatus {
    /// True if every registered component is healthy.
    pub healthy: bool,
    /// Last known status of each component, for display.
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    /// 200 when healthy and 500 otherwise, with the component map in the body.
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set on registration, until the first report.
    Starting,
    /// Reported healthy; must report again before this instant.
    HealthyUntil(time::OffsetDateTime),
    /// Reported unhealthy.
    Unhealthy,
    /// The `HealthyUntil` deadline passed without a new report.
    Stalled,
}

impl ComponentStatus {
    pub fn is_healthy(&self) -> bool {
        match self {
            ComponentStatus::HealthyUntil(until) => until.gt(&time::OffsetDateTime::now_utc()),
            _ => false,
        }
    }
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

/// Handed to a component so it can report its own status.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: time::Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    /// Report healthy until now + deadline. Returns once the message is queued.
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            time::OffsetDateTime::now_utc().add(self.deadline),
        ))
        .await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!(component = %self.component, "failed to report health status: {}", err)
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    /// Must be called from within a tokio runtime: status updates are applied by a spawned task.
    pub fn new(name: &str) -> Self {
        let (tx, mut rx) = mpsc::channel::<HealthMessage>(16);
        let registry = Self {
            name: name.to_owned(),
            components: Default::default(),
            sender: tx,
        };

        let components = registry.components.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match components.write() {
                    Ok(mut map) => {
                        _ = map.insert(message.component, message.status);
                    }
                    // Probes fail from here on, which restarts the process.
                    Err(_) => warn!("poisoned HealthRegistry lock"),
                }
            }
        });

        registry
    }

    /// Register a component. It starts in `Starting` and must report at least once per `deadline`.
    pub async fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let deadline = time::Duration::try_from(deadline).unwrap_or(time::Duration::MAX);
        let handle = HealthHandle {
            component,
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Combined status of every registered component. Usable directly as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let components = match self.components.read() {
            Ok(components) => components,
            Err(_) => {
                warn!("{} health check failed: poisoned lock", self.name);
                return HealthStatus::default();
            }
        };

        let initial = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };

        let result = components
            .iter()
            .fold(initial, |mut result, (name, status)| {
                let status = match status {
                    ComponentStatus::HealthyUntil(_) if status.is_healthy() => status.clone(),
                    ComponentStatus::HealthyUntil(_) => ComponentStatus::Stalled,
                    other => other.clone(),
                };
                if !status.is_healthy() {
                    result.healthy = false;
                }
                _ = result.components.insert(name.clone(), status);
                result
            });

        match result.healthy {
            true => debug!("{} health check ok", self.name),
            false => warn!("{} health check failed: {:?}", self.name, result.components),
        }
        result
    }
}
