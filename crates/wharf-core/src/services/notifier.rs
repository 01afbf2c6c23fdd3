use tokio::sync::mpsc;

use crate::models::DeploymentEvent;

/// Receives lifecycle events for downstream consumers. Delivery is
/// fire-and-forget: the core never waits on or depends on it.
pub trait EventNotifier: Send + Sync {
    fn emit(&self, event: DeploymentEvent);
}

/// Discards every event.
impl EventNotifier for () {
    fn emit(&self, _event: DeploymentEvent) {}
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<DeploymentEvent>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::UnboundedSender<DeploymentEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeploymentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventNotifier for ChannelNotifier {
    fn emit(&self, event: DeploymentEvent) {
        // A closed receiver just means nobody is listening.
        let _ = self.tx.send(event);
    }
}

/// Writes each event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl EventNotifier for TracingNotifier {
    fn emit(&self, event: DeploymentEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        match &event {
            DeploymentEvent::TeardownFailed { .. } => {
                tracing::warn!(project_id = event.project_id(), kind = event.kind(), %payload, "deployment event")
            }
            DeploymentEvent::ReconciliationCorrected { anomaly: true, .. } => {
                tracing::warn!(project_id = event.project_id(), kind = event.kind(), %payload, "deployment event")
            }
            _ => {
                tracing::info!(project_id = event.project_id(), kind = event.kind(), %payload, "deployment event")
            }
        }
    }
}
