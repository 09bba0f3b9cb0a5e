//! Outbound notifications for the UI collaborator.
//!
//! Weight updates, link health, ticket lifecycle changes and save results
//! all travel through one sink so the UI can marshal them onto its own
//! execution context. Serial-layer faults are tagged distinctly from weight
//! updates and never surface as errors in the workflow layer.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::store::Ticket;
use crate::workflow::TicketState;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CoreEvent {
    #[serde(rename_all = "camelCase")]
    WeightUpdated { weight: f64 },
    #[serde(rename_all = "camelCase")]
    LinkDegraded { port: String, consecutive_failures: u32 },
    #[serde(rename_all = "camelCase")]
    LinkRecovered { port: String },
    #[serde(rename_all = "camelCase")]
    TicketStateChanged { ticket_no: String, state: TicketState },
    #[serde(rename_all = "camelCase")]
    SaveResult { success: bool, ticket: Ticket },
}

impl CoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::WeightUpdated { .. } => "weight-updated",
            CoreEvent::LinkDegraded { .. } => "link-degraded",
            CoreEvent::LinkRecovered { .. } => "link-recovered",
            CoreEvent::TicketStateChanged { .. } => "ticket-state-changed",
            CoreEvent::SaveResult { .. } => "save-result",
        }
    }
}

pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: CoreEvent);
}

impl EventSink for UnboundedSender<CoreEvent> {
    fn emit(&self, event: CoreEvent) {
        // A closed receiver means the UI is gone; nothing left to notify.
        let _ = self.send(event);
    }
}

/// Sink that drops everything. Useful when no UI is attached.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: CoreEvent) {}
}

/// A sink that can be closed. Once [`GatedSink::close`] returns, no event
/// emitted through this gate reaches the inner sink, even from a worker that
/// has not yet noticed it was cancelled.
pub struct GatedSink {
    inner: Mutex<Option<Arc<dyn EventSink>>>,
}

impl GatedSink {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Mutex::new(Some(sink)),
        }
    }

    /// Returns false when the gate is already closed.
    pub fn emit(&self, event: CoreEvent) -> bool {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(sink) => {
                sink.emit(event);
                true
            }
            None => false,
        }
    }

    pub fn close(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn weight_update_serializes_with_kind_tag() {
        let json = serde_json::to_value(CoreEvent::WeightUpdated { weight: 18000.0 }).unwrap();
        assert_eq!(json["kind"], "weightUpdated");
        assert_eq!(json["weight"], 18000.0);
    }

    #[test]
    fn channel_sink_tolerates_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.emit(CoreEvent::LinkRecovered { port: "COM3".into() });
    }

    #[test]
    fn closed_gate_swallows_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gate = GatedSink::new(Arc::new(tx));

        assert!(gate.emit(CoreEvent::WeightUpdated { weight: 1.0 }));
        gate.close();
        assert!(!gate.emit(CoreEvent::WeightUpdated { weight: 2.0 }));

        assert!(matches!(
            rx.try_recv(),
            Ok(CoreEvent::WeightUpdated { weight }) if weight == 1.0
        ));
        assert!(rx.try_recv().is_err());
    }
}
