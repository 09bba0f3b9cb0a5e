use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectionError;
use crate::events::{EventSink, GatedSink};

use super::link::LinkOpener;
use super::params::SerialParams;
use super::reader::LineReader;
use super::sampler::{LatestWeight, SamplerConfig, WeightSampler};

// Set to false to silence connect/disconnect logging
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Upper bound on how long `disconnect()` waits for each worker.
const JOIN_TIMEOUT: Duration = Duration::from_millis(1500);

/// What the weighbridge can tell a caller right now.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum WeighbridgeStatus {
    Disconnected,
    AwaitingReading,
    Reading { weight: f64 },
}

/// Live weight as seen by the weighment workflow.
pub trait WeightSource: Send + Sync {
    fn weight_status(&self) -> WeighbridgeStatus;
}

struct ActiveLink {
    params: SerialParams,
    cancel: CancellationToken,
    events: Arc<GatedSink>,
    reader: JoinHandle<()>,
    sampler: JoinHandle<()>,
}

/// Owns the serial reader and weight sampler for one weighbridge and pushes
/// every sampled weight to the event sink.
pub struct WeighbridgeSession {
    opener: Arc<dyn LinkOpener>,
    sampler_config: SamplerConfig,
    sink: Arc<dyn EventSink>,
    active: Mutex<Option<ActiveLink>>,
    // Mirrors `active` for synchronous status reads from the workflow.
    latest: std::sync::Mutex<Option<Arc<LatestWeight>>>,
}

impl WeighbridgeSession {
    pub fn new(
        opener: Arc<dyn LinkOpener>,
        sampler_config: SamplerConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            opener,
            sampler_config,
            sink,
            active: Mutex::new(None),
            latest: std::sync::Mutex::new(None),
        }
    }

    /// Opens the port and starts both workers. Fails synchronously if the
    /// device cannot be opened; nothing is left running in that case.
    pub async fn connect(&self, params: SerialParams) -> Result<(), ConnectionError> {
        let mut active = self.active.lock().await;
        if let Some(link) = active.as_ref() {
            return Err(ConnectionError::AlreadyConnected(
                link.params.port_name.clone(),
            ));
        }

        params.validate()?;

        let opener = Arc::clone(&self.opener);
        let open_params = params.clone();
        let link = tokio::task::spawn_blocking(move || opener.open(&open_params))
            .await
            .map_err(|err| ConnectionError::Open {
                port: params.port_name.clone(),
                reason: format!("open worker failed: {err}"),
            })??;

        let cancel = CancellationToken::new();
        let events = Arc::new(GatedSink::new(Arc::clone(&self.sink)));
        let latest = Arc::new(LatestWeight::default());
        let (line_tx, line_rx) = mpsc::unbounded_channel();

        let reader = LineReader {
            link,
            port: params.port_name.clone(),
            lines: line_tx,
            events: Arc::clone(&events),
            cancel: cancel.clone(),
            degraded_after: self.sampler_config.degraded_after_failures.max(1),
        };
        let sampler = WeightSampler {
            config: self.sampler_config.clone(),
            lines: line_rx,
            events: Arc::clone(&events),
            latest: Arc::clone(&latest),
            cancel: cancel.clone(),
        };

        let reader = tokio::task::spawn_blocking(move || reader.run());
        let sampler = tokio::spawn(sampler.run());

        log_info!("weighbridge connected: {}", params.describe());

        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(latest);
        *active = Some(ActiveLink {
            params,
            cancel,
            events,
            reader,
            sampler,
        });
        Ok(())
    }

    /// Stops both workers and releases the port. Safe to call repeatedly or
    /// before any connect. Once this returns no further weight update from
    /// the old connection reaches the sink.
    pub async fn disconnect(&self) {
        let mut active = self.active.lock().await;
        let Some(link) = active.take() else {
            return;
        };

        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = None;

        link.cancel.cancel();
        link.events.close();

        // The reader drops the port handle on its way out.
        tokio::join!(
            join_worker("sampler", link.sampler),
            join_worker("serial reader", link.reader)
        );

        log_info!("weighbridge disconnected from {}", link.params.port_name);
    }

    pub async fn is_connected(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Parameters of the live connection, if any.
    pub async fn connected_params(&self) -> Option<SerialParams> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|link| link.params.clone())
    }

    pub fn status(&self) -> WeighbridgeStatus {
        let guard = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            None => WeighbridgeStatus::Disconnected,
            Some(latest) => match latest.get() {
                Some(reading) => WeighbridgeStatus::Reading {
                    weight: reading.weight,
                },
                None => WeighbridgeStatus::AwaitingReading,
            },
        }
    }

    /// Most recent sampled weight on the live connection.
    pub fn current_weight(&self) -> Option<f64> {
        match self.status() {
            WeighbridgeStatus::Reading { weight } => Some(weight),
            _ => None,
        }
    }
}

impl WeightSource for WeighbridgeSession {
    fn weight_status(&self) -> WeighbridgeStatus {
        self.status()
    }
}

async fn join_worker(name: &str, handle: JoinHandle<()>) {
    match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) if err.is_panic() => log_error!("{name} task panicked: {err}"),
        Ok(Err(err)) => log_warn!("{name} task failed to join: {err}"),
        Err(_) => log_warn!(
            "{name} did not stop within {}ms; its events are already gated",
            JOIN_TIMEOUT.as_millis()
        ),
    }
}

impl Drop for WeighbridgeSession {
    fn drop(&mut self) {
        if let Some(link) = self.active.get_mut().take() {
            link.cancel.cancel();
            link.events.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CoreEvent;
    use crate::weighbridge::link::SerialLink;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Replays scripted chunks, then repeats the last frame forever.
    struct ScriptedLink {
        chunks: VecDeque<Vec<u8>>,
        repeat: Option<Vec<u8>>,
        closed: Arc<AtomicBool>,
    }

    impl SerialLink for ScriptedLink {
        fn bytes_available(&mut self) -> io::Result<u32> {
            if self.chunks.is_empty() {
                if let Some(frame) = &self.repeat {
                    self.chunks.push_back(frame.clone());
                }
            }
            Ok(self.chunks.front().map_or(0, |chunk| chunk.len() as u32))
        }

        fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(chunk) = self.chunks.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.push_front(chunk[n..].to_vec());
            }
            std::thread::sleep(Duration::from_millis(2));
            Ok(n)
        }
    }

    impl Drop for ScriptedLink {
        fn drop(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct ScriptedOpener {
        frame: Option<Vec<u8>>,
        closed: Arc<AtomicBool>,
    }

    impl LinkOpener for ScriptedOpener {
        fn open(
            &self,
            params: &SerialParams,
        ) -> Result<Box<dyn crate::weighbridge::link::SerialLink>, ConnectionError> {
            if params.port_name == "BUSY" {
                return Err(ConnectionError::Open {
                    port: params.port_name.clone(),
                    reason: "device or resource busy".into(),
                });
            }
            self.closed.store(false, Ordering::SeqCst);
            Ok(Box::new(ScriptedLink {
                chunks: VecDeque::new(),
                repeat: self.frame.clone(),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn session(
        frame: Option<&str>,
    ) -> (
        WeighbridgeSession,
        UnboundedReceiver<CoreEvent>,
        Arc<AtomicBool>,
    ) {
        let closed = Arc::new(AtomicBool::new(false));
        let opener = ScriptedOpener {
            frame: frame.map(|f| f.as_bytes().to_vec()),
            closed: Arc::clone(&closed),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let config = SamplerConfig {
            window_ms: 50,
            poll_interval_ms: 5,
            ..SamplerConfig::default()
        };
        (
            WeighbridgeSession::new(Arc::new(opener), config, Arc::new(tx)),
            rx,
            closed,
        )
    }

    fn port(name: &str) -> SerialParams {
        SerialParams {
            port_name: name.into(),
            ..SerialParams::default()
        }
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_a_no_op() {
        let (session, _events, _closed) = session(None);
        session.disconnect().await;
        session.disconnect().await;
        assert!(!session.is_connected().await);
        assert_eq!(session.status(), WeighbridgeStatus::Disconnected);
    }

    #[tokio::test]
    async fn open_failure_is_reported_and_leaves_session_disconnected() {
        let (session, _events, _closed) = session(None);
        let err = session.connect(port("BUSY")).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Open { .. }));
        assert!(!session.is_connected().await);
    }

    #[tokio::test]
    async fn missing_port_is_rejected_before_opening() {
        let (session, _events, _closed) = session(None);
        assert!(matches!(
            session.connect(port("")).await,
            Err(ConnectionError::NoPort)
        ));
    }

    #[tokio::test]
    async fn second_connect_is_rejected_while_connected() {
        let (session, _events, _closed) = session(None);
        session.connect(port("COM3")).await.unwrap();
        assert!(matches!(
            session.connect(port("COM4")).await,
            Err(ConnectionError::AlreadyConnected(p)) if p == "COM3"
        ));
        session.disconnect().await;
    }

    #[tokio::test]
    async fn connected_session_publishes_sampled_weight() {
        let (session, mut events, _closed) = session(Some("ST,GS,+018000kg\r\n"));
        session.connect(port("COM3")).await.unwrap();
        assert!(session.is_connected().await);

        let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
            .await
            .expect("a window should close")
            .expect("sink open");
        assert!(matches!(event, CoreEvent::WeightUpdated { weight } if weight == 18000.0));
        assert_eq!(session.current_weight(), Some(18000.0));

        session.disconnect().await;
        assert_eq!(session.status(), WeighbridgeStatus::Disconnected);
    }

    #[tokio::test]
    async fn no_weight_updates_after_disconnect_returns() {
        let (session, mut events, closed) = session(Some("+018000\n"));
        session.connect(port("COM3")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        session.disconnect().await;
        assert!(closed.load(Ordering::SeqCst), "port handle released");

        while events.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(events.try_recv().is_err());

        session.disconnect().await;
        assert!(!session.is_connected().await);
    }

    #[tokio::test]
    async fn reconnect_after_disconnect_starts_fresh() {
        let (session, _events, _closed) = session(None);
        session.connect(port("COM3")).await.unwrap();
        assert_eq!(session.status(), WeighbridgeStatus::AwaitingReading);
        session.disconnect().await;

        session.connect(port("COM3")).await.unwrap();
        assert_eq!(
            session.connected_params().await.map(|p| p.port_name),
            Some("COM3".to_string())
        );
        session.disconnect().await;
    }
}
