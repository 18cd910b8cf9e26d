//! Scan lifecycle.
//!
//! A [`ScanSession`] moves through `Idle → Scanning → Stopped` exactly once.
//! While scanning, advertisements arrive from the stack adapter over a
//! channel and a single task records them in the session's
//! [`DeviceRegistry`], announcing each new device as a
//! [`DeviceEvent::Discovered`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{DeviceEvent, EventDispatcher};
use crate::registry::DeviceRegistry;
use crate::stack::{Advertisement, BleStack};

/// State of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Created, not yet scanning.
    Idle,
    /// Scanning and recording advertisements.
    Scanning,
    /// Finished. A new session is needed to scan again.
    Stopped,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Idle => write!(f, "Idle"),
            ScanState::Scanning => write!(f, "Scanning"),
            ScanState::Stopped => write!(f, "Stopped"),
        }
    }
}

struct SessionInner {
    state: ScanState,
    task: Option<JoinHandle<()>>,
}

/// One scan, from start to stop.
pub struct ScanSession<S: BleStack> {
    stack: Arc<S>,
    registry: Arc<DeviceRegistry>,
    events: EventDispatcher,
    cancel_token: CancellationToken,
    inner: Mutex<SessionInner>,
}

impl<S: BleStack> fmt::Debug for ScanSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSession")
            .field("devices", &self.registry.len())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<S: BleStack> ScanSession<S> {
    /// Create an idle session with an empty registry.
    pub fn new(stack: Arc<S>, events: EventDispatcher) -> Self {
        Self {
            stack,
            registry: Arc::new(DeviceRegistry::new()),
            events,
            cancel_token: CancellationToken::new(),
            inner: Mutex::new(SessionInner {
                state: ScanState::Idle,
                task: None,
            }),
        }
    }

    /// The registry this session records into.
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        Arc::clone(&self.registry)
    }

    /// Current state.
    pub async fn state(&self) -> ScanState {
        self.inner.lock().await.state
    }

    /// Start active scanning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the session is idle, and
    /// [`Error::Platform`] if the stack refuses to scan (the session then
    /// stays idle).
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != ScanState::Idle {
            return Err(Error::invalid_state("start scanning", inner.state));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.stack.start_scan(true, tx).await?;

        inner.task = Some(tokio::spawn(record_advertisements(
            rx,
            Arc::clone(&self.registry),
            self.events.clone(),
            self.cancel_token.clone(),
        )));
        inner.state = ScanState::Scanning;
        info!("Scanning for devices...");
        Ok(())
    }

    /// Stop scanning.
    ///
    /// Advertisements already delivered before the call are still recorded.
    /// Calling `stop` again, or on a session that never started, is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the stack failed to stop scanning. The
    /// session is stopped regardless.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let was = inner.state;
        inner.state = ScanState::Stopped;
        if was != ScanState::Scanning {
            return Ok(());
        }

        let stop_result = self.stack.stop_scan().await;
        self.cancel_token.cancel();
        if let Some(task) = inner.task.take()
            && let Err(e) = task.await
        {
            warn!("Advertisement task ended abnormally: {}", e);
        }

        info!("Scan stopped. Found {} device(s)", self.registry.len());
        stop_result.map_err(Error::from)
    }

    /// Scan for a fixed duration, then stop.
    pub async fn run_for(&self, duration: Duration) -> Result<()> {
        self.start().await?;
        tokio::time::sleep(duration).await;
        self.stop().await
    }
}

impl<S: BleStack> Drop for ScanSession<S> {
    fn drop(&mut self) {
        // Stops the advertisement task if the session was never stopped.
        self.cancel_token.cancel();
    }
}

async fn record_advertisements(
    mut rx: mpsc::UnboundedReceiver<Advertisement>,
    registry: Arc<DeviceRegistry>,
    events: EventDispatcher,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            adv = rx.recv() => match adv {
                Some(adv) => record(&registry, &events, adv),
                None => {
                    debug!("Advertisement channel closed");
                    break;
                }
            },
            _ = cancel_token.cancelled() => {
                while let Ok(adv) = rx.try_recv() {
                    record(&registry, &events, adv);
                }
                break;
            }
        }
    }
}

fn record(registry: &DeviceRegistry, events: &EventDispatcher, adv: Advertisement) {
    if let Some(device) = registry.record_advertisement(adv.address, adv.name.as_deref()) {
        info!(
            "[{}] Device found: {} ({})",
            device.index, device.name, device.address
        );
        events.send(DeviceEvent::Discovered {
            index: device.index,
            name: device.name,
            address: device.address,
        });
    }
}
