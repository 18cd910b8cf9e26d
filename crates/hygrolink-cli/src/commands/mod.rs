//! Command implementations for the CLI.

mod config;
mod decode;
mod monitor;
mod scan;

use std::io::{self, BufRead};
use std::time::Duration;

use hygrolink_core::{BleStack, DeviceEvent, DeviceRecord, EventReceiver, ScanSession};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

pub use config::cmd_config;
pub use decode::cmd_decode;
pub use monitor::{MonitorArgs, cmd_monitor};
pub use scan::cmd_scan;

/// Lines typed on stdin.
///
/// A plain thread does the blocking reads so that a pending read never
/// holds up runtime shutdown, and so that waiting for a line can be raced
/// against other futures without losing input.
pub struct InputLines {
    rx: mpsc::UnboundedReceiver<String>,
}

impl InputLines {
    pub fn stdin() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
        });
        Self { rx }
    }

    /// Next line, or `None` once stdin is closed.
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Why a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// The operator pressed Enter.
    Enter,
    /// Stdin closed with no timeout configured.
    InputClosed,
    /// The timeout elapsed.
    Timeout,
    /// The discovery callback asked to stop.
    Found,
    /// Ctrl-C.
    Interrupted,
}

/// Scan until Enter, the timeout, Ctrl-C, or `on_discovered` returns `true`.
///
/// `events` must be subscribed before calling so that no discovery is
/// missed. Discoveries recorded while the scan is being stopped are still
/// passed to `on_discovered`.
pub async fn scan_until<S: BleStack>(
    session: &ScanSession<S>,
    events: &mut EventReceiver,
    input: &mut InputLines,
    timeout: Option<Duration>,
    mut on_discovered: impl FnMut(&DeviceRecord) -> bool,
) -> anyhow::Result<ScanEnd> {
    session.start().await?;

    let deadline = timeout.map(|t| Instant::now() + t);
    let mut input_open = true;
    let end = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(record) = discovered(event)
                        && on_discovered(&record)
                    {
                        break ScanEnd::Found;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break ScanEnd::Interrupted,
            },
            line = input.next_line(), if input_open => match line {
                Some(_) => break ScanEnd::Enter,
                // Piped input: keep scanning until the deadline
                None if deadline.is_some() => input_open = false,
                None => break ScanEnd::InputClosed,
            },
            _ = sleep_until(deadline) => break ScanEnd::Timeout,
            _ = tokio::signal::ctrl_c() => break ScanEnd::Interrupted,
        }
    };

    session.stop().await?;

    if end != ScanEnd::Found {
        while let Ok(event) = events.try_recv() {
            if let Some(record) = discovered(event)
                && on_discovered(&record)
            {
                break;
            }
        }
    }

    debug!("Scan ended: {:?}", end);
    Ok(end)
}

fn discovered(event: DeviceEvent) -> Option<DeviceRecord> {
    match event {
        DeviceEvent::Discovered {
            index,
            name,
            address,
        } => Some(DeviceRecord {
            index,
            name,
            address,
        }),
        _ => None,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hygrolink_core::{Advertisement, BleAddress, EventDispatcher, MockStack};
    use std::sync::Arc;

    fn input() -> (mpsc::UnboundedSender<String>, InputLines) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, InputLines { rx })
    }

    #[tokio::test]
    async fn test_scan_stops_on_enter() {
        let stack = Arc::new(MockStack::new());
        let events = EventDispatcher::default();
        let mut rx = events.subscribe();
        let session = ScanSession::new(Arc::clone(&stack), events);
        let (tx, mut lines) = input();

        tx.send(String::new()).unwrap();
        let end = scan_until(&session, &mut rx, &mut lines, None, |_| false)
            .await
            .unwrap();

        assert_eq!(end, ScanEnd::Enter);
        assert!(!stack.is_scanning());
    }

    #[tokio::test]
    async fn test_scan_stops_when_input_closes() {
        let stack = Arc::new(MockStack::new());
        let events = EventDispatcher::default();
        let mut rx = events.subscribe();
        let session = ScanSession::new(Arc::clone(&stack), events);
        let (tx, mut lines) = input();
        drop(tx);

        let end = scan_until(&session, &mut rx, &mut lines, None, |_| false)
            .await
            .unwrap();
        assert_eq!(end, ScanEnd::InputClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_input_waits_for_timeout() {
        let stack = Arc::new(MockStack::new());
        let events = EventDispatcher::default();
        let mut rx = events.subscribe();
        let session = ScanSession::new(Arc::clone(&stack), events);
        let (tx, mut lines) = input();
        drop(tx);

        let end = scan_until(
            &session,
            &mut rx,
            &mut lines,
            Some(Duration::from_secs(5)),
            |_| false,
        )
        .await
        .unwrap();
        assert_eq!(end, ScanEnd::Timeout);
    }

    #[tokio::test]
    async fn test_scan_stops_when_target_found() {
        let stack = Arc::new(MockStack::new());
        let events = EventDispatcher::default();
        let mut rx = events.subscribe();
        let session = ScanSession::new(Arc::clone(&stack), events);
        let (_tx, mut lines) = input();
        let target = BleAddress::new(0xC47C_8D6A_1234);

        let scanner = Arc::clone(&stack);
        tokio::spawn(async move {
            while !scanner.is_scanning() {
                tokio::task::yield_now().await;
            }
            scanner.advertise(Advertisement::new(BleAddress::new(1), None));
            scanner.advertise(Advertisement::new(target, Some("ThermoBeacon")));
        });

        let mut seen = Vec::new();
        let end = scan_until(&session, &mut rx, &mut lines, None, |record| {
            seen.push(record.index);
            record.address == target
        })
        .await
        .unwrap();

        assert_eq!(end, ScanEnd::Found);
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(session.registry().resolve(2), Some(target));
    }
}
