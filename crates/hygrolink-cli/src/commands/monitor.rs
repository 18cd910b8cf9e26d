//! Monitor command: scan, select, connect, subscribe and print readings.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use hygrolink_core::{
    BleAddress, BleStack, BtleplugStack, ConnectionConfig, ConnectionHandle, ConnectionManager,
    DeviceEvent, Error, EventDispatcher, GattSubscriptionManager, RetryConfig, ScanSession,
    SubscribeFailure, with_retry,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{InputLines, ScanEnd, scan_until};
use crate::cli::OutputFormat;
use crate::format::{
    FormatOptions, format_discovered, format_info, format_reading, format_success,
    format_warning,
};

/// Resolved arguments for the monitor command.
#[derive(Debug, Clone)]
pub struct MonitorArgs {
    pub device: Option<BleAddress>,
    pub scan_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub service: u16,
    pub characteristic: u16,
    pub retries: u32,
    pub format: OutputFormat,
    pub quiet: bool,
}

pub async fn cmd_monitor(args: MonitorArgs, opts: &FormatOptions) -> Result<()> {
    let config = ConnectionConfig::new().connection_timeout(args.connect_timeout);
    let stack = Arc::new(
        BtleplugStack::with_config(config)
            .await
            .context("Failed to open Bluetooth adapter")?,
    );

    let shutdown = CancellationToken::new();
    let ctrl_c = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        })
    };

    let mut input = InputLines::stdin();
    let result = monitor(
        stack,
        EventDispatcher::default(),
        &args,
        &mut input,
        opts,
        shutdown,
    )
    .await;
    ctrl_c.abort();
    result.map(|_| ())
}

/// Run the whole flow against `stack`. Returns the number of readings shown.
async fn monitor<S: BleStack>(
    stack: Arc<S>,
    events: EventDispatcher,
    args: &MonitorArgs,
    input: &mut InputLines,
    opts: &FormatOptions,
    shutdown: CancellationToken,
) -> Result<usize> {
    let out = Output {
        format: args.format,
        quiet: args.quiet,
        no_color: opts.no_color,
    };
    let connections = ConnectionManager::new(Arc::clone(&stack), events.clone());
    let retry = RetryConfig::for_connect(args.retries);

    let Some(handle) = (match args.device {
        Some(target) => {
            connect_to_address(&stack, &events, &connections, &retry, args, input, target, &out)
                .await?
        }
        None => {
            select_and_connect(&stack, &events, &connections, &retry, args, input, &out, &shutdown)
                .await?
        }
    }) else {
        return Ok(0);
    };

    let address = handle.address();
    out.status(&format_success(&format!("Connected to {}", address), out.no_color));

    let mut rx = events.subscribe();
    let subscription = match GattSubscriptionManager::new(Arc::clone(&stack), events.clone())
        .subscribe_temperature_humidity(handle, args.service, args.characteristic)
        .await
    {
        Ok(subscription) => subscription,
        // The handler is still registered; the device may notify regardless.
        Err(SubscribeFailure::NotifyWriteFailed {
            error,
            subscription,
        }) => {
            eprintln!(
                "{}",
                format_warning(&format!("{}; listening anyway", error), out.no_color)
            );
            subscription
        }
        Err(failure) => {
            return Err(failure).with_context(|| format!("Failed to subscribe to {}", address));
        }
    };
    out.status(&format_info(
        "Receiving notifications. Press Ctrl-C to stop.",
        out.no_color,
    ));

    let mut readings = 0;
    loop {
        tokio::select! {
            biased;
            event = rx.recv() => match event {
                Ok(DeviceEvent::Telemetry { address, reading }) => {
                    readings += 1;
                    print!("{}", format_reading(Some(address), &reading, out.format, opts)?);
                }
                Ok(DeviceEvent::DecodeFailed { raw, error, .. }) => {
                    eprintln!(
                        "{}",
                        format_warning(
                            &format!("Could not decode {}: {}", hygrolink_core::hex_dump(&raw), error),
                            out.no_color
                        )
                    );
                }
                Ok(other) => debug!("Event: {:?}", other),
                Err(RecvError::Lagged(n)) => warn!("Display fell behind; skipped {} events", n),
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.cancelled() => {
                subscription.cancel();
                break;
            }
            _ = subscription.hold() => break,
        }
    }

    subscription.unsubscribe().await;
    out.status(&format_success(
        &format!("Disconnected from {} after {} reading(s)", address, readings),
        out.no_color,
    ));
    Ok(readings)
}

#[allow(clippy::too_many_arguments)]
async fn connect_to_address<S: BleStack>(
    stack: &Arc<S>,
    events: &EventDispatcher,
    connections: &ConnectionManager<S>,
    retry: &RetryConfig,
    args: &MonitorArgs,
    input: &mut InputLines,
    target: BleAddress,
    out: &Output,
) -> Result<Option<ConnectionHandle<S>>> {
    let session = ScanSession::new(Arc::clone(stack), events.clone());
    let mut rx = events.subscribe();
    out.status(&format_info(
        &format!("Looking for {}. Press Enter to stop scanning.", target),
        out.no_color,
    ));

    let end = scan_until(&session, &mut rx, input, args.scan_timeout, |record| {
        out.line(&format_discovered(record, &out.format_options()));
        record.address == target
    })
    .await
    .context("Failed to scan for devices")?;

    if end == ScanEnd::Interrupted {
        return Ok(None);
    }
    if session.registry().get(target).is_none() {
        warn!("{} was not seen while scanning; trying to connect anyway", target);
    }

    let handle = with_retry(retry, "connect", || connections.connect(target))
        .await
        .with_context(|| format!("Failed to connect to {}", target))?;
    Ok(Some(handle))
}

#[allow(clippy::too_many_arguments)]
async fn select_and_connect<S: BleStack>(
    stack: &Arc<S>,
    events: &EventDispatcher,
    connections: &ConnectionManager<S>,
    retry: &RetryConfig,
    args: &MonitorArgs,
    input: &mut InputLines,
    out: &Output,
    shutdown: &CancellationToken,
) -> Result<Option<ConnectionHandle<S>>> {
    let session = ScanSession::new(Arc::clone(stack), events.clone());
    let mut rx = events.subscribe();
    out.status(&format_info(
        "Scanning for devices. Press Enter to stop scanning.",
        out.no_color,
    ));

    let end = scan_until(&session, &mut rx, input, args.scan_timeout, |record| {
        out.line(&format_discovered(record, &out.format_options()));
        false
    })
    .await
    .context("Failed to scan for devices")?;

    if end == ScanEnd::Interrupted {
        return Ok(None);
    }
    let registry = session.registry();
    if registry.is_empty() {
        bail!("No devices found");
    }

    loop {
        out.prompt("Select a device to connect (enter index): ");
        let line = tokio::select! {
            line = input.next_line() => line,
            _ = shutdown.cancelled() => return Ok(None),
        };
        let Some(line) = line else {
            bail!("No device selected");
        };
        let Ok(index) = line.trim().parse::<u32>() else {
            out.line("Invalid index selected.");
            continue;
        };

        match with_retry(retry, "connect", || connections.connect_index(&registry, index)).await {
            Ok(handle) => return Ok(Some(handle)),
            Err(Error::UnknownIndex(_)) => out.line("Invalid index selected."),
            Err(e) => return Err(e).context("Failed to connect"),
        }
    }
}

/// Where the interactive text goes. With JSON output, stdout carries only
/// readings and everything else moves to stderr.
struct Output {
    format: OutputFormat,
    quiet: bool,
    no_color: bool,
}

impl Output {
    fn format_options(&self) -> FormatOptions {
        FormatOptions::new(self.no_color, false)
    }

    fn line(&self, text: &str) {
        match self.format {
            OutputFormat::Text => println!("{}", text),
            OutputFormat::Json => eprintln!("{}", text),
        }
    }

    fn prompt(&self, text: &str) {
        match self.format {
            OutputFormat::Text => {
                print!("{}", text);
                let _ = io::stdout().flush();
            }
            OutputFormat::Json => {
                eprint!("{}", text);
                let _ = io::stderr().flush();
            }
        }
    }

    fn status(&self, text: &str) {
        if !self.quiet {
            eprintln!("{}", text);
        }
    }
}
