// Signal handling for graceful backfill shutdown

use super::StopHandle;
use crate::error::{LaanaError, Result};
use tokio::signal::unix::{signal, Signal as TokioSignal, SignalKind};
use tokio::task::JoinHandle;

struct StopSignals {
    sigterm: TokioSignal,
    sigint: TokioSignal,
    sighup: TokioSignal,
}

impl StopSignals {
    fn new() -> Result<Self> {
        let install = |kind: SignalKind, name: &str| {
            signal(kind).map_err(|e| LaanaError::Io {
                source: e,
                context: format!("Failed to setup {} handler", name),
            })
        };
        Ok(Self {
            sigterm: install(SignalKind::terminate(), "SIGTERM")?,
            sigint: install(SignalKind::interrupt(), "SIGINT")?,
            sighup: install(SignalKind::hangup(), "SIGHUP")?,
        })
    }

    async fn wait(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sighup.recv() => "SIGHUP",
        }
    }
}

/// Request a stop on the first SIGINT, SIGTERM or SIGHUP
pub fn spawn_stop_listener(stop: StopHandle) -> Result<JoinHandle<()>> {
    let mut signals = StopSignals::new()?;
    Ok(tokio::spawn(async move {
        let name = signals.wait().await;
        tracing::info!("Received {}, finishing current batch", name);
        stop.request_stop();
    }))
}
