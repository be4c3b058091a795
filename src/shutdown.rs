//! Process signal handling. SIGINT and SIGTERM are treated alike: the first
//! one asks for a graceful drain, any later one for an immediate stop.

use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Graceful,
    Immediate,
}

/// Installs the signal handlers and returns the receiving end. Handlers are
/// registered before this returns and stay registered for the process
/// lifetime, so no signal is missed between deliveries.
pub fn listen() -> mpsc::Receiver<ShutdownSignal> {
    let (tx, rx) = mpsc::channel(4);
    let mut signals = match Signals::install() {
        Ok(signals) => signals,
        Err(e) => {
            warn!("Failed to install shutdown signal handlers: {}", e);
            return rx;
        }
    };

    tokio::spawn(async move {
        let mut received = 0usize;
        while let Some(name) = signals.recv().await {
            received += 1;
            let signal = if received == 1 {
                info!("Received {}, shutting down gracefully", name);
                ShutdownSignal::Graceful
            } else {
                warn!("Received {} again, stopping immediately", name);
                ShutdownSignal::Immediate
            };
            if tx.send(signal).await.is_err() {
                return;
            }
        }
    });
    rx
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> Option<&'static str> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|_| "SIGINT"),
            received = self.terminate.recv() => received.map(|_| "SIGTERM"),
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<&'static str> {
        tokio::signal::ctrl_c().await.ok().map(|_| "Ctrl-C")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn send_sigterm() {
        let status = tokio::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .await
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn repeated_sigterm_escalates_to_immediate() {
        let mut rx = listen();

        send_sigterm().await;
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(ShutdownSignal::Graceful));

        send_sigterm().await;
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(second, Some(ShutdownSignal::Immediate));
    }
}
