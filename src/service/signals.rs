// Unix signal handling for graceful shutdown

use crate::error::{LexError, Result};
use tokio::signal::unix::{signal, Signal as TokioSignal, SignalKind};

/// Signals the service reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Interrupt,
    Hangup,
}

/// Listens for SIGTERM, SIGINT and SIGHUP
pub struct SignalHandler {
    sigterm: TokioSignal,
    sigint: TokioSignal,
    sighup: TokioSignal,
}

fn install(kind: SignalKind, name: &str) -> Result<TokioSignal> {
    signal(kind).map_err(|e| LexError::Io {
        source: e,
        context: format!("Failed to setup {} handler", name),
    })
}

impl SignalHandler {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sigterm: install(SignalKind::terminate(), "SIGTERM")?,
            sigint: install(SignalKind::interrupt(), "SIGINT")?,
            sighup: install(SignalKind::hangup(), "SIGHUP")?,
        })
    }

    /// Wait for the next signal
    pub async fn wait(&mut self) -> Signal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                Signal::Terminate
            }
            _ = self.sigint.recv() => {
                tracing::info!("Received SIGINT");
                Signal::Interrupt
            }
            _ = self.sighup.recv() => {
                tracing::info!("Received SIGHUP");
                Signal::Hangup
            }
        }
    }
}

impl Signal {
    /// Every handled signal stops the service; there is no reload
    pub fn should_shutdown(&self) -> bool {
        matches!(self, Signal::Terminate | Signal::Interrupt | Signal::Hangup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_installs() {
        assert!(SignalHandler::new().is_ok());
    }

    #[test]
    fn test_all_signals_shut_down() {
        assert!(Signal::Terminate.should_shutdown());
        assert!(Signal::Interrupt.should_shutdown());
        assert!(Signal::Hangup.should_shutdown());
    }
}
