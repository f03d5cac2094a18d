// Service module: long-running process answering retrieval requests over a Unix socket

mod engine;
mod ipc;
mod signals;

pub use engine::Engine;
pub use ipc::{
    read_message, write_response, IpcClient, IpcMessage, IpcResponse, IpcServer, DEFAULT_CLIENT,
    MAX_MESSAGE_SIZE,
};
pub use signals::{Signal, SignalHandler};

use crate::config::{expand_tilde, Config};
use crate::error::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task;

/// Owns the engine, the socket and the background sweep for one run
pub struct Service {
    engine: Arc<Engine>,
    socket_path: PathBuf,
    max_connections: usize,
    sweep_interval: Duration,
}

impl Service {
    /// Build every component from configuration
    pub fn new(config: &Config) -> Result<Self> {
        let engine = Engine::from_config(config)?;
        Self::with_engine(config, engine)
    }

    pub fn with_engine(config: &Config, engine: Engine) -> Result<Self> {
        Ok(Self {
            engine: Arc::new(engine),
            socket_path: expand_tilde(&config.service.socket_path),
            max_connections: config.service.max_connections,
            sweep_interval: config.sweep_interval()?,
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Serve until a shutdown signal or a `stop` request arrives
    pub async fn run_foreground(&self) -> Result<()> {
        tracing::info!("Service starting in foreground mode");

        let mut signal_handler = SignalHandler::new()?;

        let mut server = IpcServer::new(self.socket_path.clone());
        server.bind().await?;

        let sweeper = self.engine.limiter.spawn_sweeper(self.sweep_interval);
        let permits = Arc::new(Semaphore::new(self.max_connections.max(1)));
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        tracing::info!("Service started successfully");

        loop {
            // a slot first; stop and signals stay live while every slot is taken
            let permit = tokio::select! {
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },

                _ = stop_rx.recv() => {
                    tracing::info!("Stop requested by client");
                    break;
                }

                sig = signal_handler.wait() => {
                    if sig.should_shutdown() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                    continue;
                }
            };

            tokio::select! {
                accepted = server.accept() => {
                    let stream = match accepted {
                        Ok(stream) => stream,
                        Err(e) => {
                            tracing::error!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    let engine = Arc::clone(&self.engine);
                    let stop_tx = stop_tx.clone();
                    task::spawn(async move {
                        if let Err(e) = handle_client(stream, engine, stop_tx).await {
                            tracing::error!("Client handler error: {}", e);
                        }
                        drop(permit);
                    });
                }

                _ = stop_rx.recv() => {
                    tracing::info!("Stop requested by client");
                    break;
                }

                sig = signal_handler.wait() => {
                    if sig.should_shutdown() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!("Shutting down service");
        sweeper.shutdown().await;
        server.shutdown()?;
        tracing::info!("Service shutdown complete");

        Ok(())
    }
}

/// Serve a single request on one connection
async fn handle_client(
    mut stream: tokio::net::UnixStream,
    engine: Arc<Engine>,
    stop_tx: mpsc::Sender<()>,
) -> Result<()> {
    let message = match read_message(&mut stream).await {
        Ok(message) => message,
        Err(e) => {
            let response = IpcResponse::error(format!("Invalid request: {}", e));
            write_response(&mut stream, &response).await?;
            return Err(e);
        }
    };

    let stop = matches!(message, IpcMessage::Stop);
    let response = engine.handle(message).await;
    write_response(&mut stream, &response).await?;

    if stop {
        let _ = stop_tx.send(()).await;
    }

    Ok(())
}
