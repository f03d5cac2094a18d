// Unix domain socket transport: 4-byte big-endian length prefix + JSON payload

use crate::context::RerankedChunk;
use crate::error::{LexError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

/// Maximum frame size (10MB)
pub const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Rate-limit key for requests that do not name a client
pub const DEFAULT_CLIENT: &str = "local";

/// Requests accepted by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IpcMessage {
    /// Liveness check
    Status,
    /// Cache, rate limiter and graph counters
    Stats,
    /// Collection priority for a question
    Route { query: String },
    /// Graph neighbourhood of a free-text document reference
    Lookup {
        document: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client: Option<String>,
    },
    /// One-hop related documents
    Related { ids: Vec<String> },
    /// Build prompt context from reranked chunks
    Assemble {
        chunks: Vec<RerankedChunk>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunks_retrieved: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client: Option<String>,
    },
    /// Query vectors through the embedding cache
    Embed {
        texts: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client: Option<String>,
    },
    /// Request service shutdown
    Stop,
}

/// Response sent back to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl IpcResponse {
    /// Create a successful response
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Create a successful response with data
    pub fn success_with_data(data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Rejection for a client over its request budget
    pub fn throttled(retry_after: u64) -> Self {
        Self {
            success: false,
            message: Some("Rate limit exceeded".to_string()),
            data: Some(serde_json::json!({ "retry_after": retry_after })),
        }
    }

    /// `retry_after` seconds when this is a throttling rejection
    pub fn retry_after(&self) -> Option<u64> {
        if self.success {
            return None;
        }
        self.data.as_ref()?.get("retry_after")?.as_u64()
    }
}

/// Unix domain socket listener
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            listener: None,
        }
    }

    /// Bind to the socket path, replacing a stale socket file
    pub async fn bind(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| LexError::Io {
                source: e,
                context: format!("Failed to remove existing socket: {:?}", self.socket_path),
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LexError::Io {
                source: e,
                context: format!("Failed to create socket directory: {:?}", parent),
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| LexError::Io {
            source: e,
            context: format!("Failed to bind to socket: {:?}", self.socket_path),
        })?;

        self.listener = Some(listener);

        tracing::info!("Service listening on {:?}", self.socket_path);
        Ok(())
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| LexError::Service("Server not bound".to_string()))?;

        let (stream, _addr) = listener.accept().await.map_err(|e| LexError::Io {
            source: e,
            context: "Failed to accept connection".to_string(),
        })?;

        Ok(stream)
    }

    /// Remove the socket file
    pub fn shutdown(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| LexError::Io {
                source: e,
                context: format!("Failed to remove socket: {:?}", self.socket_path),
            })?;
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

async fn read_frame<T: DeserializeOwned>(stream: &mut UnixStream, what: &str) -> Result<T> {
    let length = stream.read_u32().await.map_err(|e| LexError::Io {
        source: e,
        context: format!("Failed to read {} length", what),
    })?;

    if length > MAX_MESSAGE_SIZE {
        return Err(LexError::Service(format!(
            "{} too large: {} bytes (max: {})",
            what, length, MAX_MESSAGE_SIZE
        )));
    }

    let mut buffer = vec![0u8; length as usize];
    stream
        .read_exact(&mut buffer)
        .await
        .map_err(|e| LexError::Io {
            source: e,
            context: format!("Failed to read {} payload", what),
        })?;

    serde_json::from_slice(&buffer).map_err(|e| LexError::Json {
        source: e,
        context: format!("Failed to deserialize {}", what),
    })
}

async fn write_frame<T: Serialize>(stream: &mut UnixStream, value: &T, what: &str) -> Result<()> {
    let payload = serde_json::to_vec(value).map_err(|e| LexError::Json {
        source: e,
        context: format!("Failed to serialize {}", what),
    })?;

    if payload.len() > MAX_MESSAGE_SIZE as usize {
        return Err(LexError::Service(format!(
            "{} too large: {} bytes (max: {})",
            what,
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    stream
        .write_u32(payload.len() as u32)
        .await
        .map_err(|e| LexError::Io {
            source: e,
            context: format!("Failed to write {} length", what),
        })?;

    stream
        .write_all(&payload)
        .await
        .map_err(|e| LexError::Io {
            source: e,
            context: format!("Failed to write {} payload", what),
        })?;

    stream.flush().await.map_err(|e| LexError::Io {
        source: e,
        context: format!("Failed to flush {}", what),
    })?;

    Ok(())
}

/// Read a request frame
pub async fn read_message(stream: &mut UnixStream) -> Result<IpcMessage> {
    read_frame(stream, "request").await
}

/// Write a response frame
pub async fn write_response(stream: &mut UnixStream, response: &IpcResponse) -> Result<()> {
    write_frame(stream, response, "response").await
}

/// Client for a running service
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Send one request and wait for its response
    pub async fn send(&self, message: &IpcMessage) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| LexError::Io {
                source: e,
                context: format!("Failed to connect to service at {:?}", self.socket_path),
            })?;

        write_frame(&mut stream, message, "request").await?;
        read_frame(&mut stream, "response").await
    }
}
