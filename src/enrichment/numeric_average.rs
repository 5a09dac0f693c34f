//! # Numeric Average Client
//!
//! Client for the line-oriented averaging service. Each request opens its own
//! connection, writes `v1;v2;...;vn\n` with two decimals per value and reads
//! a single decimal reply of at most `max_response_bytes`.
//!
//! Callers never see a failure: any connect, write, read or parse problem is
//! logged and answered with the locally computed arithmetic mean.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::NumericAverageConfig;

#[derive(Debug, Error)]
pub enum NumericAverageError {
    #[error("Connection to {address} failed: {message}")]
    Connect { address: String, message: String },

    #[error("Timed out during {stage} after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("I/O error during {stage}: {message}")]
    Io { stage: &'static str, message: String },

    #[error("Service closed the connection without a reply")]
    EmptyResponse,

    #[error("Service replied with a non-numeric value: {body:?}")]
    InvalidResponse { body: String },
}

impl NumericAverageError {
    fn io(stage: &'static str, err: std::io::Error) -> Self {
        Self::Io {
            stage,
            message: err.to_string(),
        }
    }
}

/// Wire form of a request: values joined by `;`, two decimals, newline-terminated.
pub fn encode_request(values: &[f64]) -> String {
    let mut line = values
        .iter()
        .map(|value| format!("{value:.2}"))
        .collect::<Vec<_>>()
        .join(";");
    line.push('\n');
    line
}

pub fn parse_response(body: &[u8]) -> Result<f64, NumericAverageError> {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(NumericAverageError::EmptyResponse);
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(NumericAverageError::InvalidResponse {
            body: trimmed.to_string(),
        }),
    }
}

/// Arithmetic mean, 0.0 for an empty slice.
pub fn local_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[derive(Debug, Clone)]
pub struct NumericAverageClient {
    address: String,
    timeout: Duration,
    max_response_bytes: usize,
}

impl NumericAverageClient {
    pub fn new(config: &NumericAverageConfig) -> Self {
        Self {
            address: config.address(),
            timeout: config.timeout(),
            max_response_bytes: config.max_response_bytes.max(1),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Smoothed average of `values`, falling back to the local mean.
    pub async fn average(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self.request(values).await {
            Ok(value) => value,
            Err(err) => {
                let fallback = local_mean(values);
                warn!(
                    address = %self.address,
                    error = %err,
                    fallback,
                    "⚠️ Numeric average service unavailable, using local mean"
                );
                fallback
            }
        }
    }

    /// One request/response exchange. The stream is dropped, and so closed,
    /// on every return path.
    pub async fn request(&self, values: &[f64]) -> Result<f64, NumericAverageError> {
        let mut stream = match timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(NumericAverageError::Connect {
                    address: self.address.clone(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(NumericAverageError::Timeout {
                    stage: "connect",
                    after: self.timeout,
                })
            }
        };

        let payload = encode_request(values);
        timeout(self.timeout, stream.write_all(payload.as_bytes()))
            .await
            .map_err(|_| NumericAverageError::Timeout {
                stage: "write",
                after: self.timeout,
            })?
            .map_err(|e| NumericAverageError::io("write", e))?;

        let body = timeout(self.timeout, self.read_reply(&mut stream))
            .await
            .map_err(|_| NumericAverageError::Timeout {
                stage: "read",
                after: self.timeout,
            })??;

        let value = parse_response(&body)?;
        debug!(address = %self.address, values = values.len(), value, "📐 Numeric average received");
        Ok(value)
    }

    /// Read until newline, EOF or the response limit, whichever comes first.
    async fn read_reply(&self, stream: &mut TcpStream) -> Result<Vec<u8>, NumericAverageError> {
        let mut body = vec![0u8; self.max_response_bytes];
        let mut filled = 0;
        while filled < body.len() {
            let read = stream
                .read(&mut body[filled..])
                .await
                .map_err(|e| NumericAverageError::io("read", e))?;
            if read == 0 {
                break;
            }
            filled += read;
            if body[..filled].contains(&b'\n') {
                break;
            }
        }
        body.truncate(filled);
        Ok(body)
    }
}
