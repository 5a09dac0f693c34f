//! # Ingestion Client
//!
//! One-shot sender for the downstream ingestion service: connect, write the
//! payload, close. The service sends no reply.

use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::config::IngestionConfig;

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Connection to {address} failed: {message}")]
    Connect { address: String, message: String },

    #[error("Timed out during {stage} after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("Write to {address} failed: {message}")]
    Write { address: String, message: String },
}

#[derive(Debug, Clone)]
pub struct IngestionClient {
    address: String,
    timeout: Duration,
}

impl IngestionClient {
    pub fn new(config: &IngestionConfig) -> Self {
        Self {
            address: config.address(),
            timeout: config.timeout(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn send(&self, payload: &[u8]) -> Result<(), IngestionError> {
        let mut stream = match timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(IngestionError::Connect {
                    address: self.address.clone(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(IngestionError::Timeout {
                    stage: "connect",
                    after: self.timeout,
                })
            }
        };

        let write = async {
            stream.write_all(payload).await?;
            stream.shutdown().await
        };
        timeout(self.timeout, write)
            .await
            .map_err(|_| IngestionError::Timeout {
                stage: "write",
                after: self.timeout,
            })?
            .map_err(|e| IngestionError::Write {
                address: self.address.clone(),
                message: e.to_string(),
            })?;

        debug!(address = %self.address, bytes = payload.len(), "📨 Payload forwarded to ingestion");
        Ok(())
    }
}
