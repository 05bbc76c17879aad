/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Trapper TCP listener
//!
//! Each connection carries one request frame and receives one response
//! frame, after which the connection is closed.

use crate::codec::FrameCodec;
use crate::config::TrapperConfig;
use crate::error::{Result, TrapperError};
use crate::protocol::{SENDER_DATA, SenderRequest, SenderResponse, SenderValue};
use alerting::{AlertingService, ItemValue};
use bytes::Bytes;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Listener feeding received values into the alerting service
#[derive(Debug)]
pub struct TrapperServer {
    config: TrapperConfig,
    service: AlertingService,
}

impl TrapperServer {
    pub fn new(config: TrapperConfig, service: AlertingService) -> Self {
        Self { config, service }
    }

    pub fn config(&self) -> &TrapperConfig {
        &self.config
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.listen_addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!(address = %listener.local_addr()?, "Trapper listening for connections");
        Ok(listener)
    }

    /// Bind and accept connections until the token is cancelled
    pub async fn run(self: Arc<Self>, token: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, token).await;
        Ok(())
    }

    /// Accept connections on a bound listener until the token is cancelled
    ///
    /// Returns once the connections in progress have been answered.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, token: CancellationToken) {
        let connections = TaskTracker::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Shutdown signal received, stopping trapper");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer_addr = %peer_addr, "New connection accepted");
                            let server = self.clone();
                            connections.spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    if e.is_protocol_error() {
                                        warn!(peer_addr = %peer_addr, error = %e, "Rejected malformed request");
                                    } else {
                                        debug!(peer_addr = %peer_addr, error = %e, "Connection ended");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        connections.close();
        connections.wait().await;
    }

    async fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let mut framed = Framed::new(stream, FrameCodec::new(self.config.max_frame_bytes));

        let timeout = self.config.read_timeout();
        let payload = match tokio::time::timeout(timeout, framed.next()).await {
            Ok(Some(frame)) => frame?,
            Ok(None) => return Ok(()),
            Err(_) => return Err(TrapperError::Timeout(timeout)),
        };

        let response = self.process(&payload);
        debug!(
            peer_addr = %peer_addr,
            response = %response.response,
            info = %response.info,
            "Request processed"
        );
        framed.send(Bytes::from(serde_json::to_vec(&response)?)).await?;
        Ok(())
    }

    /// Process one request payload
    pub fn process(&self, payload: &[u8]) -> SenderResponse {
        let started = Instant::now();

        let request: SenderRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => return SenderResponse::failed(format!("cannot parse request: {}", e)),
        };
        if request.request != SENDER_DATA {
            return SenderResponse::failed(format!("unsupported request \"{}\"", request.request));
        }

        let values: Vec<ItemValue> = request.data.iter().map(SenderValue::to_item_value).collect();
        let summary = self.service.ingest(&values, Utc::now());
        SenderResponse::success(summary, started.elapsed())
    }
}
