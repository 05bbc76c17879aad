/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Trapper listener configuration

use crate::error::{Result, TrapperError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrapperConfig {
    /// Whether the listener runs
    pub enabled: bool,
    /// Listen address
    pub listen: String,
    /// Largest accepted payload
    pub max_frame_bytes: u64,
    /// Time allowed for a peer to send its request
    pub read_timeout_seconds: u64,
}

impl Default for TrapperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "0.0.0.0:10051".to_string(),
            max_frame_bytes: 16 * 1024 * 1024,
            read_timeout_seconds: 30,
        }
    }
}

impl TrapperConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e: std::net::AddrParseError| TrapperError::config(format!("invalid listen address {}: {}", self.listen, e)))
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if self.max_frame_bytes == 0 {
            return Err(TrapperError::config("trapper.max_frame_bytes must be positive"));
        }
        if self.read_timeout_seconds == 0 {
            return Err(TrapperError::config("trapper.read_timeout_seconds must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrapperConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr().unwrap().port(), 10051);
    }

    #[test]
    fn test_invalid_listen() {
        let config = TrapperConfig {
            listen: "localhost".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TrapperError::Config(_))));
    }
}
