/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Server configuration file

use alerting::AlertingConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use store::Configuration;
use trapper::TrapperConfig;

/// Complete server configuration
///
/// The alerting sections (`evaluation`, `escalation`, `channels`,
/// `templates`) sit at the top level of the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,

    #[serde(flatten)]
    pub alerting: AlertingConfig,

    /// Trapper listener
    pub trapper: TrapperConfig,

    /// Hosts, items, triggers and actions loaded at start-up
    pub configuration: Configuration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            alerting: AlertingConfig::default(),
            trapper: TrapperConfig::default(),
            configuration: Configuration::default(),
        }
    }
}

impl ServerConfig {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::parse(&source).with_context(|| format!("Invalid configuration file {}", path.display()))
    }

    pub fn parse(source: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.alerting.validate()?;
        config.trapper.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file() {
        let config = ServerConfig::parse("").unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_full_file() {
        let config = ServerConfig::parse(
            r#"
            log_level = "debug"

            [evaluation]
            workers = 8

            [escalation]
            tick_interval_ms = 500

            [[channels]]
            name = "ops"
            type = "log"

            [trapper]
            listen = "127.0.0.1:10051"
            max_frame_bytes = 1048576

            [[configuration.hosts]]
            id = 1
            name = "web01"

            [[configuration.items]]
            id = 1
            host_id = 1
            key = "agent.ping"

            [[configuration.triggers]]
            id = 1
            description = "Agent unreachable"
            expression = "nodata(/web01/agent.ping,3m) = 1"
            severity = "average"
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.alerting.evaluation.workers, 8);
        assert_eq!(config.alerting.escalation.tick_interval_ms, 500);
        assert_eq!(config.alerting.channels[0].name, "ops");
        assert_eq!(config.trapper.max_frame_bytes, 1_048_576);
        assert!(config.trapper.enabled);
        assert_eq!(config.configuration.triggers.len(), 1);
    }

    #[test]
    fn test_invalid_sections() {
        assert!(ServerConfig::parse("[evaluation]\nworkers = 0").is_err());
        assert!(ServerConfig::parse("[trapper]\nlisten = \"nowhere\"").is_err());
    }
}
