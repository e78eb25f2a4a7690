// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use uapub_config::{NodeConfigFile, PublisherConfig};

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Outcome of validating a configuration and its node configuration file.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// Configuration file.
    pub config_path: String,
    /// Node configuration file.
    pub node_config_path: String,
    /// Distinct endpoints in the node configuration.
    pub endpoints: usize,
    /// Points in the node configuration.
    pub points: usize,
    /// MQTT broker.
    pub broker: String,
    /// MQTT topic.
    pub topic: String,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Loads and checks both files.
    ///
    /// # Errors
    ///
    /// Fails if either file is unreadable or invalid.
    pub fn collect(config_path: &Path) -> BinResult<(Self, PublisherConfig)> {
        if !config_path.exists() {
            return Err(BinError::config(format!(
                "Configuration file not found: {}",
                config_path.display()
            )));
        }

        let config = uapub_config::load_config(config_path)
            .map_err(|e| BinError::from(e).with_context("Configuration validation failed"))?;
        let node_path = &config.publisher.node_config_path;
        let nodes = NodeConfigFile::load(node_path)
            .map_err(|e| BinError::from(e).with_context("Node configuration validation failed"))?;
        let requests = nodes
            .to_requests()
            .map_err(|e| BinError::from(e).with_context("Node configuration validation failed"))?;

        let mut warnings = Vec::new();

        if !node_path.exists() {
            warnings.push(format!(
                "Node configuration file does not exist yet: {}",
                node_path.display()
            ));
        } else if requests.is_empty() {
            warnings.push("No endpoints configured".to_string());
        }

        let mut seen = HashSet::new();
        for entry in &nodes.endpoints {
            if !seen.insert(entry.endpoint_url.as_str()) {
                warnings.push(format!(
                    "Endpoint listed more than once, entries are merged: {}",
                    entry.endpoint_url
                ));
            }
        }

        for (endpoint, points) in &requests {
            if !endpoint.use_security {
                warnings.push(format!("Endpoint without security: {}", endpoint.endpoint_url));
            }
            if points.is_empty() {
                warnings.push(format!("Endpoint without points: {}", endpoint.endpoint_url));
            }
        }

        if config.diagnostics.interval().is_none() {
            warnings.push("Periodic diagnostics are disabled".to_string());
        }

        if !cfg!(feature = "real-transport") {
            warnings.push(
                "This build has no OPC UA client; `run` will fail (enable `real-transport`)"
                    .to_string(),
            );
        }

        let report = Self {
            config_path: config_path.display().to_string(),
            node_config_path: node_path.display().to_string(),
            endpoints: requests.len(),
            points: requests.iter().map(|(_, points)| points.len()).sum(),
            broker: config.delivery.mqtt.target(),
            topic: config.delivery.mqtt.topic.clone(),
            warnings,
        };
        Ok((report, config))
    }
}

/// Executes the `validate` command to validate configuration.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let (report, config) = ValidationReport::collect(&cli.config)?;

    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", report.config_path);
            println!();
            println!("Summary:");
            println!("  Node configuration: {}", report.node_config_path);
            println!("  Endpoints:          {}", report.endpoints);
            println!("  Points:             {}", report.points);
            println!("  Broker:             {}", report.broker);
            println!("  Topic:              {}", report.topic);
            println!("  Queue capacity:     {}", config.delivery.queue_capacity);
            println!("  Send interval:      {} ms", config.delivery.send_interval_ms);
            println!("  Max frame size:     {} bytes", config.delivery.max_frame_size);

            if !report.warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &report.warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                println!(
                    "{}",
                    serde_json::to_string_pretty(&config)
                        .unwrap_or_else(|_| "(serialization error)".to_string())
                );
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "report": &report,
                "config": if args.show_config { Some(&config) } else { None },
            });
            let rendered = serde_json::to_string_pretty(&output)
                .map_err(|e| BinError::runtime(format!("failed to render report: {e}")))?;
            println!("{}", rendered);
        }
    }

    if args.strict && !report.warnings.is_empty() {
        return Err(BinError::config(format!(
            "Strict mode: {} warning(s) found",
            report.warnings.len()
        )));
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
