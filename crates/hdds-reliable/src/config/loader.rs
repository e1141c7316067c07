// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML configuration loader.
//!
//! # Example YAML
//!
//! ```yaml
//! default_profile: sensor
//! writers:
//!   sensor:
//!     reliability: RELIABLE
//!     durability: TRANSIENT_LOCAL
//!     history:
//!       kind: KEEP_LAST
//!       depth: 50
//!     heartbeat_period_ms: 50
//!     nack_response_delay_ms: 2
//!     flow_controller: slow_link
//!
//! flow_controllers:
//!   slow_link:
//!     publish_mode: BANDWIDTH_LIMITED_ASYNC
//!     scheduling: ROUND_ROBIN
//!     max_bytes_per_period: 65536
//!     period_ms: 100
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::{
    DurabilityKind, FlowControllerConfig, HistoryKind, PublishMode, ReliabilityKind,
    SchedulingDiscipline, WriterConfig, LENGTH_UNLIMITED,
};
use crate::error::{Error, Result};

/// YAML configuration loader.
pub struct ConfigLoader;

/// Root YAML document structure.
#[derive(Debug, Deserialize, Default)]
pub struct YamlConfigDocument {
    /// Named writer profiles.
    #[serde(default)]
    pub writers: HashMap<String, YamlWriterProfile>,

    /// Named flow controllers.
    #[serde(default)]
    pub flow_controllers: HashMap<String, YamlFlowController>,

    /// Default writer profile name (optional).
    #[serde(default)]
    pub default_profile: Option<String>,
}

/// A single writer profile in YAML format.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct YamlWriterProfile {
    /// RELIABLE or BEST_EFFORT
    pub reliability: Option<String>,
    /// VOLATILE, TRANSIENT_LOCAL, TRANSIENT or PERSISTENT
    pub durability: Option<String>,
    pub history: Option<YamlHistory>,
    pub max_samples: Option<usize>,
    /// true = push, false = pull
    pub push_mode: Option<bool>,
    pub nack_response_delay_ms: Option<u64>,
    pub nack_suppression_duration_ms: Option<u64>,
    pub heartbeat_period_ms: Option<u64>,
    pub max_blocking_time_ms: Option<u64>,
    pub fragment_size: Option<usize>,
    pub flow_controller: Option<String>,
    pub priority: Option<i32>,
    pub bandwidth_reservation: Option<u8>,
}

/// History policy in YAML.
#[derive(Debug, Deserialize)]
pub struct YamlHistory {
    /// KEEP_LAST or KEEP_ALL
    pub kind: String,
    /// Depth for KEEP_LAST
    #[serde(default = "default_history_depth")]
    pub depth: u32,
}

fn default_history_depth() -> u32 {
    1
}

/// A flow controller in YAML format.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct YamlFlowController {
    /// PURE_SYNC, SYNC_WITH_FALLBACK, ASYNC or BANDWIDTH_LIMITED_ASYNC
    pub publish_mode: Option<String>,
    /// FIFO, ROUND_ROBIN, HIGH_PRIORITY or PRIORITY_WITH_RESERVATION
    pub scheduling: Option<String>,
    /// Bytes per period (-1 or absent = unlimited)
    pub max_bytes_per_period: Option<i64>,
    pub period_ms: Option<u64>,
    pub retry_interval_ms: Option<u64>,
}

impl ConfigLoader {
    /// Load a configuration document from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<YamlConfigDocument> {
        let yaml_content = fs::read_to_string(path)?;
        Self::parse_yaml(&yaml_content)
    }

    /// Parse YAML content.
    pub fn parse_yaml(yaml_content: &str) -> Result<YamlConfigDocument> {
        serde_yaml::from_str(yaml_content)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse YAML: {}", e)))
    }

    /// Get a writer configuration by profile name.
    pub fn writer_profile(doc: &YamlConfigDocument, name: &str) -> Result<WriterConfig> {
        let profile = doc
            .writers
            .get(name)
            .ok_or_else(|| Error::InvalidConfig(format!("Profile '{}' not found", name)))?;
        Self::profile_to_config(profile)
    }

    /// Get the default writer configuration of the document.
    pub fn default_writer_profile(doc: &YamlConfigDocument) -> Result<WriterConfig> {
        match doc.default_profile {
            Some(ref name) => Self::writer_profile(doc, name),
            None => Ok(WriterConfig::default()),
        }
    }

    /// Every flow controller declared in the document, validated.
    pub fn flow_controllers(doc: &YamlConfigDocument) -> Result<Vec<FlowControllerConfig>> {
        let mut configs = doc
            .flow_controllers
            .iter()
            .map(|(name, fc)| Self::flow_controller_to_config(name, fc))
            .collect::<Result<Vec<_>>>()?;
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(configs)
    }

    /// Convert a YAML writer profile to a validated `WriterConfig`.
    pub fn profile_to_config(profile: &YamlWriterProfile) -> Result<WriterConfig> {
        let mut config = WriterConfig::default();

        if let Some(ref rel) = profile.reliability {
            config.reliability = match rel.to_uppercase().as_str() {
                "RELIABLE" => ReliabilityKind::Reliable,
                "BEST_EFFORT" => ReliabilityKind::BestEffort,
                other => return Err(invalid("reliability", other)),
            };
        }

        if let Some(ref dur) = profile.durability {
            config.durability = match dur.to_uppercase().as_str() {
                "VOLATILE" => DurabilityKind::Volatile,
                "TRANSIENT_LOCAL" => DurabilityKind::TransientLocal,
                "TRANSIENT" => DurabilityKind::Transient,
                "PERSISTENT" => DurabilityKind::Persistent,
                other => return Err(invalid("durability", other)),
            };
        }

        if let Some(ref hist) = profile.history {
            config.history = match hist.kind.to_uppercase().as_str() {
                "KEEP_LAST" => HistoryKind::KeepLast(hist.depth),
                "KEEP_ALL" => HistoryKind::KeepAll,
                other => return Err(invalid("history kind", other)),
            };
        }

        if let Some(max_samples) = profile.max_samples {
            config.max_samples = max_samples;
        }
        if let Some(push) = profile.push_mode {
            config.push_mode = push;
        }
        if let Some(ms) = profile.nack_response_delay_ms {
            config.nack_response_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = profile.nack_suppression_duration_ms {
            config.nack_suppression_duration = Duration::from_millis(ms);
        }
        if let Some(ms) = profile.heartbeat_period_ms {
            config.heartbeat_period = Duration::from_millis(ms);
        }
        if let Some(ms) = profile.max_blocking_time_ms {
            config.max_blocking_time = Duration::from_millis(ms);
        }
        if let Some(size) = profile.fragment_size {
            config.fragment_size = size;
        }
        config.flow_controller = profile.flow_controller.clone();
        if let Some(priority) = profile.priority {
            config.priority = priority;
        }
        if let Some(reservation) = profile.bandwidth_reservation {
            config.bandwidth_reservation = reservation;
        }

        config.validate()?;
        Ok(config)
    }

    /// Convert a YAML flow controller to a validated `FlowControllerConfig`.
    pub fn flow_controller_to_config(
        name: &str,
        fc: &YamlFlowController,
    ) -> Result<FlowControllerConfig> {
        let mut config = FlowControllerConfig {
            name: name.to_string(),
            ..Default::default()
        };

        if let Some(ref mode) = fc.publish_mode {
            config.publish_mode = match mode.to_uppercase().as_str() {
                "PURE_SYNC" => PublishMode::PureSync,
                "SYNC_WITH_FALLBACK" => PublishMode::SyncWithFallback,
                "ASYNC" => PublishMode::Async,
                "BANDWIDTH_LIMITED_ASYNC" => PublishMode::BandwidthLimitedAsync,
                other => return Err(invalid("publish mode", other)),
            };
        }

        if let Some(ref sched) = fc.scheduling {
            config.scheduling = match sched.to_uppercase().as_str() {
                "FIFO" => SchedulingDiscipline::Fifo,
                "ROUND_ROBIN" => SchedulingDiscipline::RoundRobin,
                "HIGH_PRIORITY" => SchedulingDiscipline::HighPriority,
                "PRIORITY_WITH_RESERVATION" => SchedulingDiscipline::PriorityWithReservation,
                other => return Err(invalid("scheduling discipline", other)),
            };
        }

        if let Some(bytes) = fc.max_bytes_per_period {
            config.max_bytes_per_period = if bytes < 0 {
                LENGTH_UNLIMITED
            } else {
                usize::try_from(bytes).unwrap_or(LENGTH_UNLIMITED)
            };
        }
        if let Some(ms) = fc.period_ms {
            config.period = Duration::from_millis(ms);
        }
        if let Some(ms) = fc.retry_interval_ms {
            config.retry_interval = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}

fn invalid(what: &str, value: &str) -> Error {
    Error::InvalidConfig(format!("Invalid {}: {}", what, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
default_profile: sensor
writers:
  sensor:
    reliability: RELIABLE
    durability: TRANSIENT_LOCAL
    history:
      kind: KEEP_LAST
      depth: 50
    heartbeat_period_ms: 50
    nack_response_delay_ms: 2
    flow_controller: slow_link
    priority: 3
  telemetry:
    reliability: BEST_EFFORT
flow_controllers:
  slow_link:
    publish_mode: BANDWIDTH_LIMITED_ASYNC
    scheduling: ROUND_ROBIN
    max_bytes_per_period: 65536
    period_ms: 100
  fast:
    publish_mode: ASYNC
"#;

    #[test]
    fn test_parse_writer_profile() {
        let doc = ConfigLoader::parse_yaml(SAMPLE).expect("parse");
        let config = ConfigLoader::default_writer_profile(&doc).expect("profile");
        assert_eq!(config.durability, DurabilityKind::TransientLocal);
        assert_eq!(config.history, HistoryKind::KeepLast(50));
        assert_eq!(config.heartbeat_period, Duration::from_millis(50));
        assert_eq!(config.nack_response_delay, Duration::from_millis(2));
        assert_eq!(config.flow_controller.as_deref(), Some("slow_link"));
        assert_eq!(config.priority, 3);

        let telemetry = ConfigLoader::writer_profile(&doc, "telemetry").expect("profile");
        assert_eq!(telemetry.reliability, ReliabilityKind::BestEffort);
    }

    #[test]
    fn test_parse_flow_controllers() {
        let doc = ConfigLoader::parse_yaml(SAMPLE).expect("parse");
        let controllers = ConfigLoader::flow_controllers(&doc).expect("controllers");
        assert_eq!(controllers.len(), 2);
        assert_eq!(controllers[0].name, "fast");
        assert_eq!(controllers[1].publish_mode, PublishMode::BandwidthLimitedAsync);
        assert_eq!(controllers[1].scheduling, SchedulingDiscipline::RoundRobin);
        assert_eq!(controllers[1].max_bytes_per_period, 65536);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let doc = ConfigLoader::parse_yaml("writers:\n  bad:\n    reliability: SOMETIMES\n")
            .expect("parse");
        assert!(ConfigLoader::writer_profile(&doc, "bad").is_err());
        assert!(ConfigLoader::writer_profile(&doc, "missing").is_err());

        let doc = ConfigLoader::parse_yaml(
            "flow_controllers:\n  x:\n    publish_mode: BANDWIDTH_LIMITED_ASYNC\n",
        )
        .expect("parse");
        assert!(ConfigLoader::flow_controllers(&doc).is_err());
    }
}
