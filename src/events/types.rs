//! Instance lifecycle events.

use serde::{Deserialize, Serialize};

use crate::config::InstanceConfig;

/// Message carried on the event channel.
///
/// Wire form is JSON with a `type` tag, e.g.
/// `{"type":"removed","instance_id":"fr-idf"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstanceEvent {
    /// New configuration for an instance, replacing the live one wholesale.
    Reloaded {
        instance_id: String,
        config: InstanceConfig,
    },
    Removed {
        instance_id: String,
    },
    /// The engine behind an instance loaded new data.
    DataReloaded {
        instance_id: String,
        publication_date: i64,
    },
}

impl InstanceEvent {
    pub fn instance_id(&self) -> &str {
        match self {
            Self::Reloaded { instance_id, .. }
            | Self::Removed { instance_id }
            | Self::DataReloaded { instance_id, .. } => instance_id,
        }
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Reloaded { .. } => "reloaded",
            Self::Removed { .. } => "removed",
            Self::DataReloaded { .. } => "data_reloaded",
        }
    }
}
