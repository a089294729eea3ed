// Capability announcement DTOs
//
// Services periodically broadcast what they can do; the orchestrator
// keeps the freshest record per component. Announcements are tolerant
// to unknown fields so services can extend their payloads freely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why a service is announcing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnouncementTrigger {
    /// First announcement after the service booted
    Startup,
    /// Regular re-announcement on the service's own timer
    PeriodicRefresh,
    /// The service's configuration changed
    ConfigChange,
    /// Answering an explicit refresh request
    RefreshRequest,
}

impl std::fmt::Display for AnnouncementTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnnouncementTrigger::Startup => write!(f, "startup"),
            AnnouncementTrigger::PeriodicRefresh => write!(f, "periodic_refresh"),
            AnnouncementTrigger::ConfigChange => write!(f, "config_change"),
            AnnouncementTrigger::RefreshRequest => write!(f, "refresh_request"),
        }
    }
}

/// One RPC a service accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_example: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_example: Option<Value>,
    #[serde(default)]
    pub retry_safe: bool,
    /// Rough duration hint, e.g. "2s" or "5m"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<String>,
}

/// How to talk to a service: its channels and correlation field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePatterns {
    pub request_channel: String,
    pub response_channel: String,
    #[serde(default = "default_correlation_field")]
    pub correlation_field: String,
}

fn default_correlation_field() -> String {
    "correlation_id".to_string()
}

/// The operations block of an announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    #[serde(default)]
    pub operations: Vec<Operation>,
    pub message_patterns: MessagePatterns,
}

/// A full capability announcement from one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityAnnouncement {
    pub component: String,
    pub timestamp: DateTime<Utc>,
    pub trigger: AnnouncementTrigger,
    pub capabilities: CapabilitySet,
}

impl CapabilityAnnouncement {
    /// Look up an operation by name
    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.capabilities.operations.iter().find(|op| op.name == name)
    }
}

/// Ask one service (or all of them) to re-announce
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub timestamp: DateTime<Utc>,
    pub requester: String,
    /// Targeted refresh when set; broadcast otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}
