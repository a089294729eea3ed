// Bus channel names
//
// Every request channel has a matching response channel; correlation
// between the two is by `correlation_id` only, never by ordering.

/// Data worker request channel
pub const DATA_REQUESTS: &str = "data-requests";
/// Data worker response channel
pub const DATA_RESPONSES: &str = "data-responses";

/// AI worker request channel
pub const AI_REQUESTS: &str = "ai-requests";
/// AI worker response channel
pub const AI_RESPONSES: &str = "ai-responses";

/// Container-execution worker request channel
pub const EXEC_REQUESTS: &str = "exec-requests";
/// Container-execution worker response channel
pub const EXEC_RESPONSES: &str = "exec-responses";

/// Inbound workflow submissions
pub const WORKFLOW_REQUESTS: &str = "workflow-requests";
/// Outbound workflow outcomes
pub const WORKFLOW_RESPONSES: &str = "workflow-responses";

/// Services announce what they can do here
pub const CAPABILITY_ANNOUNCEMENTS: &str = "service_capability_announcements";
/// The orchestrator asks services to re-announce here
pub const CAPABILITY_REFRESH: &str = "capability_refresh_request";
