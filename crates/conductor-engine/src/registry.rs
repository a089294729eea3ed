//! Capability registry
//!
//! Services broadcast what they can do on the announcement channel; the
//! registry keeps the freshest record per component and treats anything
//! older than the stale threshold as unavailable. Consumers read a
//! consistent snapshot: the executor for dispatch sanity, the AI
//! generator for prompt building.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use conductor_bus::{BusClient, BusError};
use conductor_contracts::{
    channels, CapabilityAnnouncement, Operation, RefreshRequest,
};

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Announcements older than this are unavailable and get swept
    pub stale_threshold: Duration,

    /// How often the sweeper looks for stale components
    pub sweep_interval: Duration,

    /// Name written into refresh requests
    pub requester: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(60),
            requester: "conductor-orchestrator".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Set the staleness threshold
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    /// Set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

struct Entry {
    announcement: CapabilityAnnouncement,
    /// Stamped at receipt, not from the announcement payload
    last_updated: DateTime<Utc>,
    content_hash: u64,
}

/// Freshness-aware view over service capability announcements
pub struct CapabilityRegistry {
    bus: Arc<dyn BusClient>,
    config: RegistryConfig,
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    shutdown_tx: watch::Sender<bool>,
    started: Mutex<bool>,
}

impl CapabilityRegistry {
    /// Create a registry over the given bus
    pub fn new(bus: Arc<dyn BusClient>, config: RegistryConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bus,
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
            started: Mutex::new(false),
        }
    }

    /// Subscribe to the announcement channel and start the sweeper
    ///
    /// Idempotent; later calls are no-ops.
    pub async fn start(&self) -> Result<(), BusError> {
        {
            let mut started = self.started.lock();
            if *started {
                return Ok(());
            }
            *started = true;
        }

        let mut subscription = self.bus.subscribe(channels::CAPABILITY_ANNOUNCEMENTS).await?;
        let entries = Arc::clone(&self.entries);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    message = subscription.recv() => {
                        match message {
                            Some(message) => {
                                match serde_json::from_slice::<CapabilityAnnouncement>(&message.payload) {
                                    Ok(announcement) => observe(&entries, announcement),
                                    Err(e) => {
                                        debug!(error = %e, "undecodable capability announcement, dropping")
                                    }
                                }
                            }
                            None => return,
                        }
                    }
                }
            }
        });

        let entries = Arc::clone(&self.entries);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let stale_threshold = self.config.stale_threshold;
        let sweep_interval = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = ticker.tick() => sweep(&entries, stale_threshold),
                }
            }
        });

        info!("capability registry started");
        Ok(())
    }

    /// Stop the listener and sweeper
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Record an announcement as received just now
    ///
    /// Exposed for tests and for callers that already decoded a payload.
    pub fn observe(&self, announcement: CapabilityAnnouncement) {
        observe(&self.entries, announcement);
    }

    /// The fresh announcement for a component, if any
    pub fn get(&self, component: &str) -> Option<CapabilityAnnouncement> {
        let entries = self.entries.read();
        let entry = entries.get(component)?;
        if self.is_fresh(entry) {
            Some(entry.announcement.clone())
        } else {
            None
        }
    }

    /// Whether a component is currently available
    pub fn is_available(&self, component: &str) -> bool {
        self.get(component).is_some()
    }

    /// First active component offering the named operation
    ///
    /// Components are scanned in name order so lookups are stable.
    pub fn find_by_operation(&self, operation: &str) -> Option<(String, Operation)> {
        let entries = self.entries.read();
        let mut components: Vec<&String> = entries.keys().collect();
        components.sort();

        for component in components {
            let entry = &entries[component];
            if !self.is_fresh(entry) {
                continue;
            }
            if let Some(op) = entry.announcement.operation(operation) {
                return Some((component.clone(), op.clone()));
            }
        }
        None
    }

    /// All fresh announcements, sorted by component
    pub fn active(&self) -> Vec<CapabilityAnnouncement> {
        let entries = self.entries.read();
        let mut fresh: Vec<CapabilityAnnouncement> = entries
            .values()
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.announcement.clone())
            .collect();
        fresh.sort_by(|a, b| a.component.cmp(&b.component));
        fresh
    }

    /// Fresh components whose request channel matches
    pub fn active_on_channel(&self, request_channel: &str) -> Vec<CapabilityAnnouncement> {
        self.active()
            .into_iter()
            .filter(|announcement| {
                announcement.capabilities.message_patterns.request_channel == request_channel
            })
            .collect()
    }

    /// Human-readable rendering for embedding in AI prompts
    pub fn summary(&self) -> String {
        let active = self.active();
        if active.is_empty() {
            return "No services are currently available.".to_string();
        }

        let mut summary = String::new();
        for announcement in active {
            summary.push_str(&format!(
                "## {} (requests: {})\n",
                announcement.component,
                announcement.capabilities.message_patterns.request_channel
            ));
            for op in &announcement.capabilities.operations {
                summary.push_str(&format!("- {}: {}", op.name, op.description));
                if let Some(duration) = &op.estimated_duration {
                    summary.push_str(&format!(" (~{duration})"));
                }
                if op.retry_safe {
                    summary.push_str(" [retry-safe]");
                }
                summary.push('\n');
            }
        }
        summary
    }

    /// Ask one component (or everyone) to re-announce
    #[instrument(skip(self))]
    pub async fn request_refresh(&self, component: Option<&str>) -> Result<(), BusError> {
        let request = RefreshRequest {
            timestamp: Utc::now(),
            requester: self.config.requester.clone(),
            component: component.map(String::from),
        };
        let payload = serde_json::to_vec(&request)?;
        self.bus.publish(channels::CAPABILITY_REFRESH, payload).await?;
        debug!(component = component.unwrap_or("*"), "capability refresh requested");
        Ok(())
    }

    fn is_fresh(&self, entry: &Entry) -> bool {
        let age = Utc::now().signed_duration_since(entry.last_updated);
        age.to_std()
            .map(|age| age <= self.config.stale_threshold)
            .unwrap_or(true)
    }
}

fn observe(entries: &RwLock<HashMap<String, Entry>>, announcement: CapabilityAnnouncement) {
    let hash = content_hash(&announcement);
    let mut entries = entries.write();

    match entries.get_mut(&announcement.component) {
        // Identical payload re-announced: just refresh the clock
        Some(entry) if entry.content_hash == hash => {
            entry.last_updated = Utc::now();
            debug!(component = %announcement.component, "duplicate announcement coalesced");
        }
        _ => {
            info!(
                component = %announcement.component,
                trigger = %announcement.trigger,
                operations = announcement.capabilities.operations.len(),
                "capability announcement recorded"
            );
            entries.insert(
                announcement.component.clone(),
                Entry {
                    announcement,
                    last_updated: Utc::now(),
                    content_hash: hash,
                },
            );
        }
    }
}

fn sweep(entries: &RwLock<HashMap<String, Entry>>, stale_threshold: Duration) {
    let now = Utc::now();
    let mut entries = entries.write();
    entries.retain(|component, entry| {
        let age = now.signed_duration_since(entry.last_updated);
        let fresh = age
            .to_std()
            .map(|age| age <= stale_threshold)
            .unwrap_or(true);
        if !fresh {
            warn!(component, "capability record went stale, removing");
        }
        fresh
    });
}

/// Hash of everything except the volatile timestamp/trigger fields
fn content_hash(announcement: &CapabilityAnnouncement) -> u64 {
    let mut hasher = DefaultHasher::new();
    announcement.component.hash(&mut hasher);
    if let Ok(capabilities) = serde_json::to_string(&announcement.capabilities) {
        capabilities.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_bus::InMemoryBus;
    use conductor_contracts::{AnnouncementTrigger, CapabilitySet, MessagePatterns};

    fn announcement(component: &str, operations: &[&str]) -> CapabilityAnnouncement {
        CapabilityAnnouncement {
            component: component.to_string(),
            timestamp: Utc::now(),
            trigger: AnnouncementTrigger::Startup,
            capabilities: CapabilitySet {
                operations: operations
                    .iter()
                    .map(|name| Operation {
                        name: name.to_string(),
                        description: format!("{name} things"),
                        input_example: None,
                        output_example: None,
                        retry_safe: true,
                        estimated_duration: Some("2s".to_string()),
                    })
                    .collect(),
                message_patterns: MessagePatterns {
                    request_channel: format!("{component}-requests"),
                    response_channel: format!("{component}-responses"),
                    correlation_field: "correlation_id".to_string(),
                },
            },
        }
    }

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new(Arc::new(InMemoryBus::new()), RegistryConfig::default())
    }

    #[test]
    fn test_latest_announcement_wins() {
        let registry = registry();
        registry.observe(announcement("data", &["query"]));
        registry.observe(announcement("data", &["query", "mutate"]));

        let record = registry.get("data").expect("should be available");
        assert_eq!(record.capabilities.operations.len(), 2);
    }

    #[test]
    fn test_stale_records_are_unavailable() {
        let registry = CapabilityRegistry::new(
            Arc::new(InMemoryBus::new()),
            RegistryConfig::default().with_stale_threshold(Duration::ZERO),
        );
        registry.observe(announcement("data", &["query"]));

        std::thread::sleep(Duration::from_millis(5));
        assert!(registry.get("data").is_none());
        assert!(!registry.is_available("data"));
        assert!(registry.active().is_empty());
    }

    #[test]
    fn test_find_by_operation_is_stable() {
        let registry = registry();
        registry.observe(announcement("zeta", &["query"]));
        registry.observe(announcement("alpha", &["query"]));

        let (component, op) = registry.find_by_operation("query").expect("should find");
        assert_eq!(component, "alpha");
        assert_eq!(op.name, "query");

        assert!(registry.find_by_operation("nothing").is_none());
    }

    #[test]
    fn test_active_on_channel_filters() {
        let registry = registry();
        registry.observe(announcement("data", &["query"]));
        registry.observe(announcement("ai", &["complete"]));

        let on_data = registry.active_on_channel("data-requests");
        assert_eq!(on_data.len(), 1);
        assert_eq!(on_data[0].component, "data");
    }

    #[test]
    fn test_duplicate_announcement_refreshes_only() {
        let registry = registry();
        let first = announcement("data", &["query"]);
        registry.observe(first.clone());

        let before = registry.get("data").unwrap();
        registry.observe(first);
        let after = registry.get("data").unwrap();

        // Same content; the record did not grow a second operation set
        assert_eq!(before.capabilities, after.capabilities);
    }

    #[test]
    fn test_summary_lists_operations() {
        let registry = registry();
        registry.observe(announcement("data", &["query", "enrich"]));

        let summary = registry.summary();
        assert!(summary.contains("## data"));
        assert!(summary.contains("- query: query things"));
        assert!(summary.contains("[retry-safe]"));

        let empty = CapabilityRegistry::new(Arc::new(InMemoryBus::new()), RegistryConfig::default());
        assert!(empty.summary().contains("No services"));
    }

    #[tokio::test]
    async fn test_announcements_arrive_over_the_bus() {
        let bus = Arc::new(InMemoryBus::new());
        let registry = CapabilityRegistry::new(bus.clone(), RegistryConfig::default());
        registry.start().await.expect("should start");

        bus.publish(
            channels::CAPABILITY_ANNOUNCEMENTS,
            serde_json::to_vec(&announcement("exec", &["run_container"])).unwrap(),
        )
        .await
        .unwrap();

        // Give the listener a beat to route the message
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(registry.is_available("exec"));

        // Junk on the channel is ignored
        bus.publish(channels::CAPABILITY_ANNOUNCEMENTS, b"not json".to_vec())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.is_available("exec"));
    }

    #[tokio::test]
    async fn test_refresh_request_is_published() {
        let bus = Arc::new(InMemoryBus::new());
        let mut refreshes = bus.subscribe(channels::CAPABILITY_REFRESH).await.unwrap();
        let registry = CapabilityRegistry::new(bus.clone(), RegistryConfig::default());

        registry
            .request_refresh(Some("data"))
            .await
            .expect("should publish");

        let message = refreshes.recv().await.unwrap();
        let request: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(request["component"], "data");
        assert_eq!(request["requester"], "conductor-orchestrator");

        registry.request_refresh(None).await.unwrap();
        let broadcast = refreshes.recv().await.unwrap();
        let request: serde_json::Value = serde_json::from_slice(&broadcast.payload).unwrap();
        // Broadcast refresh carries no component field at all
        assert!(request.get("component").is_none());
    }
}
