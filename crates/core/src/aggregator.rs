//! Capability aggregation across downstream servers.
//!
//! A refresh fetches the server list from the directory, collects every
//! server's capabilities concurrently (each server isolated from the
//! others' failures), and builds one immutable [`CatalogSnapshot`]: the
//! prefixed capability lists, the reverse index from prefixed name to
//! origin, and the per-server custom-instruction context. The snapshot is
//! swapped in atomically, so readers always see a single refresh cycle.

use crate::cache::TtlCache;
use crate::context::{ServerContext, ServerContextMap};
use crate::directory::ServerDirectory;
use crate::error::{GatewayError, GatewayResult};
use crate::naming::{prefixed_name, sanitize_server_token};
use crate::session::SessionManager;
use crate::types::{
    CapabilityOrigin, DeclaredCapabilities, DownstreamServerDescriptor, PromptDefinition,
    ResourceDefinition, ResourceTemplateDefinition, ServerId, ToolDefinition,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

const CATALOG_KEY: &str = "catalog";

/// Where server capabilities come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Use the capabilities embedded in the directory's descriptors
    #[default]
    Directory,
    /// Connect to every server and ask it directly
    Live,
}

impl std::str::FromStr for DiscoveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "directory" => Ok(Self::Directory),
            "live" => Ok(Self::Live),
            other => Err(format!("unknown discovery mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub mode: DiscoveryMode,
    pub cache_ttl: Duration,
    /// Bound on one server's session open + capability listing
    pub server_timeout: Duration,
    /// Bound on the directory's server listing
    pub directory_timeout: Duration,
    /// Publish tools found by live discovery back to the directory
    pub report_tools: bool,
    /// Names served locally; downstream tools prefixed into one are dropped
    pub reserved_tool_names: Vec<String>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Directory,
            cache_ttl: Duration::from_secs(300),
            server_timeout: Duration::from_secs(15),
            directory_timeout: Duration::from_secs(20),
            report_tools: false,
            reserved_tool_names: Vec::new(),
        }
    }
}

/// Reverse lookup from namespaced identifiers to their origin
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityIndex {
    tools: HashMap<String, CapabilityOrigin>,
    prompts: HashMap<String, CapabilityOrigin>,
    resource_templates: HashMap<String, CapabilityOrigin>,
    // Keyed by URI: that is what clients send to resources/read
    resources: HashMap<String, CapabilityOrigin>,
}

impl CapabilityIndex {
    pub fn resolve_tool(&self, prefixed_name: &str) -> Option<&CapabilityOrigin> {
        self.tools.get(prefixed_name)
    }

    pub fn resolve_prompt(&self, prefixed_name: &str) -> Option<&CapabilityOrigin> {
        self.prompts.get(prefixed_name)
    }

    pub fn resolve_resource(&self, uri: &str) -> Option<&CapabilityOrigin> {
        self.resources.get(uri)
    }

    pub fn resolve_resource_template(&self, prefixed_name: &str) -> Option<&CapabilityOrigin> {
        self.resource_templates.get(prefixed_name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
            && self.prompts.is_empty()
            && self.resource_templates.is_empty()
            && self.resources.is_empty()
    }
}

/// A server whose capabilities could not be collected in a refresh
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerFailure {
    pub server_id: ServerId,
    pub server_name: String,
    pub reason: String,
}

/// What one server contributed to a snapshot
#[derive(Debug, Clone)]
pub struct ServerCatalog {
    pub descriptor: DownstreamServerDescriptor,
    pub token: String,
    /// Capabilities under their original names
    pub capabilities: DeclaredCapabilities,
}

/// Result of one refresh cycle; never mutated after construction
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub index: CapabilityIndex,
    pub contexts: ServerContextMap,
    pub tools: Vec<ToolDefinition>,
    pub resources: Vec<ResourceDefinition>,
    pub resource_templates: Vec<ResourceTemplateDefinition>,
    pub prompts: Vec<PromptDefinition>,
    pub servers: BTreeMap<ServerId, ServerCatalog>,
    pub failures: Vec<ServerFailure>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl CatalogSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn descriptor(&self, server_id: &ServerId) -> Option<&DownstreamServerDescriptor> {
        self.servers.get(server_id).map(|catalog| &catalog.descriptor)
    }

    /// Human-readable report of servers, capabilities, failures and context
    pub fn render_summary(&self) -> String {
        let mut out = format!(
            "Discovered {} server(s) with {} tool(s), {} resource(s), {} resource template(s), {} prompt(s).\n",
            self.servers.len(),
            self.tools.len(),
            self.resources.len(),
            self.resource_templates.len(),
            self.prompts.len(),
        );

        for (server_id, catalog) in &self.servers {
            out.push_str(&format!("\n### {} ({})\n", catalog.descriptor.name, server_id));

            let tools: Vec<String> = catalog
                .capabilities
                .tools
                .iter()
                .map(|t| prefixed_name(&catalog.token, &t.name))
                .collect();
            push_list(&mut out, "Tools", &tools);

            let resources: Vec<String> = catalog
                .capabilities
                .resources
                .iter()
                .map(|r| r.uri.clone())
                .collect();
            push_list(&mut out, "Resources", &resources);

            let prompts: Vec<String> = catalog
                .capabilities
                .prompts
                .iter()
                .map(|p| prefixed_name(&catalog.token, &p.name))
                .collect();
            push_list(&mut out, "Prompts", &prompts);

            if let Some(context) = self.contexts.get(server_id) {
                out.push_str(&context.render());
            }
        }

        if !self.failures.is_empty() {
            out.push_str("\nUnavailable servers:\n");
            for failure in &self.failures {
                out.push_str(&format!(
                    "  - {} ({}): {}\n",
                    failure.server_name, failure.server_id, failure.reason
                ));
            }
        }

        out
    }
}

fn push_list(out: &mut String, label: &str, items: &[String]) {
    if !items.is_empty() {
        out.push_str(&format!("{label}: {}\n", items.join(", ")));
    }
}

/// Builds and serves the unified capability namespace
pub struct CapabilityAggregator {
    directory: Arc<dyn ServerDirectory>,
    sessions: Arc<SessionManager>,
    config: AggregatorConfig,
    cache: TtlCache<&'static str, Arc<CatalogSnapshot>>,
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl CapabilityAggregator {
    pub fn new(
        directory: Arc<dyn ServerDirectory>,
        sessions: Arc<SessionManager>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            cache: TtlCache::new(config.cache_ttl),
            directory,
            sessions,
            config,
            current: RwLock::new(Arc::new(CatalogSnapshot::empty())),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<dyn ServerDirectory> {
        &self.directory
    }

    pub fn is_configured(&self) -> bool {
        self.directory.is_configured()
    }

    /// Latest snapshot without refreshing
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn resolve(&self, prefixed_name: &str) -> Option<CapabilityOrigin> {
        self.snapshot().index.resolve_tool(prefixed_name).cloned()
    }

    pub fn resolve_prompt(&self, prefixed_name: &str) -> Option<CapabilityOrigin> {
        self.snapshot().index.resolve_prompt(prefixed_name).cloned()
    }

    pub fn resolve_resource(&self, uri: &str) -> Option<CapabilityOrigin> {
        self.snapshot().index.resolve_resource(uri).cloned()
    }

    /// Return a fresh enough snapshot, rebuilding it when stale or forced.
    ///
    /// Never fails: a missing credential yields an empty catalog, and a
    /// directory failure yields the last snapshot that was built.
    pub async fn refresh(&self, force_refresh: bool) -> Arc<CatalogSnapshot> {
        if !force_refresh {
            if let Some(snapshot) = self.cache.get(&CATALOG_KEY) {
                return snapshot;
            }
        }

        if !self.directory.is_configured() {
            warn!("directory credential is not configured, serving an empty catalog");
            return Arc::new(CatalogSnapshot::empty());
        }

        let descriptors = match self.fetch_descriptors().await {
            Ok(descriptors) => descriptors,
            Err(e) if e.is_config() => {
                warn!(error = %e, "directory rejected configuration, serving an empty catalog");
                return Arc::new(CatalogSnapshot::empty());
            }
            Err(e) => {
                warn!(error = %e, "failed to list servers, keeping last known catalog");
                return self.snapshot();
            }
        };

        let snapshot = Arc::new(self.build(descriptors).await);
        self.install(snapshot.clone());

        info!(
            servers = snapshot.servers.len(),
            tools = snapshot.tools.len(),
            failures = snapshot.failures.len(),
            "capability catalog refreshed"
        );
        snapshot
    }

    async fn fetch_descriptors(&self) -> GatewayResult<Vec<DownstreamServerDescriptor>> {
        tokio::time::timeout(self.config.directory_timeout, self.directory.list_servers())
            .await
            .map_err(|_| GatewayError::timeout("directory server listing", self.config.directory_timeout))?
    }

    async fn build(&self, descriptors: Vec<DownstreamServerDescriptor>) -> CatalogSnapshot {
        let descriptors = normalize(descriptors);

        if self.config.mode == DiscoveryMode::Live {
            self.retire_vanished(&descriptors).await;
        }

        let fetches = descriptors.into_iter().map(|descriptor| async move {
            let result = self.collect(&descriptor).await;
            (descriptor, result)
        });
        let results = futures::future::join_all(fetches).await;

        let mut builder = SnapshotBuilder::new(&self.config.reserved_tool_names);
        let mut reports = Vec::new();

        for (descriptor, result) in results {
            match result {
                Ok(capabilities) => {
                    if self.config.mode == DiscoveryMode::Live && self.config.report_tools {
                        reports.push((descriptor.id.clone(), capabilities.tools.clone()));
                    }
                    builder.add_server(descriptor, capabilities);
                }
                Err(e) => {
                    warn!(server_id = %descriptor.id, server = %descriptor.name, error = %e, "excluding server from catalog");
                    builder.failures.push(ServerFailure {
                        server_id: descriptor.id.clone(),
                        server_name: descriptor.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !reports.is_empty() {
            self.spawn_reports(reports);
        }

        builder.finish()
    }

    /// Capabilities of one server; failures stay local to this server
    async fn collect(&self, descriptor: &DownstreamServerDescriptor) -> GatewayResult<DeclaredCapabilities> {
        match self.config.mode {
            DiscoveryMode::Directory => Ok(descriptor.capabilities.clone()),
            DiscoveryMode::Live => {
                let listing = async {
                    let session = self
                        .sessions
                        .session_for(descriptor)
                        .await
                        .ok_or_else(|| GatewayError::unreachable(&descriptor.id, "could not open session"))?;
                    session.list_capabilities().await
                };

                tokio::time::timeout(self.config.server_timeout, listing)
                    .await
                    .map_err(|_| {
                        GatewayError::timeout(
                            format!("capability listing for '{}'", descriptor.name),
                            self.config.server_timeout,
                        )
                    })?
            }
        }
    }

    /// Close sessions of servers the directory no longer lists
    async fn retire_vanished(&self, descriptors: &[DownstreamServerDescriptor]) {
        let listed: HashSet<&ServerId> = descriptors.iter().map(|d| &d.id).collect();
        for server_id in self.sessions.server_ids() {
            if !listed.contains(&server_id) {
                info!(server_id = %server_id, "server no longer listed, closing its session");
                self.sessions.close_server(&server_id).await;
            }
        }
    }

    fn spawn_reports(&self, reports: Vec<(ServerId, Vec<ToolDefinition>)>) {
        let directory = self.directory.clone();
        tokio::spawn(async move {
            for (server_id, tools) in reports {
                if let Err(e) = directory.report_tools(&server_id, &tools).await {
                    warn!(server_id = %server_id, error = %e, "failed to report discovered tools");
                }
            }
        });
    }

    fn install(&self, snapshot: Arc<CatalogSnapshot>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        self.cache.set(CATALOG_KEY, snapshot);
    }
}

/// Sort by server id and keep the last descriptor seen for each id
fn normalize(descriptors: Vec<DownstreamServerDescriptor>) -> Vec<DownstreamServerDescriptor> {
    let mut by_id: BTreeMap<ServerId, DownstreamServerDescriptor> = BTreeMap::new();
    for descriptor in descriptors {
        by_id.insert(descriptor.id.clone(), descriptor);
    }
    by_id.into_values().collect()
}

/// Accumulates servers in id order; later servers win name collisions
#[derive(Default)]
struct SnapshotBuilder {
    reserved: HashSet<String>,
    index: CapabilityIndex,
    contexts: ServerContextMap,
    tools: NamedList<ToolDefinition>,
    resources: NamedList<ResourceDefinition>,
    resource_templates: NamedList<ResourceTemplateDefinition>,
    prompts: NamedList<PromptDefinition>,
    servers: BTreeMap<ServerId, ServerCatalog>,
    failures: Vec<ServerFailure>,
}

impl SnapshotBuilder {
    fn new(reserved: &[String]) -> Self {
        Self {
            reserved: reserved.iter().cloned().collect(),
            ..Default::default()
        }
    }

    fn add_server(&mut self, descriptor: DownstreamServerDescriptor, mut capabilities: DeclaredCapabilities) {
        let token = sanitize_server_token(&descriptor.name, &descriptor.id);
        capabilities.tools.retain(|tool| {
            let name = prefixed_name(&token, &tool.name);
            let reserved = self.reserved.contains(&name);
            if reserved {
                warn!(tool = %name, server_id = %descriptor.id, "prefixed name is taken by a built-in tool, dropping it");
            }
            !reserved
        });
        let origin = |original_name: &str| CapabilityOrigin {
            original_name: original_name.to_string(),
            server_id: descriptor.id.clone(),
        };

        for tool in &capabilities.tools {
            let name = prefixed_name(&token, &tool.name);
            if let Some(previous) = self.index.tools.insert(name.clone(), origin(&tool.name)) {
                warn!(tool = %name, previous = %previous.server_id, winner = %descriptor.id, "prefixed tool name collision");
            }
            self.tools.upsert(
                name.clone(),
                ToolDefinition {
                    name,
                    ..tool.clone()
                },
            );
        }

        for prompt in &capabilities.prompts {
            let name = prefixed_name(&token, &prompt.name);
            self.index.prompts.insert(name.clone(), origin(&prompt.name));
            self.prompts.upsert(
                name.clone(),
                PromptDefinition {
                    name,
                    ..prompt.clone()
                },
            );
        }

        for template in &capabilities.resource_templates {
            let name = prefixed_name(&token, &template.name);
            self.index
                .resource_templates
                .insert(name.clone(), origin(&template.name));
            self.resource_templates.upsert(
                name.clone(),
                ResourceTemplateDefinition {
                    name,
                    ..template.clone()
                },
            );
        }

        for resource in &capabilities.resources {
            self.index
                .resources
                .insert(resource.uri.clone(), origin(&resource.uri));
            self.resources.upsert(
                resource.uri.clone(),
                ResourceDefinition {
                    name: prefixed_name(&token, &resource.name),
                    ..resource.clone()
                },
            );
        }

        if let Some(payload) = &descriptor.custom_instructions {
            match ServerContext::from_payload(&descriptor.id, &descriptor.name, payload) {
                Some(context) => self.contexts.insert(context),
                None => debug!(server_id = %descriptor.id, "no usable custom instructions"),
            }
        }

        self.servers.insert(
            descriptor.id.clone(),
            ServerCatalog {
                descriptor,
                token,
                capabilities,
            },
        );
    }

    fn finish(self) -> CatalogSnapshot {
        CatalogSnapshot {
            index: self.index,
            contexts: self.contexts,
            tools: self.tools.into_items(),
            resources: self.resources.into_items(),
            resource_templates: self.resource_templates.into_items(),
            prompts: self.prompts.into_items(),
            servers: self.servers,
            failures: self.failures,
            refreshed_at: Some(Utc::now()),
        }
    }
}

/// Insertion-ordered list where re-inserting a key replaces in place
struct NamedList<T> {
    items: Vec<T>,
    positions: HashMap<String, usize>,
}

impl<T> Default for NamedList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl<T> NamedList<T> {
    fn upsert(&mut self, key: String, item: T) {
        match self.positions.get(&key) {
            Some(&position) => self.items[position] = item,
            None => {
                self.positions.insert(key, self.items.len());
                self.items.push(item);
            }
        }
    }

    fn into_items(self) -> Vec<T> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{descriptor, FakeDirectory, FakeServer, FakeTransportFactory};
    use serde_json::json;

    struct Harness {
        directory: Arc<FakeDirectory>,
        factory: Arc<FakeTransportFactory>,
        sessions: Arc<SessionManager>,
        aggregator: CapabilityAggregator,
    }

    fn harness(servers: Vec<DownstreamServerDescriptor>, config: AggregatorConfig) -> Harness {
        let directory = Arc::new(FakeDirectory::new(servers));
        let factory = Arc::new(FakeTransportFactory::new());
        let sessions = Arc::new(SessionManager::with_connect_timeout(
            factory.clone(),
            Duration::from_secs(1),
        ));
        let aggregator = CapabilityAggregator::new(directory.clone(), sessions.clone(), config);
        Harness {
            directory,
            factory,
            sessions,
            aggregator,
        }
    }

    fn live_config() -> AggregatorConfig {
        AggregatorConfig {
            mode: DiscoveryMode::Live,
            server_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_github_scenario_directory_mode() {
        let h = harness(
            vec![descriptor("s1", "GitHub", &["create_issue"])],
            AggregatorConfig::default(),
        );

        let snapshot = h.aggregator.refresh(false).await;

        assert_eq!(snapshot.tools.len(), 1);
        assert_eq!(snapshot.tools[0].name, "GitHub_create_issue");
        assert_eq!(
            h.aggregator.resolve("GitHub_create_issue"),
            Some(CapabilityOrigin {
                original_name: "create_issue".to_string(),
                server_id: ServerId::new("s1"),
            })
        );
        // Directory mode never opens a connection
        assert_eq!(h.factory.opens(), 0);
    }

    #[tokio::test]
    async fn test_unknown_name_does_not_resolve() {
        let h = harness(
            vec![descriptor("s1", "GitHub", &["create_issue"])],
            AggregatorConfig::default(),
        );
        h.aggregator.refresh(false).await;

        assert!(h.aggregator.resolve("foo_bar").is_none());
        assert!(h.aggregator.resolve("create_issue").is_none());
    }

    #[tokio::test]
    async fn test_cached_until_forced() {
        let h = harness(
            vec![descriptor("s1", "GitHub", &["create_issue"])],
            AggregatorConfig::default(),
        );

        let first = h.aggregator.refresh(false).await;
        let second = h.aggregator.refresh(false).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(h.directory.list_calls(), 1);

        let forced = h.aggregator.refresh(true).await;
        assert!(!Arc::ptr_eq(&first, &forced));
        assert_eq!(h.directory.list_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuilds_after_ttl() {
        let h = harness(
            vec![descriptor("s1", "GitHub", &["create_issue"])],
            AggregatorConfig {
                cache_ttl: Duration::from_secs(60),
                ..Default::default()
            },
        );

        h.aggregator.refresh(false).await;
        h.directory
            .set_servers(vec![descriptor("s1", "GitHub", &["create_issue", "close_issue"])]);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(h.aggregator.refresh(false).await.tools.len(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(h.aggregator.refresh(false).await.tools.len(), 2);
        assert_eq!(h.directory.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_live_mode_isolates_failing_servers() {
        let h = harness(
            vec![
                descriptor("s1", "GitHub", &[]),
                descriptor("s2", "Linear", &[]),
                descriptor("s3", "Slow", &[]),
                descriptor("s4", "Broken", &[]),
            ],
            live_config(),
        );
        h.factory.add_server("s1", FakeServer::with_tools(&["create_issue", "list_prs"]));
        h.factory.add_server("s2", FakeServer::with_tools(&["create_ticket"]));
        h.factory.add_server(
            "s3",
            FakeServer {
                list_delay: Some(Duration::from_secs(5)),
                ..FakeServer::with_tools(&["never_seen"])
            },
        );
        h.factory.add_server(
            "s4",
            FakeServer {
                fail_list: true,
                ..FakeServer::with_tools(&["also_never_seen"])
            },
        );

        let snapshot = h.aggregator.refresh(true).await;

        let names: Vec<&str> = snapshot.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["GitHub_create_issue", "GitHub_list_prs", "Linear_create_ticket"]
        );
        assert!(h.aggregator.resolve("Slow_never_seen").is_none());
        assert!(h.aggregator.resolve("Broken_also_never_seen").is_none());

        let failed: Vec<&str> = snapshot.failures.iter().map(|f| f.server_id.as_str()).collect();
        assert_eq!(failed, vec!["s3", "s4"]);
        assert!(snapshot.failures[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_live_mode_unreachable_server_is_excluded() {
        let h = harness(
            vec![descriptor("s1", "GitHub", &[]), descriptor("s2", "Down", &[])],
            live_config(),
        );
        h.factory.add_server("s1", FakeServer::with_tools(&["create_issue"]));
        h.factory.add_server(
            "s2",
            FakeServer {
                fail_open: true,
                ..Default::default()
            },
        );

        let snapshot = h.aggregator.refresh(true).await;
        assert_eq!(snapshot.tools.len(), 1);
        assert_eq!(snapshot.failures.len(), 1);
        assert_eq!(h.sessions.live_sessions(), 1);
    }

    #[tokio::test]
    async fn test_every_entry_resolves_to_its_origin() {
        let h = harness(
            vec![
                descriptor("s1", "GitHub", &["create_issue", "merge_pr"]),
                descriptor("s2", "My Notes!", &["search", "append"]),
            ],
            AggregatorConfig::default(),
        );
        let snapshot = h.aggregator.refresh(false).await;

        for catalog in snapshot.servers.values() {
            for tool in &catalog.capabilities.tools {
                let name = prefixed_name(&catalog.token, &tool.name);
                let origin = h.aggregator.resolve(&name).unwrap();
                assert_eq!(origin.original_name, tool.name);
                assert_eq!(origin.server_id, catalog.descriptor.id);
            }
        }
        assert!(h.aggregator.resolve("My_Notes_search").is_some());
    }

    #[tokio::test]
    async fn test_collisions_are_deterministic() {
        let a = descriptor("a", "Tools", &["search"]);
        let b = descriptor("b", "Tools", &["search", "fetch"]);

        let h = harness(vec![b.clone(), a.clone()], AggregatorConfig::default());
        let first = h.aggregator.refresh(true).await;

        h.directory.set_servers(vec![a, b]);
        let second = h.aggregator.refresh(true).await;

        assert_eq!(first.index, second.index);
        assert_eq!(
            first.tools.iter().map(|t| &t.name).collect::<Vec<_>>(),
            second.tools.iter().map(|t| &t.name).collect::<Vec<_>>()
        );
        // Servers are applied in id order, so "b" wins
        assert_eq!(h.aggregator.resolve("Tools_search").unwrap().server_id, ServerId::new("b"));
        assert_eq!(first.tools.len(), 2);
    }

    #[tokio::test]
    async fn test_reserved_names_are_not_shadowed() {
        let h = harness(
            vec![
                descriptor("s1", "GitHub", &["create_issue"]),
                descriptor("s9", "getting", &["started", "help"]),
            ],
            AggregatorConfig {
                reserved_tool_names: vec!["getting_started".to_string()],
                ..Default::default()
            },
        );

        let snapshot = h.aggregator.refresh(false).await;

        let names: Vec<&str> = snapshot.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["GitHub_create_issue", "getting_help"]);
        assert!(h.aggregator.resolve("getting_started").is_none());
        assert!(!snapshot.render_summary().contains("getting_started"));
    }

    #[tokio::test]
    async fn test_directory_failure_keeps_last_known_good() {
        let h = harness(
            vec![descriptor("s1", "GitHub", &["create_issue"])],
            AggregatorConfig::default(),
        );
        h.aggregator.refresh(true).await;

        h.directory
            .fail_with(GatewayError::Directory("connection refused".to_string()));
        let snapshot = h.aggregator.refresh(true).await;

        assert_eq!(snapshot.tools.len(), 1);
        assert!(h.aggregator.resolve("GitHub_create_issue").is_some());
    }

    #[tokio::test]
    async fn test_directory_failure_without_history_is_empty() {
        let h = harness(Vec::new(), AggregatorConfig::default());
        h.directory
            .fail_with(GatewayError::Directory("connection refused".to_string()));

        let snapshot = h.aggregator.refresh(false).await;
        assert!(snapshot.tools.is_empty());
        assert!(snapshot.index.is_empty());
        assert!(h.aggregator.resolve("GitHub_create_issue").is_none());
    }

    #[tokio::test]
    async fn test_missing_credential_short_circuits() {
        let directory = Arc::new(FakeDirectory::unconfigured());
        let sessions = Arc::new(SessionManager::new(Arc::new(FakeTransportFactory::new())));
        let aggregator =
            CapabilityAggregator::new(directory.clone(), sessions, AggregatorConfig::default());

        let snapshot = aggregator.refresh(true).await;
        assert!(snapshot.tools.is_empty());
        assert_eq!(directory.list_calls(), 0);
        assert!(!aggregator.is_configured());
    }

    #[tokio::test]
    async fn test_contexts_are_built_per_server() {
        let mut github = descriptor("s1", "GitHub", &["create_issue"]);
        github.custom_instructions = Some(json!({"instructions": "Label every issue", "read_only": true}));
        let mut linear = descriptor("s2", "Linear", &["create_ticket"]);
        linear.custom_instructions = Some(json!("{not valid json"));

        let h = harness(vec![github, linear], AggregatorConfig::default());
        let snapshot = h.aggregator.refresh(false).await;

        assert_eq!(snapshot.contexts.len(), 1);
        let context = snapshot.contexts.get(&ServerId::new("s1")).unwrap();
        assert_eq!(context.instructions.as_deref(), Some("Label every issue"));
        // The broken payload only costs Linear its context
        assert_eq!(snapshot.tools.len(), 2);

        let summary = snapshot.render_summary();
        assert!(summary.contains("### GitHub (s1)"));
        assert!(summary.contains("Tools: GitHub_create_issue"));
        assert!(summary.contains("Instructions: Label every issue"));
    }

    #[tokio::test]
    async fn test_resources_and_prompts_are_indexed() {
        let mut docs = descriptor("s1", "Docs", &[]);
        docs.capabilities.resources = vec![ResourceDefinition {
            uri: "docs://readme".to_string(),
            name: "readme".to_string(),
            description: None,
            mime_type: Some("text/markdown".to_string()),
        }];
        docs.capabilities.prompts = vec![PromptDefinition {
            name: "summarize".to_string(),
            description: None,
            arguments: Vec::new(),
        }];

        let h = harness(vec![docs], AggregatorConfig::default());
        let snapshot = h.aggregator.refresh(false).await;

        assert_eq!(snapshot.resources[0].uri, "docs://readme");
        assert_eq!(snapshot.resources[0].name, "Docs_readme");
        assert_eq!(
            h.aggregator.resolve_resource("docs://readme").unwrap().server_id,
            ServerId::new("s1")
        );
        assert_eq!(
            h.aggregator.resolve_prompt("Docs_summarize").unwrap().original_name,
            "summarize"
        );
    }

    #[tokio::test]
    async fn test_live_mode_reports_tools_in_background() {
        let h = harness(
            vec![descriptor("s1", "GitHub", &[])],
            AggregatorConfig {
                report_tools: true,
                ..live_config()
            },
        );
        h.factory.add_server("s1", FakeServer::with_tools(&["create_issue"]));

        h.aggregator.refresh(true).await;

        for _ in 0..100 {
            if !h.directory.reports().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            h.directory.reports(),
            vec![(ServerId::new("s1"), vec!["create_issue".to_string()])]
        );
    }

    #[tokio::test]
    async fn test_live_mode_closes_sessions_of_removed_servers() {
        let h = harness(
            vec![descriptor("s1", "GitHub", &[]), descriptor("s2", "Linear", &[])],
            live_config(),
        );
        h.factory.add_server("s1", FakeServer::with_tools(&["create_issue"]));
        h.factory.add_server("s2", FakeServer::with_tools(&["create_ticket"]));

        h.aggregator.refresh(true).await;
        assert_eq!(h.sessions.live_sessions(), 2);

        h.directory.set_servers(vec![descriptor("s1", "GitHub", &[])]);
        let snapshot = h.aggregator.refresh(true).await;

        assert_eq!(h.sessions.server_ids(), vec![ServerId::new("s1")]);
        assert_eq!(h.factory.closes(), 1);
        assert_eq!(snapshot.tools.len(), 1);
        // Existing session is reused, not reopened
        assert_eq!(h.factory.opens(), 2);
    }

    #[test]
    fn test_discovery_mode_from_str() {
        assert_eq!("live".parse::<DiscoveryMode>(), Ok(DiscoveryMode::Live));
        assert_eq!("Directory".parse::<DiscoveryMode>(), Ok(DiscoveryMode::Directory));
        assert!("both".parse::<DiscoveryMode>().is_err());
    }
}
