#[derive(Clone)]
pub struct AppState {
    /// Canonical persistent state (the `enabled` flag lives here).
    pub store: std::sync::Arc<dyn crate::store::StateStore>,
    /// Per-instance agent mailboxes. Cloning shares the routing table.
    pub fabric: crate::fabric::Fabric,
    pub host: std::sync::Arc<dyn crate::host::PageHost>,
    /// Spawns an agent for an instance that answered `NoAgent`.
    pub injector: std::sync::Arc<dyn crate::fabric::AgentInjector>,
    pub coordinator: std::sync::Arc<crate::coordinator::Coordinator>,

    /// File-based config loaded from `auto-encore.json` (env-var fallback for all fields).
    pub encore_config: std::sync::Arc<crate::core::config::EncoreConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("target_host", &self.encore_config.resolve_target_host())
            .field("agents_registered", &self.fabric.registered_count())
            .finish()
    }
}

impl AppState {
    /// Wires the full object graph: fabric → launcher → coordinator. The store
    /// and host are passed in; picking them (disk-backed vs in-memory store,
    /// which browser) is `main`'s call.
    pub fn new(
        store: std::sync::Arc<dyn crate::store::StateStore>,
        host: std::sync::Arc<dyn crate::host::PageHost>,
        encore_config: std::sync::Arc<crate::core::config::EncoreConfig>,
    ) -> Self {
        let fabric = crate::fabric::Fabric::new(encore_config.resolve_reply_timeout());
        let tuning = crate::agent::AgentTuning::from_config(&encore_config);
        let injector: std::sync::Arc<dyn crate::fabric::AgentInjector> =
            std::sync::Arc::new(crate::agent::AgentLauncher::new(
                fabric.clone(),
                host.clone(),
                store.clone(),
                tuning,
            ));
        let coordinator = std::sync::Arc::new(crate::coordinator::Coordinator::new(
            store.clone(),
            fabric.clone(),
            host.clone(),
            injector.clone(),
            encore_config.resolve_ensure_interval(),
        ));
        Self {
            store,
            fabric,
            host,
            injector,
            coordinator,
            encore_config,
        }
    }
}
