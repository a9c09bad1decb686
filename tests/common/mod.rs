//! Shared fakes for the integration suite: a scriptable page host, failing
//! stores, a refusing injector, and helpers for assembling the full daemon
//! object graph over them.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use auto_encore::coordinator::Coordinator;
use auto_encore::core::config::EncoreConfig;
use auto_encore::detect::{DismissalPlan, PageSnapshot};
use auto_encore::host::{HostError, PageHost};
use auto_encore::store::{MemoryStore, StoreError};
use auto_encore::types::{InstanceId, StateChange};
use auto_encore::{AgentInjector, AppState, Fabric, InjectError, StateStore};
use tokio::sync::broadcast;

/// A player page showing a pause interruption with an affirmative control.
pub const DIALOG_HTML: &str = r#"<html><body>
  <div id="player">now playing</div>
  <div role="dialog" class="dialog">
    <div class="prompt">Are you still watching?</div>
    <button aria-label="Yes, keep playing">Yes</button>
    <button class="no-button">Dismiss</button>
  </div>
</body></html>"#;

/// The same page with nothing to dismiss.
pub const QUIET_HTML: &str =
    r#"<html><body><div id="player">now playing</div></body></html>"#;

/// Mutable per-page script: tests flip the HTML and bump the mutation
/// marker; agents observe both through the [`FakeHost`].
pub struct PageScript {
    html: Mutex<String>,
    marker: Mutex<Option<u64>>,
    gone: AtomicBool,
    clicks: AtomicUsize,
    observes: AtomicUsize,
    last_plan: Mutex<Option<(String, String)>>,
}

impl PageScript {
    fn new() -> Self {
        Self {
            html: Mutex::new(QUIET_HTML.to_string()),
            marker: Mutex::new(Some(0)),
            gone: AtomicBool::new(false),
            clicks: AtomicUsize::new(0),
            observes: AtomicUsize::new(0),
            last_plan: Mutex::new(None),
        }
    }

    /// Swap the page content and tick the mutation marker, like a DOM change
    /// under a live observer.
    pub fn mutate(&self, html: &str) {
        *self.html.lock().unwrap() = html.to_string();
        let mut marker = self.marker.lock().unwrap();
        *marker = Some(marker.unwrap_or(0) + 1);
    }

    /// Replace the document without ticking the marker, like a navigation
    /// that wiped the observer.
    pub fn navigate(&self, html: &str) {
        *self.html.lock().unwrap() = html.to_string();
        *self.marker.lock().unwrap() = None;
    }

    pub fn close(&self) {
        self.gone.store(true, Ordering::SeqCst);
    }

    pub fn clicks(&self) -> usize {
        self.clicks.load(Ordering::SeqCst)
    }

    pub fn observes(&self) -> usize {
        self.observes.load(Ordering::SeqCst)
    }

    /// `(strategy, selector)` of the most recent click.
    pub fn last_plan(&self) -> Option<(String, String)> {
        self.last_plan.lock().unwrap().clone()
    }
}

/// In-memory [`PageHost`]: pages are added by tests, enumeration order is
/// insertion order (so the first added page is the "active" one).
#[derive(Default)]
pub struct FakeHost {
    pages: Mutex<Vec<(InstanceId, Arc<PageScript>)>>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_page(&self, id: &str) -> Arc<PageScript> {
        let script = Arc::new(PageScript::new());
        self.pages
            .lock()
            .unwrap()
            .push((InstanceId::from(id), script.clone()));
        script
    }

    fn script(&self, instance: &InstanceId) -> Result<Arc<PageScript>, HostError> {
        let pages = self.pages.lock().unwrap();
        match pages.iter().find(|(id, _)| id == instance) {
            Some((_, script)) if !script.gone.load(Ordering::SeqCst) => Ok(script.clone()),
            _ => Err(HostError::InstanceGone(instance.clone())),
        }
    }
}

#[async_trait]
impl PageHost for FakeHost {
    async fn list_instances(&self) -> Result<Vec<InstanceId>, HostError> {
        Ok(self
            .pages
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| !s.gone.load(Ordering::SeqCst))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn snapshot(&self, instance: &InstanceId) -> Result<PageSnapshot, HostError> {
        let script = self.script(instance)?;
        let html = script.html.lock().unwrap().clone();
        Ok(PageSnapshot::from_html(html))
    }

    async fn observe(&self, instance: &InstanceId) -> Result<(), HostError> {
        let script = self.script(instance)?;
        script.observes.fetch_add(1, Ordering::SeqCst);
        let mut marker = script.marker.lock().unwrap();
        if marker.is_none() {
            *marker = Some(0);
        }
        Ok(())
    }

    async fn mutation_marker(&self, instance: &InstanceId) -> Result<Option<u64>, HostError> {
        let script = self.script(instance)?;
        let marker = *script.marker.lock().unwrap();
        Ok(marker)
    }

    async fn activate(
        &self,
        instance: &InstanceId,
        plan: &DismissalPlan,
    ) -> Result<bool, HostError> {
        let script = self.script(instance)?;
        script.clicks.fetch_add(1, Ordering::SeqCst);
        *script.last_plan.lock().unwrap() =
            Some((plan.strategy.to_string(), plan.selector.clone()));
        // Clicking the affirmative control resolves the dialog.
        *script.html.lock().unwrap() = QUIET_HTML.to_string();
        Ok(true)
    }
}

/// Injector that never spawns anything; makes every unrouted instance
/// permanently unreachable.
pub struct RefusingInjector;

#[async_trait]
impl AgentInjector for RefusingInjector {
    async fn inject(&self, instance: &InstanceId) -> Result<(), InjectError> {
        Err(InjectError::Refused(instance.clone()))
    }
}

/// Store that answers reads with the caller's default but refuses every write.
pub struct ReadOnlyStore;

#[async_trait]
impl StateStore for ReadOnlyStore {
    async fn get_bool(&self, _key: &str, default: bool) -> Result<bool, StoreError> {
        Ok(default)
    }

    async fn set_bool(&self, _key: &str, _value: bool) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("read-only".to_string()))
    }

    fn changes(&self) -> broadcast::Receiver<StateChange> {
        broadcast::channel(1).0.subscribe()
    }
}

/// Store with no working capability at all.
pub struct BrokenStore;

#[async_trait]
impl StateStore for BrokenStore {
    async fn get_bool(&self, _key: &str, _default: bool) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("broken".to_string()))
    }

    async fn set_bool(&self, _key: &str, _value: bool) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("broken".to_string()))
    }

    fn changes(&self) -> broadcast::Receiver<StateChange> {
        broadcast::channel(1).0.subscribe()
    }
}

/// The production object graph (real fabric, agents, coordinator) wired over
/// a fake host and an in-memory store.
pub fn build_state(host: Arc<FakeHost>) -> AppState {
    build_state_with(host, Arc::new(MemoryStore::new()))
}

pub fn build_state_with(host: Arc<FakeHost>, store: Arc<dyn StateStore>) -> AppState {
    AppState::new(store, host, Arc::new(EncoreConfig::default()))
}

/// Like [`build_state`], but with an injector that refuses every spawn:
/// pages exist, agents never answer.
pub fn build_refusing_state(host: Arc<FakeHost>) -> AppState {
    let host: Arc<dyn PageHost> = host;
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let fabric = Fabric::new(Duration::from_millis(200));
    let injector: Arc<dyn AgentInjector> = Arc::new(RefusingInjector);
    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        fabric.clone(),
        host.clone(),
        injector.clone(),
        Duration::from_secs(60),
    ));
    AppState {
        store,
        fabric,
        host,
        injector,
        coordinator,
        encore_config: Arc::new(EncoreConfig::default()),
    }
}

/// Poll `cond` under virtual time until it holds (up to ten virtual seconds).
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
