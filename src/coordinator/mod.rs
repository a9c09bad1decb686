//! Coordinator: the authority for the canonical `enabled` flag.
//!
//! Three flows live here and nowhere else:
//! * `ensure_all_instances`: probe every matching page, injecting agents
//!   where none answer; the probe is a `setEnabled(canonical)` so presence
//!   check and state repair are one round-trip;
//! * `toggle_all`: the single place the flag is inverted;
//! * the store-change subscription, which fans a new canonical value out to
//!   every page (agents persist their own toggles, so this is also how a
//!   toggle on one page reaches all the others).

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::core::types::{AgentRequest, EnsureReport};
use crate::fabric::{deliver_with_injection, AgentInjector, Fabric};
use crate::host::PageHost;
use crate::store::{StateStore, StoreError, DEFAULT_ENABLED, ENABLED_KEY};

pub struct Coordinator {
    store: Arc<dyn StateStore>,
    fabric: Fabric,
    host: Arc<dyn PageHost>,
    injector: Arc<dyn AgentInjector>,
    ensure_interval: Duration,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn StateStore>,
        fabric: Fabric,
        host: Arc<dyn PageHost>,
        injector: Arc<dyn AgentInjector>,
        ensure_interval: Duration,
    ) -> Self {
        Self {
            store,
            fabric,
            host,
            injector,
            ensure_interval,
        }
    }

    /// Probe every matching page and leave each with a live agent holding the
    /// canonical flag. Safe to call at any time; a page that already has an
    /// agent just absorbs one redundant `setEnabled`.
    pub async fn ensure_all_instances(&self) -> EnsureReport {
        let canonical = match self.store.get_bool(ENABLED_KEY, DEFAULT_ENABLED).await {
            Ok(value) => value,
            Err(e) => {
                warn!("ensure: store unreadable ({}), assuming enabled={}", e, DEFAULT_ENABLED);
                DEFAULT_ENABLED
            }
        };
        let instances = match self.host.list_instances().await {
            Ok(list) => list,
            Err(e) => {
                warn!("ensure: cannot enumerate pages: {}", e);
                return EnsureReport::default();
            }
        };

        let probes = instances.iter().map(|instance| async move {
            let was_routed = self.fabric.is_registered(instance);
            let outcome = deliver_with_injection(
                &self.fabric,
                self.injector.as_ref(),
                instance,
                AgentRequest::SetEnabled { enabled: canonical },
            )
            .await;
            (instance, was_routed, outcome)
        });
        let outcomes = join_all(probes).await;

        let mut report = EnsureReport {
            instances: outcomes.len(),
            ..EnsureReport::default()
        };
        for (instance, was_routed, outcome) in outcomes {
            match outcome {
                Ok(_) => {
                    if !was_routed {
                        report.injected += 1;
                    }
                }
                Err(e) => {
                    warn!("ensure: {} unreachable: {}", instance, e);
                    report.unreachable += 1;
                }
            }
        }
        info!(
            "📡 ensure: {} page(s), {} injected, {} unreachable",
            report.instances, report.injected, report.unreachable
        );
        report
    }

    /// Invert the canonical flag: read, flip, persist, fan out, return the new
    /// value. Callers never invert on their own, so concurrent toggles always
    /// land on a definite state instead of cancelling out.
    pub async fn toggle_all(&self) -> Result<bool, StoreError> {
        let current = self.store.get_bool(ENABLED_KEY, DEFAULT_ENABLED).await?;
        let next = !current;
        self.store.set_bool(ENABLED_KEY, next).await?;
        info!("🔀 auto-continue toggled {} -> {}", current, next);
        self.fan_out(next).await;
        Ok(next)
    }

    /// Push `enabled` to every enumerable page. Plain sends, no injection, and
    /// failures are dropped on the floor: the recurring ensure pass repairs
    /// whatever this misses.
    async fn fan_out(&self, enabled: bool) {
        let instances = match self.host.list_instances().await {
            Ok(list) => list,
            Err(e) => {
                debug!("fan-out skipped, cannot enumerate pages: {}", e);
                return;
            }
        };
        let sends = instances.iter().map(|instance| {
            self.fabric
                .deliver(instance, AgentRequest::SetEnabled { enabled })
        });
        let delivered = join_all(sends)
            .await
            .into_iter()
            .filter(|r| r.is_ok())
            .count();
        debug!("fan-out enabled={} reached {}/{} page(s)", enabled, delivered, instances.len());
    }

    /// Long-running loop: recurring ensure passes plus the store-change
    /// subscription. The first ensure fires immediately on startup.
    pub async fn run(self: Arc<Self>) {
        let mut changes = self.store.changes();
        let mut changes_open = true;

        let mut ticker = tokio::time::interval(self.ensure_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.ensure_all_instances().await;
                }

                event = changes.recv(), if changes_open => match event {
                    Ok(change) => {
                        debug!(
                            "store change {}: {:?} -> {}",
                            change.key, change.old_value, change.new_value
                        );
                        if change.key == ENABLED_KEY {
                            self.fan_out(change.new_value).await;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("coordinator missed {} change event(s), resyncing", missed);
                        match self.store.get_bool(ENABLED_KEY, DEFAULT_ENABLED).await {
                            Ok(value) => self.fan_out(value).await,
                            Err(e) => warn!("resync read failed: {}", e),
                        }
                    }
                    Err(RecvError::Closed) => {
                        warn!("store change stream closed; continuing on ensure passes only");
                        changes_open = false;
                    }
                },
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
