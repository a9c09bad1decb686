//! Page agents: one actor task per open player page.
//!
//! An agent owns a boolean replica of the `enabled` flag and a select loop
//! over three wake sources:
//! * its fabric mailbox (ping / getStatus / setEnabled / toggle);
//! * the in-page mutation marker, polled every `mutation_poll` and debounced
//!   so a burst of DOM churn triggers a single sweep;
//! * a periodic backstop sweep, phase-jittered so a browser full of player
//!   tabs does not sweep in lockstep.
//!
//! Lifecycle: install the mutation marker, run one sweep on the default
//! replica (a dialog that is already up gets handled before the store is even
//! consulted), adopt the canonical flag, then loop until the mailbox closes or
//! the page goes away. On exit the agent deregisters its own incarnation,
//! never a successor's.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::core::config::EncoreConfig;
use crate::core::types::{AgentReply, AgentRequest, InstanceId};
use crate::detect::{self, DialogSighting};
use crate::fabric::{AgentInjector, Envelope, Fabric, InjectError, MAILBOX_CAPACITY};
use crate::host::{HostError, PageHost};
use crate::store::{StateStore, DEFAULT_ENABLED, ENABLED_KEY};

/// Timing knobs, resolved once from config and copied into every agent.
#[derive(Debug, Clone, Copy)]
pub struct AgentTuning {
    pub sweep_interval: Duration,
    pub debounce: Duration,
    pub dismiss_delay: Duration,
    pub mutation_poll: Duration,
}

impl AgentTuning {
    pub fn from_config(cfg: &EncoreConfig) -> Self {
        Self {
            sweep_interval: cfg.resolve_sweep_interval(),
            debounce: cfg.resolve_debounce(),
            dismiss_delay: cfg.resolve_dismiss_delay(),
            mutation_poll: cfg.resolve_mutation_poll(),
        }
    }
}

impl Default for AgentTuning {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            debounce: Duration::from_millis(100),
            dismiss_delay: Duration::from_millis(500),
            mutation_poll: Duration::from_millis(250),
        }
    }
}

enum SweepOutcome {
    Done,
    Gone,
}

enum MarkerPoll {
    Unchanged,
    Changed,
    Gone,
}

pub struct PageAgent {
    instance: InstanceId,
    incarnation: uuid::Uuid,
    host: Arc<dyn PageHost>,
    store: Arc<dyn StateStore>,
    fabric: Fabric,
    tuning: AgentTuning,
    /// Local replica of the enabled flag. Starts at the default so the very
    /// first sweep can run before the store answers.
    enabled: bool,
    last_marker: Option<u64>,
}

impl PageAgent {
    pub async fn run(mut self, mut mailbox: mpsc::Receiver<Envelope>) {
        let installed = self.host.observe(&self.instance).await;
        match installed {
            Ok(()) => {}
            Err(HostError::InstanceGone(_)) => {
                self.exit("page gone before startup");
                return;
            }
            Err(e) => warn!("agent {}: marker install failed: {}", self.instance, e),
        }
        // Seed the marker so the first poll compares against "now", not
        // against nothing.
        self.last_marker = self.host.mutation_marker(&self.instance).await.ok().flatten();

        // Availability-first: one sweep on the default replica, then adopt the
        // canonical value. At most this one sweep can act on a stale default.
        let first_sweep = self.sweep().await;
        if let SweepOutcome::Gone = first_sweep {
            self.exit("page gone during startup sweep");
            return;
        }
        let canonical = self.store.get_bool(ENABLED_KEY, DEFAULT_ENABLED).await;
        match canonical {
            Ok(value) => self.enabled = value,
            Err(e) => warn!(
                "agent {}: store unreadable ({}), keeping enabled={}",
                self.instance, e, self.enabled
            ),
        }
        info!("🎬 agent {} active (enabled={})", self.instance, self.enabled);

        // Jittered phase so many agents spread their backstop sweeps.
        let phase = {
            use rand::prelude::*;
            let mut rng = rand::rng();
            let span = self.tuning.sweep_interval.as_millis().max(1) as u64;
            Duration::from_millis(rng.random_range(0..span))
        };
        let mut sweep_timer = tokio::time::interval_at(
            tokio::time::Instant::now() + self.tuning.sweep_interval + phase,
            self.tuning.sweep_interval,
        );
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut marker_timer = tokio::time::interval(self.tuning.mutation_poll);
        marker_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Armed-sleep debounce: each observed change pushes the deadline out;
        // the sweep runs once the page stays quiet for a full window.
        let debounce = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(debounce);
        let mut debounce_armed = false;

        loop {
            tokio::select! {
                maybe = mailbox.recv() => match maybe {
                    Some(envelope) => {
                        let reply = self.handle(envelope.request).await;
                        let _ = envelope.reply.send(reply);
                    }
                    None => {
                        self.exit("mailbox closed");
                        return;
                    }
                },

                _ = marker_timer.tick() => {
                    let poll = self.poll_marker().await;
                    match poll {
                        MarkerPoll::Changed => {
                            debounce
                                .as_mut()
                                .reset(tokio::time::Instant::now() + self.tuning.debounce);
                            debounce_armed = true;
                        }
                        MarkerPoll::Unchanged => {}
                        MarkerPoll::Gone => {
                            self.exit("page gone");
                            return;
                        }
                    }
                }

                () = &mut debounce, if debounce_armed => {
                    debounce_armed = false;
                    let outcome = self.sweep().await;
                    if let SweepOutcome::Gone = outcome {
                        self.exit("page gone");
                        return;
                    }
                }

                _ = sweep_timer.tick() => {
                    let outcome = self.sweep().await;
                    if let SweepOutcome::Gone = outcome {
                        self.exit("page gone");
                        return;
                    }
                }
            }
        }
    }

    fn exit(self, reason: &str) {
        self.fabric.deregister(&self.instance, self.incarnation);
        info!("👋 agent {} exited ({})", self.instance, reason);
    }

    async fn handle(&mut self, request: AgentRequest) -> AgentReply {
        match request {
            AgentRequest::Ping => AgentReply::Pong { pong: true },
            AgentRequest::GetStatus => AgentReply::Status {
                enabled: self.enabled,
            },
            AgentRequest::SetEnabled { enabled } => {
                self.enabled = enabled;
                debug!("agent {}: enabled set to {}", self.instance, enabled);
                self.persist_replica().await;
                AgentReply::Status {
                    enabled: self.enabled,
                }
            }
            AgentRequest::Toggle => {
                self.enabled = !self.enabled;
                info!("🔀 agent {} toggled to {}", self.instance, self.enabled);
                self.persist_replica().await;
                AgentReply::Status {
                    enabled: self.enabled,
                }
            }
        }
    }

    /// Best effort: a store failure costs persistence, never the replica.
    async fn persist_replica(&self) {
        if let Err(e) = self.store.set_bool(ENABLED_KEY, self.enabled).await {
            warn!(
                "agent {}: could not persist enabled={}: {}",
                self.instance, self.enabled, e
            );
        }
    }

    /// Sample the in-page mutation counter. A missing marker (fresh document)
    /// or a counter that went backwards means the page was replaced in place:
    /// reinstall the observer and count it as a change.
    async fn poll_marker(&mut self) -> MarkerPoll {
        match self.host.mutation_marker(&self.instance).await {
            Ok(Some(count)) => {
                let changed = match self.last_marker {
                    Some(prev) if count == prev => false,
                    Some(prev) if count < prev => {
                        if let Err(HostError::InstanceGone(_)) =
                            self.host.observe(&self.instance).await
                        {
                            return MarkerPoll::Gone;
                        }
                        true
                    }
                    _ => true,
                };
                self.last_marker = Some(count);
                if changed {
                    MarkerPoll::Changed
                } else {
                    MarkerPoll::Unchanged
                }
            }
            Ok(None) => match self.host.observe(&self.instance).await {
                Ok(()) => {
                    self.last_marker = Some(0);
                    MarkerPoll::Changed
                }
                Err(HostError::InstanceGone(_)) => MarkerPoll::Gone,
                Err(e) => {
                    debug!("agent {}: marker reinstall failed: {}", self.instance, e);
                    MarkerPoll::Unchanged
                }
            },
            Err(HostError::InstanceGone(_)) => MarkerPoll::Gone,
            Err(e) => {
                debug!("agent {}: marker poll failed: {}", self.instance, e);
                MarkerPoll::Unchanged
            }
        }
    }

    /// One full detection pass: snapshot → detect → settle delay → fresh
    /// snapshot → plan → click. Every miss along the way ends the sweep; the
    /// next trigger starts over from scratch.
    async fn sweep(&mut self) -> SweepOutcome {
        if !self.enabled {
            return SweepOutcome::Done;
        }

        let snapshot = match self.host.snapshot(&self.instance).await {
            Ok(s) => s,
            Err(HostError::InstanceGone(_)) => return SweepOutcome::Gone,
            Err(e) => {
                debug!("agent {}: sweep skipped: {}", self.instance, e);
                return SweepOutcome::Done;
            }
        };
        let Some(sighting) = detect::detect(&snapshot) else {
            return SweepOutcome::Done;
        };
        info!(
            "👀 pause dialog in {} ({})",
            self.instance,
            describe(&sighting)
        );

        // Let the dialog finish mounting before choosing what to click.
        tokio::time::sleep(self.tuning.dismiss_delay).await;

        let fresh = match self.host.snapshot(&self.instance).await {
            Ok(s) => s,
            Err(HostError::InstanceGone(_)) => return SweepOutcome::Gone,
            Err(e) => {
                debug!("agent {}: re-snapshot failed: {}", self.instance, e);
                return SweepOutcome::Done;
            }
        };
        let Some(plan) = detect::find_dismissal(&fresh) else {
            info!(
                "agent {}: saw a pause dialog but found no affirmative control",
                self.instance
            );
            return SweepOutcome::Done;
        };

        match self.host.activate(&self.instance, &plan).await {
            Ok(true) => info!(
                "✅ dismissed pause dialog in {} ({:?} via {})",
                self.instance, plan.matched_text, plan.strategy
            ),
            Ok(false) => info!(
                "agent {}: dialog resolved itself before the click",
                self.instance
            ),
            Err(HostError::InstanceGone(_)) => return SweepOutcome::Gone,
            Err(e) => warn!("agent {}: dismissal click failed: {}", self.instance, e),
        }
        SweepOutcome::Done
    }
}

fn describe(sighting: &DialogSighting) -> &str {
    sighting
        .matched_text
        .as_deref()
        .or(sighting.matched_container.as_deref())
        .unwrap_or("?")
}

// ─────────────────────────────────────────────────────────────────────────────
// Launcher
// ─────────────────────────────────────────────────────────────────────────────

/// Spawns a [`PageAgent`] per instance, wiring its mailbox into the fabric.
/// This is the concrete injector behind `deliver_with_injection`.
pub struct AgentLauncher {
    fabric: Fabric,
    host: Arc<dyn PageHost>,
    store: Arc<dyn StateStore>,
    tuning: AgentTuning,
}

impl AgentLauncher {
    pub fn new(
        fabric: Fabric,
        host: Arc<dyn PageHost>,
        store: Arc<dyn StateStore>,
        tuning: AgentTuning,
    ) -> Self {
        Self {
            fabric,
            host,
            store,
            tuning,
        }
    }
}

#[async_trait]
impl AgentInjector for AgentLauncher {
    async fn inject(&self, instance: &InstanceId) -> Result<(), InjectError> {
        let known = self
            .host
            .list_instances()
            .await
            .map_err(|e| InjectError::Spawn(e.to_string()))?;
        if !known.contains(instance) {
            return Err(InjectError::Refused(instance.clone()));
        }

        let incarnation = uuid::Uuid::new_v4();
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.fabric.register(instance.clone(), incarnation, tx);
        let agent = PageAgent {
            instance: instance.clone(),
            incarnation,
            host: self.host.clone(),
            store: self.store.clone(),
            fabric: self.fabric.clone(),
            tuning: self.tuning,
            enabled: DEFAULT_ENABLED,
            last_marker: None,
        };
        tokio::spawn(agent.run(rx));
        info!("💉 agent injected into {} (incarnation {})", instance, incarnation);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
