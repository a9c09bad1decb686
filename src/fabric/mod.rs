//! Messaging fabric: how the coordinator and the control surface reach page
//! agents.
//!
//! Each live agent registers an mpsc mailbox under its [`InstanceId`]; a
//! request travels as an [`Envelope`] carrying a oneshot reply channel. Every
//! way a delivery can come back empty-handed (no route registered, mailbox
//! closed, reply dropped, reply timed out) collapses into the single
//! [`DeliveryError::NoAgent`] case on purpose: callers react to all of them
//! the same way (inject an agent and retry once, or report the instance
//! unreachable), and that reaction is factored out here as
//! [`deliver_with_injection`].
//!
//! Routes carry the agent's incarnation id so a late deregistration from an
//! agent that has already been replaced cannot tear down its successor's
//! mailbox.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::core::types::{AgentReply, AgentRequest, InstanceId};

/// Mailbox depth per agent. Small: steady state is one in-flight request.
pub(crate) const MAILBOX_CAPACITY: usize = 16;

/// One request in flight to an agent.
pub struct Envelope {
    pub request: AgentRequest,
    pub reply: oneshot::Sender<AgentReply>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Nothing answered for this instance. Unrouted, mailbox closed and reply
    /// dropped or timed out all land here; the distinctions carry no
    /// actionable difference for callers.
    #[error("no agent present for instance {0}")]
    NoAgent(InstanceId),
    /// Fallback injection itself failed (only from [`deliver_with_injection`]).
    #[error(transparent)]
    Inject(#[from] InjectError),
}

#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    /// The instance is not one of ours (unknown to the host, or not a
    /// matching page). Not retryable.
    #[error("instance {0} is not injectable")]
    Refused(InstanceId),
    #[error("agent spawn failed: {0}")]
    Spawn(String),
}

/// Spawns an agent into an instance so a retried delivery can succeed.
#[async_trait]
pub trait AgentInjector: Send + Sync {
    /// Spawn and register an agent for `instance`. The mailbox must be routed
    /// before this returns. Instances the host cannot see are refused.
    async fn inject(&self, instance: &InstanceId) -> Result<(), InjectError>;
}

struct Route {
    incarnation: uuid::Uuid,
    tx: mpsc::Sender<Envelope>,
}

/// Routing table, cheap to clone and share across tasks.
#[derive(Clone)]
pub struct Fabric {
    routes: Arc<Mutex<HashMap<InstanceId, Route>>>,
    reply_timeout: Duration,
}

impl Fabric {
    pub fn new(reply_timeout: Duration) -> Self {
        Self {
            routes: Arc::new(Mutex::new(HashMap::new())),
            reply_timeout,
        }
    }

    /// Route `instance` to a fresh agent mailbox, replacing any previous
    /// registration (the replaced agent's deregistration will be ignored as
    /// stale).
    pub fn register(&self, instance: InstanceId, incarnation: uuid::Uuid, tx: mpsc::Sender<Envelope>) {
        let replaced = self
            .routes
            .lock()
            .unwrap()
            .insert(instance.clone(), Route { incarnation, tx });
        if replaced.is_some() {
            debug!("fabric: re-registered {} (incarnation {})", instance, incarnation);
        }
    }

    /// Remove the route, but only if it still belongs to `incarnation`.
    pub fn deregister(&self, instance: &InstanceId, incarnation: uuid::Uuid) {
        let mut routes = self.routes.lock().unwrap();
        if routes.get(instance).is_some_and(|r| r.incarnation == incarnation) {
            routes.remove(instance);
        }
    }

    pub fn registered_count(&self) -> usize {
        self.routes.lock().unwrap().len()
    }

    pub fn is_registered(&self, instance: &InstanceId) -> bool {
        self.routes.lock().unwrap().contains_key(instance)
    }

    /// Send one request and wait for the reply.
    ///
    /// A closed mailbox also drops the dead route so the table heals without
    /// waiting for the next registration.
    pub async fn deliver(
        &self,
        instance: &InstanceId,
        request: AgentRequest,
    ) -> Result<AgentReply, DeliveryError> {
        let (tx, sent_to) = {
            let routes = self.routes.lock().unwrap();
            match routes.get(instance) {
                Some(route) => (route.tx.clone(), route.incarnation),
                None => return Err(DeliveryError::NoAgent(instance.clone())),
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            request,
            reply: reply_tx,
        };

        if tx.send(envelope).await.is_err() {
            // Mailbox gone: the agent died without deregistering.
            self.deregister(instance, sent_to);
            return Err(DeliveryError::NoAgent(instance.clone()));
        }

        match tokio::time::timeout(self.reply_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) | Err(_) => Err(DeliveryError::NoAgent(instance.clone())),
        }
    }
}

/// Deliver `request`, and when nothing answers, inject an agent and retry
/// exactly once.
///
/// This is the one shared recovery path: the surface and the coordinator both
/// reach agents through it instead of hand-rolling their own probe/inject/retry
/// sequences.
pub async fn deliver_with_injection(
    fabric: &Fabric,
    injector: &dyn AgentInjector,
    instance: &InstanceId,
    request: AgentRequest,
) -> Result<AgentReply, DeliveryError> {
    match fabric.deliver(instance, request.clone()).await {
        Ok(reply) => Ok(reply),
        Err(DeliveryError::NoAgent(_)) => {
            debug!("fabric: no agent in {}, injecting and retrying", instance);
            injector.inject(instance).await?;
            fabric.deliver(instance, request).await
        }
        Err(other) => Err(other),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
