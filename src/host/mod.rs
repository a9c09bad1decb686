//! Page host abstraction: everything the daemon needs from a browser, and
//! nothing else.
//!
//! Agents, the coordinator and the control surface never touch CDP directly;
//! they see pages as opaque [`InstanceId`]s plus five capabilities:
//! enumerate, snapshot, observe, read the mutation marker, click a planned
//! control. The integration tests drive the whole protocol stack through a
//! scripted implementation of this trait.

use async_trait::async_trait;

use crate::core::types::InstanceId;
use crate::detect::{DismissalPlan, PageSnapshot};

pub mod chrome;

pub use chrome::ChromeHost;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The page closed or navigated off the target host. Terminal for the
    /// instance's agent.
    #[error("instance {0} is gone")]
    InstanceGone(InstanceId),
    /// No usable browser right now (none found, launch failed, connection
    /// down and not recoverable).
    #[error("browser unavailable: {0}")]
    Unavailable(String),
    /// A devtools call failed for some other reason. Transient; the next
    /// sweep retries.
    #[error("devtools call failed: {0}")]
    Cdp(String),
}

#[async_trait]
pub trait PageHost: Send + Sync {
    /// Open pages on the target host, in the host runtime's enumeration order.
    async fn list_instances(&self) -> Result<Vec<InstanceId>, HostError>;

    /// The instance the control surface acts on: first enumerated match.
    async fn active_instance(&self) -> Result<Option<InstanceId>, HostError> {
        Ok(self.list_instances().await?.into_iter().next())
    }

    /// Serialize the instance's visible DOM and rendered text. Elements
    /// without a layout box are dropped at the source, which is what lets the
    /// detection code equate presence with visibility.
    async fn snapshot(&self, instance: &InstanceId) -> Result<PageSnapshot, HostError>;

    /// Install the in-page mutation marker. Idempotent; re-run freely after
    /// the marker disappears.
    async fn observe(&self, instance: &InstanceId) -> Result<(), HostError>;

    /// Current mutation-marker count. `None` means the marker is missing
    /// (fresh document after a navigation) and wants reinstalling.
    async fn mutation_marker(&self, instance: &InstanceId) -> Result<Option<u64>, HostError>;

    /// Re-find the planned control on the live page and click it.
    /// `Ok(false)` means nothing matched any more; the dialog resolved
    /// itself, which callers treat as a clean outcome.
    async fn activate(&self, instance: &InstanceId, plan: &DismissalPlan)
        -> Result<bool, HostError>;

    /// Release whatever the host is holding. Called once at daemon exit.
    async fn shutdown(&self) {}
}
