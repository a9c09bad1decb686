pub mod agent;
pub mod coordinator;
pub mod core;
pub mod detect;
pub mod fabric;
pub mod host;
pub mod store;
pub mod surface;

// --- Primary core exports ---
pub use crate::core::types;
pub use crate::core::types::*;
pub use crate::core::AppState;

// --- Flattened convenience paths ---
pub use crate::detect::{detect, find_dismissal, DialogSighting, DismissalPlan, PageSnapshot};
pub use crate::fabric::{deliver_with_injection, AgentInjector, DeliveryError, Fabric, InjectError};
pub use crate::host::{ChromeHost, HostError, PageHost};
pub use crate::store::{JsonFileStore, MemoryStore, StateStore, StoreError};
