//! Control surface: the status / toggle / ensure flows and the axum handlers
//! that expose them. The CLI client mode talks to these same endpoints over
//! loopback, so every entry point shares one implementation.

use axum::{extract::State, http::StatusCode, response::Json};
use thiserror::Error;
use tracing::{info, warn};

use crate::core::state::AppState;
use crate::core::types::{
    AgentRequest, ControlRequest, EnsureResponse, ErrorResponse, InstanceReport, StatusResponse,
    StatusSource, ToggleResponse,
};
use crate::fabric::{deliver_with_injection, DeliveryError};
use crate::store::{StoreError, DEFAULT_ENABLED, ENABLED_KEY};

pub const NOTICE_AGENT_UNREACHABLE: &str =
    "page agent unreachable; showing the stored state";
pub const NOTICE_SYNC_PENDING: &str =
    "page agent unreachable; the saved state will reach it on the next ensure pass";
pub const NOTICE_NOT_PERSISTED: &str =
    "state store unavailable; the change was applied to the open page only";
pub const NOTICE_STORE_DOWN: &str = "state store unavailable; showing the live page state";

pub fn no_page_notice(host: &str) -> String {
    format!("Open {} to use auto-continue", host)
}

/// Both ways a surface operation can come back with nothing to show.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("state store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("no agent reachable: {0}")]
    Delivery(#[from] DeliveryError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Flows
// ─────────────────────────────────────────────────────────────────────────────

/// Stored flag plus the live view. The active page's agent is asked directly
/// and wins over the store when the two disagree; per-page rows are plain
/// probes that never inject.
pub async fn status_flow(state: &AppState) -> Result<StatusResponse, SurfaceError> {
    let canonical = state.store.get_bool(ENABLED_KEY, DEFAULT_ENABLED).await;
    if let Err(e) = &canonical {
        warn!("status: store read failed: {}", e);
    }

    let instances = match state.host.list_instances().await {
        Ok(list) => list,
        Err(e) => {
            warn!("status: cannot enumerate pages: {}", e);
            Vec::new()
        }
    };

    let mut notice = None;
    let agent_answer = match instances.first() {
        Some(active) => {
            let asked = deliver_with_injection(
                &state.fabric,
                state.injector.as_ref(),
                active,
                AgentRequest::GetStatus,
            )
            .await;
            match asked {
                Ok(reply) => reply.enabled(),
                Err(e) => {
                    warn!("status: active agent unreachable: {}", e);
                    notice = Some(NOTICE_AGENT_UNREACHABLE.to_string());
                    None
                }
            }
        }
        None => {
            notice = Some(no_page_notice(&state.encore_config.resolve_target_host()));
            None
        }
    };

    let mut reports = Vec::with_capacity(instances.len());
    for instance in &instances {
        let enabled = match state.fabric.deliver(instance, AgentRequest::GetStatus).await {
            Ok(reply) => reply.enabled(),
            Err(_) => None,
        };
        reports.push(InstanceReport {
            instance: instance.clone(),
            enabled,
        });
    }

    let (enabled, source) = match (canonical, agent_answer) {
        (stored, Some(live)) => {
            if stored.is_err() {
                notice = Some(NOTICE_STORE_DOWN.to_string());
            }
            (live, StatusSource::Agent)
        }
        (Ok(stored), None) => (stored, StatusSource::Store),
        (Err(e), None) => return Err(e.into()),
    };

    Ok(StatusResponse {
        enabled,
        source,
        notice,
        instances: reports,
    })
}

/// The user-facing toggle. Without a matching page this is a no-op that
/// reports the stored value; with one, the coordinator inverts the canonical
/// flag and the active page is updated in the same breath.
pub async fn toggle_flow(state: &AppState, from: Option<&str>) -> Result<ToggleResponse, SurfaceError> {
    let host = state.encore_config.resolve_target_host();
    let instances = match state.host.list_instances().await {
        Ok(list) => list,
        Err(e) => {
            warn!("toggle: cannot enumerate pages: {}", e);
            Vec::new()
        }
    };
    let Some(active) = instances.first().cloned() else {
        let current = state.store.get_bool(ENABLED_KEY, DEFAULT_ENABLED).await?;
        return Ok(ToggleResponse {
            enabled: current,
            notice: Some(no_page_notice(&host)),
        });
    };

    if let Some(who) = from {
        info!("toggle requested by {}", who);
    }

    match state.coordinator.toggle_all().await {
        Ok(new_value) => {
            // The fan-out already raced ahead; this direct delivery guarantees
            // the page the user is looking at has the new value before we
            // reply, injecting an agent if the page has none.
            let delivered = deliver_with_injection(
                &state.fabric,
                state.injector.as_ref(),
                &active,
                AgentRequest::SetEnabled { enabled: new_value },
            )
            .await;
            let notice = match delivered {
                Ok(_) => None,
                Err(e) => {
                    warn!("toggle: active page {} unreachable: {}", active, e);
                    Some(NOTICE_SYNC_PENDING.to_string())
                }
            };
            Ok(ToggleResponse {
                enabled: new_value,
                notice,
            })
        }
        Err(store_err) => {
            // Degraded mode: flip the visible page directly. Nothing is
            // persisted and other pages are not told.
            warn!(
                "toggle: store unavailable ({}), toggling the active page directly",
                store_err
            );
            let reply = deliver_with_injection(
                &state.fabric,
                state.injector.as_ref(),
                &active,
                AgentRequest::Toggle,
            )
            .await?;
            let Some(enabled) = reply.enabled() else {
                return Err(DeliveryError::NoAgent(active).into());
            };
            Ok(ToggleResponse {
                enabled,
                notice: Some(NOTICE_NOT_PERSISTED.to_string()),
            })
        }
    }
}

/// `ok` means the pass left every open page covered by a live agent.
pub async fn ensure_flow(state: &AppState) -> EnsureResponse {
    let report = state.coordinator.ensure_all_instances().await;
    EnsureResponse {
        ok: report.unreachable == 0,
        report,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

fn unavailable(e: SurfaceError) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

pub async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    status_flow(&state).await.map(Json).map_err(unavailable)
}

pub async fn post_toggle(
    State(state): State<AppState>,
    body: Option<Json<ControlRequest>>,
) -> Result<Json<ToggleResponse>, (StatusCode, Json<ErrorResponse>)> {
    let from = body.as_ref().and_then(|b| b.from.as_deref());
    toggle_flow(&state, from).await.map(Json).map_err(unavailable)
}

pub async fn post_ensure(
    State(state): State<AppState>,
) -> Json<EnsureResponse> {
    Json(ensure_flow(&state).await)
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "auto-encore",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
