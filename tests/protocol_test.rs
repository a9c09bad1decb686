//! End-to-end protocol tests: real agents, fabric and coordinator driven
//! over a scripted page host, with the tokio clock paused so sweep timers
//! and debounce windows elapse in virtual time.

mod common;

use std::time::Duration;

use auto_encore::store::{DEFAULT_ENABLED, ENABLED_KEY};
use auto_encore::types::{AgentRequest, InstanceId};

use common::{build_state, wait_until, FakeHost, DIALOG_HTML};

/// After N toggles the canonical flag is `initial XOR (N is odd)`, no matter
/// how the toggles interleave with fan-out.
#[tokio::test]
async fn test_toggle_parity_follows_xor() {
    let state = build_state(FakeHost::new());
    let initial = state
        .store
        .get_bool(ENABLED_KEY, DEFAULT_ENABLED)
        .await
        .unwrap();
    assert_eq!(initial, DEFAULT_ENABLED);

    for n in 1..=5u32 {
        let returned = state.coordinator.toggle_all().await.unwrap();
        let expected = initial ^ (n % 2 == 1);
        assert_eq!(returned, expected, "after {} toggle(s)", n);
        assert_eq!(
            state
                .store
                .get_bool(ENABLED_KEY, DEFAULT_ENABLED)
                .await
                .unwrap(),
            expected
        );
    }
}

/// A page without an agent gets one injected by the ensure pass, and the new
/// agent immediately holds the canonical flag.
#[tokio::test(start_paused = true)]
async fn test_ensure_injects_and_seeds_enabled() {
    let host = FakeHost::new();
    let script = host.add_page("tab-1");
    let state = build_state(host);

    let report = state.coordinator.ensure_all_instances().await;
    assert_eq!(report.instances, 1);
    assert_eq!(report.injected, 1);
    assert_eq!(report.unreachable, 0);
    assert!(script.observes() >= 1, "agent should attach its observer");

    let reply = state
        .fabric
        .deliver(&InstanceId::from("tab-1"), AgentRequest::GetStatus)
        .await
        .unwrap();
    assert_eq!(reply.enabled(), Some(true));
}

/// Running ensure twice with nothing changed injects nothing new and leaves
/// every replica where the first pass put it.
#[tokio::test(start_paused = true)]
async fn test_ensure_twice_converges_same_replicas() {
    let host = FakeHost::new();
    host.add_page("tab-1");
    host.add_page("tab-2");
    let state = build_state(host);
    state.store.set_bool(ENABLED_KEY, false).await.unwrap();

    let first = state.coordinator.ensure_all_instances().await;
    assert_eq!(first.injected, 2);

    let second = state.coordinator.ensure_all_instances().await;
    assert_eq!(second.instances, 2);
    assert_eq!(second.injected, 0);
    assert_eq!(second.unreachable, 0);

    for id in ["tab-1", "tab-2"] {
        let reply = state
            .fabric
            .deliver(&InstanceId::from(id), AgentRequest::GetStatus)
            .await
            .unwrap();
        assert_eq!(reply.enabled(), Some(false));
    }
    assert_eq!(state.fabric.registered_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_set_enabled_then_get_status_round_trip() {
    let host = FakeHost::new();
    host.add_page("tab-1");
    let state = build_state(host);
    state.coordinator.ensure_all_instances().await;
    let instance = InstanceId::from("tab-1");

    for value in [false, true, false] {
        let set = state
            .fabric
            .deliver(&instance, AgentRequest::SetEnabled { enabled: value })
            .await
            .unwrap();
        assert_eq!(set.enabled(), Some(value));

        let got = state
            .fabric
            .deliver(&instance, AgentRequest::GetStatus)
            .await
            .unwrap();
        assert_eq!(got.enabled(), Some(value));
    }
}

/// With the canonical flag stored as `false` and a dialog already up when the
/// agent arrives, only the startup pass may act on the default value; once
/// the agent adopts `false` no further dismissal happens.
#[tokio::test(start_paused = true)]
async fn test_startup_uses_default_for_at_most_one_cycle() {
    let host = FakeHost::new();
    let script = host.add_page("tab-1");
    let state = build_state(host);
    state.store.set_bool(ENABLED_KEY, false).await.unwrap();
    script.mutate(DIALOG_HTML);

    state.coordinator.ensure_all_instances().await;
    assert!(wait_until(|| script.clicks() == 1).await);

    let reply = state
        .fabric
        .deliver(&InstanceId::from("tab-1"), AgentRequest::GetStatus)
        .await
        .unwrap();
    assert_eq!(reply.enabled(), Some(false));

    // The dialog comes back; the now-disabled agent must leave it alone,
    // including across backstop sweeps.
    script.mutate(DIALOG_HTML);
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(script.clicks(), 1);
}

/// One toggle reaches every live agent within the fan-out it triggers.
#[tokio::test(start_paused = true)]
async fn test_toggle_reaches_every_live_page() {
    let host = FakeHost::new();
    host.add_page("tab-1");
    host.add_page("tab-2");
    let state = build_state(host);
    state.coordinator.ensure_all_instances().await;

    let new_value = state.coordinator.toggle_all().await.unwrap();
    assert_eq!(new_value, !DEFAULT_ENABLED);

    // toggle_all awaits its own fan-out, so the replicas are already settled.
    for id in ["tab-1", "tab-2"] {
        let reply = state
            .fabric
            .deliver(&InstanceId::from(id), AgentRequest::GetStatus)
            .await
            .unwrap();
        assert_eq!(reply.enabled(), Some(new_value));
    }
}

/// A direct store write, with no toggle call anywhere, reaches live agents
/// through the coordinator's change subscription. Writes to other keys are
/// ignored by the watch.
#[tokio::test(start_paused = true)]
async fn test_external_store_write_fans_out_to_live_agents() {
    let host = FakeHost::new();
    host.add_page("tab-1");
    let state = build_state(host);
    state.coordinator.ensure_all_instances().await;

    tokio::spawn(state.coordinator.clone().run());
    // Let the loop subscribe and run its startup ensure pass.
    tokio::time::sleep(Duration::from_millis(10)).await;

    state.store.set_bool(ENABLED_KEY, false).await.unwrap();

    let instance = InstanceId::from("tab-1");
    let mut synced = false;
    for _ in 0..200 {
        let reply = state
            .fabric
            .deliver(&instance, AgentRequest::GetStatus)
            .await
            .unwrap();
        if reply.enabled() == Some(false) {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(synced, "store write should reach the live agent");

    state.store.set_bool("sweep.paused", true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let reply = state
        .fabric
        .deliver(&instance, AgentRequest::GetStatus)
        .await
        .unwrap();
    assert_eq!(reply.enabled(), Some(false), "foreign keys must not fan out");
}

/// A page that names its own affirmative control gets that control clicked,
/// even when a looser text match is also on the page.
#[tokio::test(start_paused = true)]
async fn test_attribute_control_wins_on_live_page() {
    let host = FakeHost::new();
    let script = host.add_page("tab-1");
    let state = build_state(host);
    state.coordinator.ensure_all_instances().await;

    script.mutate(
        r#"<html><body>
          <p>Continue watching?</p>
          <button class="decoy">yes of course</button>
          <button aria-label="Yes">Yes</button>
        </body></html>"#,
    );
    assert!(wait_until(|| script.clicks() == 1).await);

    let (strategy, selector) = script.last_plan().unwrap();
    assert_eq!(strategy, "attribute");
    assert_eq!(selector, r#"button[aria-label*="Yes"]"#);
}

/// A burst of DOM churn while the dialog is up collapses into a single
/// dismissal; later sweeps find nothing left to click.
#[tokio::test(start_paused = true)]
async fn test_mutation_burst_dismisses_once() {
    let host = FakeHost::new();
    let script = host.add_page("tab-1");
    let state = build_state(host);
    state.coordinator.ensure_all_instances().await;

    script.mutate(DIALOG_HTML);
    script.mutate(DIALOG_HTML);
    assert!(wait_until(|| script.clicks() >= 1).await);

    // Let the debounce window, another poll round and a backstop sweep all
    // pass; the click count must not move again.
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(script.clicks(), 1);
}

/// A navigation wipes the in-page marker; the agent reinstalls its observer
/// and still catches the dialog on the fresh document.
#[tokio::test(start_paused = true)]
async fn test_navigation_reinstalls_observer_and_sweeps() {
    let host = FakeHost::new();
    let script = host.add_page("tab-1");
    let state = build_state(host);
    state.coordinator.ensure_all_instances().await;
    let installed = script.observes();

    script.navigate(DIALOG_HTML);
    assert!(wait_until(|| script.clicks() == 1).await);
    assert!(script.observes() > installed, "observer should be reinstalled");
}

/// Closing the page retires its agent: the route disappears from the fabric
/// without any outside help.
#[tokio::test(start_paused = true)]
async fn test_closed_page_retires_its_agent() {
    let host = FakeHost::new();
    let script = host.add_page("tab-1");
    let state = build_state(host);
    state.coordinator.ensure_all_instances().await;
    assert_eq!(state.fabric.registered_count(), 1);

    script.close();
    assert!(wait_until(|| state.fabric.registered_count() == 0).await);
}
