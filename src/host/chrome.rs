//! CDP implementation of [`PageHost`] on chromiumoxide.
//!
//! Browser acquisition, lazy and self-healing:
//! * `browser.devtools_ws_url` configured → attach to that browser and never
//!   close it on shutdown (it belongs to the user);
//! * otherwise discover a Chromium-family executable (env override → PATH →
//!   well-known install paths) and launch one, headful by default, with a
//!   dedicated profile under `~/.auto-encore/profile` so logins survive
//!   restarts and the player page opened at startup;
//! * a dead connection is detected on the next page operation and the browser
//!   is reacquired transparently.
//!
//! The three in-page scripts here are the host half of the dismissal engine:
//! a visible-subtree serializer (what detection sees), a mutation-marker
//! installer (what wakes agents), and a click executor (how a
//! [`DismissalPlan`] lands on the live DOM).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{HostError, PageHost};
use crate::core::config::EncoreConfig;
use crate::core::types::InstanceId;
use crate::detect::{DismissalPlan, PageSnapshot};

struct BrowserHandle {
    browser: Browser,
    handler_task: JoinHandle<()>,
    /// Launched by us, so close it on shutdown. Attached browsers are left alone.
    owned: bool,
}

pub struct ChromeHost {
    target_host: String,
    executable: Option<String>,
    devtools_ws: Option<String>,
    headless: bool,
    profile_dir: Option<PathBuf>,
    inner: tokio::sync::Mutex<Option<BrowserHandle>>,
}

impl ChromeHost {
    pub fn from_config(cfg: &EncoreConfig) -> Self {
        Self {
            target_host: cfg.resolve_target_host(),
            executable: cfg.browser.resolve_executable(),
            devtools_ws: cfg.browser.resolve_devtools_ws(),
            headless: cfg.browser.resolve_headless(),
            profile_dir: crate::core::config::state_dir().map(|d| d.join("profile")),
            inner: tokio::sync::Mutex::new(None),
        }
    }

    /// All open pages, reacquiring the browser if the connection died.
    async fn pages(&self) -> Result<Vec<Page>, HostError> {
        let mut guard = self.inner.lock().await;

        let lost = match guard.as_mut() {
            Some(handle) => match handle.browser.pages().await {
                Ok(pages) => return Ok(pages),
                Err(e) => {
                    warn!("🔄 browser connection lost ({}), reacquiring", e);
                    true
                }
            },
            None => false,
        };
        if lost {
            if let Some(mut dead) = guard.take() {
                if dead.owned {
                    let _ = dead.browser.close().await;
                }
                dead.handler_task.abort();
            }
        }

        let handle = self.acquire_browser().await?;
        let pages = handle
            .browser
            .pages()
            .await
            .map_err(|e| HostError::Unavailable(e.to_string()))?;
        *guard = Some(handle);
        Ok(pages)
    }

    async fn acquire_browser(&self) -> Result<BrowserHandle, HostError> {
        if let Some(ws) = &self.devtools_ws {
            info!("🔌 attaching to browser at {}", ws);
            let (browser, mut handler) = Browser::connect(ws.clone())
                .await
                .map_err(|e| HostError::Unavailable(format!("connect to {}: {}", ws, e)))?;
            let handler_task = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        debug!("CDP handler: {}", e);
                    }
                }
            });
            return Ok(BrowserHandle {
                browser,
                handler_task,
                owned: false,
            });
        }

        let exe = self
            .executable
            .clone()
            .or_else(find_chrome_executable)
            .ok_or_else(|| {
                HostError::Unavailable(
                    "no Chromium-family browser found; install one or set CHROME_EXECUTABLE"
                        .to_string(),
                )
            })?;
        info!("🚀 launching browser ({})", exe);
        let config = build_player_config(&exe, self.headless, self.profile_dir.as_deref())
            .map_err(HostError::Unavailable)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| HostError::Unavailable(format!("launch {}: {}", exe, e)))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler: {}", e);
                }
            }
        });

        // Open the player so a freshly-launched browser has something to keep
        // alive. Attach mode skips this: the user's tabs are theirs.
        let start_url = format!("https://{}/", self.target_host);
        if let Err(e) = browser.new_page(start_url.as_str()).await {
            warn!("could not open {}: {}", start_url, e);
        }

        Ok(BrowserHandle {
            browser,
            handler_task,
            owned: true,
        })
    }

    /// Resolve an instance to its live page, verifying it still sits on the
    /// target host. A page that navigated elsewhere is gone for our purposes
    /// even though the tab still exists.
    async fn find_page(&self, instance: &InstanceId) -> Result<Page, HostError> {
        for page in self.pages().await? {
            if page_instance(&page) != *instance {
                continue;
            }
            return match page.url().await {
                Ok(Some(url)) if host_matches(&url, &self.target_host) => Ok(page),
                Ok(_) => Err(HostError::InstanceGone(instance.clone())),
                Err(e) => Err(HostError::Cdp(e.to_string())),
            };
        }
        Err(HostError::InstanceGone(instance.clone()))
    }

    /// An eval failure on a vanished page is reported as the vanishing, not as
    /// a devtools error.
    async fn after_eval_error(
        &self,
        instance: &InstanceId,
        err: chromiumoxide::error::CdpError,
    ) -> HostError {
        match self.find_page(instance).await {
            Err(gone @ HostError::InstanceGone(_)) => gone,
            _ => HostError::Cdp(err.to_string()),
        }
    }
}

#[derive(serde::Deserialize)]
struct SnapshotPayload {
    html: String,
    text: String,
}

#[async_trait]
impl PageHost for ChromeHost {
    async fn list_instances(&self) -> Result<Vec<InstanceId>, HostError> {
        let mut instances = Vec::new();
        for page in self.pages().await? {
            if let Ok(Some(url)) = page.url().await {
                if host_matches(&url, &self.target_host) {
                    instances.push(page_instance(&page));
                }
            }
        }
        Ok(instances)
    }

    async fn snapshot(&self, instance: &InstanceId) -> Result<PageSnapshot, HostError> {
        let page = self.find_page(instance).await?;
        let result = match page.evaluate(SNAPSHOT_SCRIPT).await {
            Ok(r) => r,
            Err(e) => return Err(self.after_eval_error(instance, e).await),
        };
        let value = result
            .value()
            .cloned()
            .ok_or_else(|| HostError::Cdp("snapshot script returned nothing".to_string()))?;
        let payload: SnapshotPayload = serde_json::from_value(value)
            .map_err(|e| HostError::Cdp(format!("snapshot payload: {}", e)))?;
        Ok(PageSnapshot::new(payload.html, payload.text))
    }

    async fn observe(&self, instance: &InstanceId) -> Result<(), HostError> {
        let page = self.find_page(instance).await?;
        match page.evaluate(MARKER_INSTALL_SCRIPT).await {
            Ok(_) => {
                debug!("👁 mutation marker installed in {}", instance);
                Ok(())
            }
            Err(e) => Err(self.after_eval_error(instance, e).await),
        }
    }

    async fn mutation_marker(&self, instance: &InstanceId) -> Result<Option<u64>, HostError> {
        let page = self.find_page(instance).await?;
        match page.evaluate(MARKER_READ_SCRIPT).await {
            Ok(result) => Ok(result.value().and_then(|v| v.as_u64())),
            Err(e) => Err(self.after_eval_error(instance, e).await),
        }
    }

    async fn activate(
        &self,
        instance: &InstanceId,
        plan: &DismissalPlan,
    ) -> Result<bool, HostError> {
        let page = self.find_page(instance).await?;
        let script = build_click_script(plan);
        match page.evaluate(script).await {
            Ok(result) => Ok(result.value().and_then(|v| v.as_bool()).unwrap_or(false)),
            Err(e) => Err(self.after_eval_error(instance, e).await),
        }
    }

    /// Gracefully close an owned browser. Attached browsers only lose their
    /// handler task.
    async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut handle) = guard.take() {
            if handle.owned {
                let _ = handle.browser.close().await;
                info!("🛑 browser closed");
            }
            handle.handler_task.abort();
        }
    }
}

fn page_instance(page: &Page) -> InstanceId {
    InstanceId::new(AsRef::<str>::as_ref(page.target_id()))
}

fn host_matches(url: &str, target_host: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == target_host))
        .unwrap_or(false)
}

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan, covering package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var(crate::core::config::ENV_CHROME_EXECUTABLE) {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
            "brave",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/brave-browser",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

/// Launch config for a browser that has to *play media*: headful by default,
/// audio unmuted, autoplay allowed, persistent profile.
fn build_player_config(
    exe: &str,
    headless: bool,
    profile_dir: Option<&Path>,
) -> Result<BrowserConfig, String> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .window_size(1280, 900)
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-session-crashed-bubble")
        .arg("--disable-infobars")
        .arg("--disable-crash-reporter")
        .arg("--disable-blink-features=AutomationControlled")
        // The whole point is unattended playback.
        .arg("--autoplay-policy=no-user-gesture-required");

    // The builder defaults to headless; playback normally wants a window.
    if !headless {
        builder = builder.with_head();
    }

    if let Some(dir) = profile_dir {
        builder = builder.user_data_dir(dir.to_path_buf());
    }

    builder.build()
}

// ─────────────────────────────────────────────────────────────────────────────
// In-page scripts
// ─────────────────────────────────────────────────────────────────────────────

/// Serialize the visible subtree of the page.
///
/// Visibility here means "has at least one layout box" (`getClientRects()`),
/// which also covers `position: fixed` overlays, the usual home of pause
/// dialogs. Scripts, styles and anything without a box are pruned before
/// serialization, so the Rust side can treat presence as visibility.
const SNAPSHOT_SCRIPT: &str = r#"
(function autoEncoreSnapshot() {
    'use strict';

    var SKIP = { SCRIPT: 1, STYLE: 1, NOSCRIPT: 1, TEMPLATE: 1, LINK: 1, META: 1 };

    function hasLayoutBox(el) {
        return el.getClientRects().length > 0;
    }

    function cloneVisible(node) {
        if (node.nodeType === 3) { // text
            return node.cloneNode(false);
        }
        if (node.nodeType !== 1) { // not an element
            return null;
        }
        if (SKIP[node.tagName]) return null;
        if (!hasLayoutBox(node)) return null;

        var copy = node.cloneNode(false);
        for (var child = node.firstChild; child; child = child.nextSibling) {
            var kept = cloneVisible(child);
            if (kept) copy.appendChild(kept);
        }
        return copy;
    }

    if (!document.body) {
        return { html: '', text: '' };
    }

    var holder = document.createElement('div');
    var bodyCopy = cloneVisible(document.body);
    if (bodyCopy) holder.appendChild(bodyCopy);

    return {
        html: holder.innerHTML,
        text: document.body.innerText || document.body.textContent || ''
    };
})();
"#;

/// Install a counter that ticks on every DOM change of interest. Idempotent:
/// re-running while the observer is alive just returns the current count.
const MARKER_INSTALL_SCRIPT: &str = r#"
(function autoEncoreObserve() {
    'use strict';

    if (window.__autoEncoreObserver) {
        return window.__autoEncoreMutations;
    }
    if (!document.body) {
        return null;
    }

    window.__autoEncoreMutations = 0;
    var observer = new MutationObserver(function () {
        window.__autoEncoreMutations = (window.__autoEncoreMutations || 0) + 1;
    });
    observer.observe(document.body, {
        childList: true,
        subtree: true,
        attributes: true,
        attributeFilter: ['style', 'class']
    });
    window.__autoEncoreObserver = observer;
    console.debug('[auto-encore] mutation marker installed');
    return 0;
})();
"#;

const MARKER_READ_SCRIPT: &str =
    "window.__autoEncoreMutations === undefined ? null : window.__autoEncoreMutations";

/// Click executor, invoked with a serialized plan. Re-applies the plan's
/// selection (scope → selector → needle) against the live DOM with a fresh
/// layout-box check; a dialog that vanished since planning yields `false`.
const CLICK_FN: &str = r#"
(function autoEncoreDismiss(plan) {
    'use strict';

    function hasLayoutBox(el) {
        return el.getClientRects().length > 0;
    }

    try {
        var roots = [];
        if (plan.scope) {
            var containers = document.querySelectorAll(plan.scope);
            for (var i = 0; i < containers.length; i++) {
                if (hasLayoutBox(containers[i])) roots.push(containers[i]);
            }
        } else {
            roots.push(document);
        }

        for (var r = 0; r < roots.length; r++) {
            var candidates = roots[r].querySelectorAll(plan.selector);
            for (var j = 0; j < candidates.length; j++) {
                var el = candidates[j];
                if (!hasLayoutBox(el)) continue;
                if (plan.needle &&
                    (el.textContent || '').toLowerCase().indexOf(plan.needle) === -1) {
                    continue;
                }
                el.click();
                console.debug('[auto-encore] dismissed via ' + plan.strategy + ': ' +
                    (el.textContent || '').trim());
                return true;
            }
        }
    } catch (e) {
        return false;
    }
    return false;
})"#;

fn build_click_script(plan: &DismissalPlan) -> String {
    let args = serde_json::json!({
        "scope": plan.scope,
        "selector": plan.selector,
        "needle": plan.needle,
        "strategy": plan.strategy.to_string(),
    });
    format!("{}({})", CLICK_FN, args)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DismissalStrategy;

    #[test]
    fn test_host_matching_is_exact() {
        assert!(host_matches("https://music.youtube.com/watch?v=x", "music.youtube.com"));
        assert!(!host_matches("https://www.youtube.com/watch?v=x", "music.youtube.com"));
        assert!(!host_matches("https://music.youtube.com.evil.example/", "music.youtube.com"));
        assert!(!host_matches("not a url", "music.youtube.com"));
    }

    /// The windowed/headless switch has to stay on the builder's public
    /// surface (`with_head`); both settings must produce a usable config.
    #[test]
    fn test_player_config_builds_windowed_and_headless() {
        for headless in [false, true] {
            let config = build_player_config("/usr/bin/chromium", headless, None);
            assert!(config.is_ok(), "headless={} should build", headless);
        }
    }

    /// Selectors carry double quotes; the plan must arrive in the script as a
    /// correctly-escaped JSON literal.
    #[test]
    fn test_click_script_embeds_plan_safely() {
        let plan = DismissalPlan {
            strategy: DismissalStrategy::Attribute,
            scope: None,
            selector: r#"button[aria-label*="Yes"]"#.to_string(),
            needle: None,
            matched_text: "OK".to_string(),
        };
        let script = build_click_script(&plan);
        assert!(script.contains(r#""selector":"button[aria-label*=\"Yes\"]""#));
        assert!(script.contains(r#""scope":null"#));
        assert!(script.ends_with(')'));
    }
}
