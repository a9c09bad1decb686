use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// EncoreConfig: file-based config loader (auto-encore.json) with env-var fallback
// ---------------------------------------------------------------------------

/// Browser sub-config (mirrors the `browser` key in auto-encore.json).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct BrowserSection {
    /// Explicit Chromium-family executable path. Falls back to `CHROME_EXECUTABLE`,
    /// then to auto-discovery.
    pub executable: Option<String>,
    /// DevTools websocket URL of an already-running browser. When set, the daemon
    /// attaches instead of launching (and never closes that browser on shutdown).
    pub devtools_ws_url: Option<String>,
    /// Launch headless. Defaults to `false`; a player page needs a real window
    /// and audio to be worth keeping alive.
    pub headless: Option<bool>,
}

impl BrowserSection {
    /// Executable: JSON field → `CHROME_EXECUTABLE` env var (existing path only) → `None`.
    pub fn resolve_executable(&self) -> Option<String> {
        if let Some(p) = &self.executable {
            if !p.trim().is_empty() {
                return Some(p.clone());
            }
        }
        let p = std::env::var(ENV_CHROME_EXECUTABLE).ok()?;
        let p = p.trim();
        if !p.is_empty() && Path::new(p).exists() {
            Some(p.to_string())
        } else {
            None
        }
    }

    /// Attach target: JSON field → `AUTO_ENCORE_DEVTOOLS_WS` env var → `None`.
    pub fn resolve_devtools_ws(&self) -> Option<String> {
        if let Some(u) = &self.devtools_ws_url {
            if !u.trim().is_empty() {
                return Some(u.clone());
            }
        }
        std::env::var(ENV_DEVTOOLS_WS).ok().filter(|v| !v.trim().is_empty())
    }

    pub fn resolve_headless(&self) -> bool {
        if let Some(b) = self.headless {
            return b;
        }
        std::env::var(ENV_HEADLESS)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }
}

/// Top-level config loaded from `auto-encore.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct EncoreConfig {
    /// Host the page-matching predicate compares against (exact equality).
    pub target_host: Option<String>,
    /// Control API port. `--port` on the command line wins over everything.
    pub port: Option<u16>,
    /// Unconditional backstop sweep cadence, seconds.
    pub sweep_interval_secs: Option<u64>,
    /// Quiet window after a page mutation before the reactive sweep fires, ms.
    pub debounce_ms: Option<u64>,
    /// Pause between spotting a dialog and clicking it, in ms. Lets the
    /// interruption UI finish mounting.
    pub dismiss_delay_ms: Option<u64>,
    /// How often each agent samples the in-page mutation counter, ms.
    pub mutation_poll_ms: Option<u64>,
    /// Coordinator re-ensure cadence, seconds (covers pages opened in between).
    pub ensure_interval_secs: Option<u64>,
    /// How long a fabric send waits for an agent reply before it counts as
    /// "no agent present", ms.
    pub reply_timeout_ms: Option<u64>,
    /// State file path. Defaults to `~/.auto-encore/state.json`.
    pub state_path: Option<String>,
    #[serde(default)]
    pub browser: BrowserSection,
}

impl EncoreConfig {
    /// Target host: JSON field → `AUTO_ENCORE_TARGET_HOST` env var → `music.youtube.com`.
    pub fn resolve_target_host(&self) -> String {
        if let Some(h) = &self.target_host {
            if !h.trim().is_empty() {
                return h.trim().to_string();
            }
        }
        std::env::var(ENV_TARGET_HOST)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "music.youtube.com".to_string())
    }

    /// Control port: JSON field → `AUTO_ENCORE_PORT` / `PORT` env vars → 7117.
    pub fn resolve_port(&self) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        for k in [ENV_PORT, "PORT"] {
            if let Ok(v) = std::env::var(k) {
                if let Ok(p) = v.trim().parse::<u16>() {
                    return p;
                }
            }
        }
        7117
    }

    pub fn resolve_sweep_interval(&self) -> Duration {
        Duration::from_secs(resolve_u64(self.sweep_interval_secs, ENV_SWEEP_INTERVAL, 5))
    }

    pub fn resolve_debounce(&self) -> Duration {
        Duration::from_millis(resolve_u64(self.debounce_ms, ENV_DEBOUNCE_MS, 100))
    }

    pub fn resolve_dismiss_delay(&self) -> Duration {
        Duration::from_millis(resolve_u64(self.dismiss_delay_ms, ENV_DISMISS_DELAY_MS, 500))
    }

    pub fn resolve_mutation_poll(&self) -> Duration {
        Duration::from_millis(resolve_u64(self.mutation_poll_ms, ENV_MUTATION_POLL_MS, 250))
    }

    pub fn resolve_ensure_interval(&self) -> Duration {
        Duration::from_secs(resolve_u64(self.ensure_interval_secs, ENV_ENSURE_INTERVAL, 60))
    }

    pub fn resolve_reply_timeout(&self) -> Duration {
        Duration::from_millis(resolve_u64(self.reply_timeout_ms, ENV_REPLY_TIMEOUT_MS, 2_000))
    }

    /// State file path: JSON field → `AUTO_ENCORE_STATE_PATH` env var →
    /// `~/.auto-encore/state.json`. `None` only when the home directory cannot
    /// be determined and nothing overrides it.
    pub fn resolve_state_path(&self) -> Option<PathBuf> {
        if let Some(p) = &self.state_path {
            if !p.trim().is_empty() {
                return Some(PathBuf::from(p));
            }
        }
        if let Ok(p) = std::env::var(ENV_STATE_PATH) {
            if !p.trim().is_empty() {
                return Some(PathBuf::from(p));
            }
        }
        Some(state_dir()?.join("state.json"))
    }
}

fn resolve_u64(field: Option<u64>, env_key: &str, default: u64) -> u64 {
    if let Some(n) = field {
        return n;
    }
    std::env::var(env_key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Load `auto-encore.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `AUTO_ENCORE_CONFIG` env var path
/// 2. `./auto-encore.json`  (process cwd)
/// 3. `../auto-encore.json` (one level up, for `cargo run` from a subdirectory)
///
/// Missing file → `EncoreConfig::default()` (silent, all env-var fallbacks apply).
/// Parse error → log a warning, return `EncoreConfig::default()`.
pub fn load_encore_config() -> EncoreConfig {
    let candidates: Vec<PathBuf> = {
        let mut v = vec![
            PathBuf::from("auto-encore.json"),
            PathBuf::from("../auto-encore.json"),
        ];
        if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
            v.insert(0, PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<EncoreConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("auto-encore.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "auto-encore.json parse error at {}: {}; using defaults",
                        path.display(),
                        e
                    );
                    return EncoreConfig::default();
                }
            },
            Err(_) => continue, // file not found at this path, try next
        }
    }

    EncoreConfig::default()
}

/// Per-user data directory (`~/.auto-encore`), shared by the state file and the
/// daemon lock.
pub fn state_dir() -> Option<PathBuf> {
    Some(dirs::home_dir()?.join(".auto-encore"))
}

// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "AUTO_ENCORE_CONFIG";
pub const ENV_TARGET_HOST: &str = "AUTO_ENCORE_TARGET_HOST";
pub const ENV_PORT: &str = "AUTO_ENCORE_PORT";
pub const ENV_STATE_PATH: &str = "AUTO_ENCORE_STATE_PATH";
pub const ENV_SWEEP_INTERVAL: &str = "AUTO_ENCORE_SWEEP_INTERVAL_SECS";
pub const ENV_DEBOUNCE_MS: &str = "AUTO_ENCORE_DEBOUNCE_MS";
pub const ENV_DISMISS_DELAY_MS: &str = "AUTO_ENCORE_DISMISS_DELAY_MS";
pub const ENV_MUTATION_POLL_MS: &str = "AUTO_ENCORE_MUTATION_POLL_MS";
pub const ENV_ENSURE_INTERVAL: &str = "AUTO_ENCORE_ENSURE_INTERVAL_SECS";
pub const ENV_REPLY_TIMEOUT_MS: &str = "AUTO_ENCORE_REPLY_TIMEOUT_MS";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";
pub const ENV_DEVTOOLS_WS: &str = "AUTO_ENCORE_DEVTOOLS_WS";
pub const ENV_HEADLESS: &str = "AUTO_ENCORE_HEADLESS";
