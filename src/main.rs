use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use auto_encore::core::config::{load_encore_config, state_dir};
use auto_encore::host::ChromeHost;
use auto_encore::store::{JsonFileStore, MemoryStore, StateStore};
use auto_encore::types::{
    ControlRequest, EnsureResponse, ErrorResponse, StatusResponse, StatusSource, ToggleResponse,
};
use auto_encore::{surface, AppState};

fn parse_port_from_args() -> Option<u16> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(v) = args.next() {
                if let Ok(p) = v.parse::<u16>() {
                    return Some(p);
                }
            }
        } else if let Some(rest) = a.strip_prefix("--port=") {
            if let Ok(p) = rest.parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

enum ClientCommand {
    Status,
    Toggle,
    Ensure,
}

fn parse_client_command() -> Option<ClientCommand> {
    for a in std::env::args() {
        match a.as_str() {
            "--status" => return Some(ClientCommand::Status),
            "--toggle" => return Some(ClientCommand::Toggle),
            "--ensure" => return Some(ClientCommand::Ensure),
            _ => {}
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let encore_config = load_encore_config();

    // Client mode: talk to a running daemon and exit.
    if let Some(command) = parse_client_command() {
        let port = parse_port_from_args().unwrap_or_else(|| encore_config.resolve_port());
        return run_client(command, port).await;
    }

    info!("🚀 Starting auto-encore daemon");

    // One daemon per machine; a second one would fight over the state file
    // and double-click every dialog.
    let _lock = match state_dir() {
        Some(dir) => Some(acquire_daemon_lock(&dir)?),
        None => {
            warn!("no home directory; skipping the single-daemon lock");
            None
        }
    };

    let store: Arc<dyn StateStore> = match encore_config.resolve_state_path() {
        Some(path) => Arc::new(JsonFileStore::load(path)),
        None => {
            warn!("no home directory; the toggle will not survive restarts");
            Arc::new(MemoryStore::new())
        }
    };

    let host = Arc::new(ChromeHost::from_config(&encore_config));
    let state = AppState::new(store, host, Arc::new(encore_config));

    // Startup ensure pass, the recurring timer and the store-change fan-out
    // all live in the coordinator loop.
    tokio::spawn(state.coordinator.clone().run());

    // Build router
    let app = Router::new()
        .route("/", get(surface::health_check))
        .route("/health", get(surface::health_check))
        .route("/status", get(surface::get_status))
        .route("/toggle", post(surface::post_toggle))
        .route("/ensure", post(surface::post_ensure))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Loopback bind: the control API never leaves the machine.
    let port = parse_port_from_args().unwrap_or_else(|| state.encore_config.resolve_port());
    let bind_addr = format!("127.0.0.1:{}", port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Is another auto-encore running? Try --port {} (or set AUTO_ENCORE_PORT).",
                bind_addr,
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("auto-encore listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    Ok(())
}

fn acquire_daemon_lock(dir: &std::path::Path) -> anyhow::Result<std::fs::File> {
    use fs2::FileExt;

    std::fs::create_dir_all(dir)?;
    let path = dir.join("daemon.lock");
    let file = std::fs::File::create(&path)?;
    if let Err(e) = file.try_lock_exclusive() {
        if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
            anyhow::bail!(
                "another auto-encore daemon holds {}; stop it first or run the client commands (--status/--toggle/--ensure)",
                path.display()
            );
        }
        return Err(e.into());
    }
    Ok(file)
}

async fn shutdown_signal(state: AppState) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
            _ = async {
                if let Some(ref mut s) = sigint {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("👋 shutting down");
    state.host.shutdown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Client mode
// ─────────────────────────────────────────────────────────────────────────────

async fn run_client(command: ClientCommand, port: u16) -> anyhow::Result<()> {
    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    match command {
        ClientCommand::Status => {
            let resp = send(client.get(format!("{}/status", base)), &base).await?;
            let status: StatusResponse = parse(resp).await?;
            let word = if status.enabled { "ON" } else { "OFF" };
            let source = match status.source {
                StatusSource::Store => "stored setting",
                StatusSource::Agent => "live page",
            };
            println!("auto-continue is {} ({})", word, source);
            if let Some(notice) = &status.notice {
                println!("note: {}", notice);
            }
            for row in &status.instances {
                let mark = match row.enabled {
                    Some(true) => "on",
                    Some(false) => "off",
                    None => "no agent",
                };
                println!("  page {}: {}", row.instance, mark);
            }
        }
        ClientCommand::Toggle => {
            let body = ControlRequest {
                from: Some("cli".to_string()),
            };
            let resp = send(client.post(format!("{}/toggle", base)).json(&body), &base).await?;
            let toggled: ToggleResponse = parse(resp).await?;
            println!(
                "auto-continue is now {}",
                if toggled.enabled { "ON" } else { "OFF" }
            );
            if let Some(notice) = &toggled.notice {
                println!("note: {}", notice);
            }
        }
        ClientCommand::Ensure => {
            let resp = send(client.post(format!("{}/ensure", base)), &base).await?;
            let ensured: EnsureResponse = parse(resp).await?;
            println!(
                "{} page(s), {} agent(s) injected, {} unreachable",
                ensured.report.instances, ensured.report.injected, ensured.report.unreachable
            );
            if !ensured.ok {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}

async fn send(builder: reqwest::RequestBuilder, base: &str) -> anyhow::Result<reqwest::Response> {
    builder.send().await.map_err(|e| {
        anyhow::anyhow!(
            "cannot reach the auto-encore daemon at {} ({}); is it running?",
            base,
            e
        )
    })
}

async fn parse<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp.json::<T>().await?)
    } else {
        let err: ErrorResponse = resp.json().await.unwrap_or_else(|_| ErrorResponse {
            error: status.to_string(),
        });
        anyhow::bail!("daemon error: {}", err.error)
    }
}
