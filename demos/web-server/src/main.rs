//! Demo web server driving a smart-account session from the browser.
//!
//! Run with:
//!   AUTHWEB3_CLIENT_ID=... BICONOMY_PAYMASTER=... AA_DEV_PRIVATE_KEY=0x... \
//!   cargo run -p aa-session-web-demo
//!
//! Then open http://localhost:3000 in your browser.
//!
//! `AA_CONFIG` may point to a TOML network file instead of the environment.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use aa_session::{OrchestratorConfig, RetryPolicy, SessionOrchestrator};
use aa_session_account::BundlerAccountResolver;
use aa_session_core::{IdentityProfile, NetworkConfig};
use aa_session_identity::{IdentityProviderAdapter, LocalKeyBackend, local_key::parse_private_key};
use aa_session_transport::websocket::create_session_router;
use anyhow::Context;
use axum::{Router, response::Html, routing::get};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn load_network() -> anyhow::Result<NetworkConfig> {
    match std::env::var("AA_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading network config {path}"))?;
            Ok(NetworkConfig::from_toml_str(&raw)?)
        }
        Err(_) => Ok(NetworkConfig::from_env()?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,aa_session=debug".into()),
        )
        .init();

    let network = Arc::new(load_network()?);
    tracing::info!(
        "Network {} (chain {})",
        network.display.name,
        network.chain_id
    );

    let key = std::env::var("AA_DEV_PRIVATE_KEY")
        .context("AA_DEV_PRIVATE_KEY must hold the development signing key")?;
    let backend = LocalKeyBackend::new(
        parse_private_key(&key)?,
        IdentityProfile {
            display_name: Some("Local Developer".to_string()),
            email: None,
        },
    );
    tracing::info!("Owner key {}", backend.address());

    let orchestrator = Arc::new(
        SessionOrchestrator::new(
            IdentityProviderAdapter::new(backend),
            BundlerAccountResolver::new(),
            Arc::clone(&network),
        )
        .with_config(OrchestratorConfig {
            resolve_retry: RetryPolicy::exponential(2, Duration::from_millis(500)),
        }),
    );

    if let Err(e) = orchestrator.initialize().await {
        tracing::error!("Session initialization failed, serving error state: {e}");
    }

    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_session_router(orchestrator.clone()))
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = std::env::var("AA_LISTEN")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()
        .context("AA_LISTEN must be host:port")?;
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
            }
        })
        .await?;

    orchestrator.dispose();
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Smart Account Session</title>
  <style>
    body { font-family: sans-serif; max-width: 40em; margin: 2em auto; }
    dt { font-weight: bold; }
    #error { color: #b00; }
  </style>
</head>
<body>
  <h1>Smart Account Session</h1>
  <p>
    <button id="login">Log in</button>
    <button id="refresh">Refresh</button>
    <button id="logout">Log out</button>
  </p>
  <dl>
    <dt>Status</dt><dd id="status">connecting</dd>
    <dt>Name</dt><dd id="name"></dd>
    <dt>Smart account</dt><dd id="address"></dd>
    <dt>Owner</dt><dd id="owner"></dd>
    <dt>Balance</dt><dd id="balance"></dd>
  </dl>
  <p id="error"></p>
  <script>
    const ws = new WebSocket(`ws://${location.host}/ws`);
    const show = (id, value) => { document.getElementById(id).textContent = value ?? ''; };
    const status = (s) => typeof s === 'string' ? s : `authenticated (${s.authenticated})`;

    ws.onmessage = (event) => {
      const msg = JSON.parse(event.data);
      if (msg.type === 'snapshot') {
        const s = msg.snapshot;
        show('status', status(s.status));
        show('name', s.profile && (s.profile.displayName || s.profile.email));
        show('address', s.address);
        show('owner', s.owner);
        show('balance', s.balance);
        show('error', s.lastError && `${s.lastError.step}: ${s.lastError.message}`);
      } else if (msg.type === 'busy') {
        show('error', 'Another operation is in progress');
      } else if (msg.type === 'error') {
        show('error', msg.message);
      }
    };
    ws.onclose = () => show('status', 'disconnected');

    for (const op of ['login', 'refresh', 'logout']) {
      document.getElementById(op).onclick = () => ws.send(JSON.stringify({ type: op }));
    }
  </script>
</body>
</html>
"#;
