use crate::config::Config;
use crate::gateway;
use crate::protocol;
use crate::session::SessionManager;
use crate::store::{CredentialStore, DisabledCredentialStore, HttpCredentialStore};
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

const SUPERVISOR_INITIAL_BACKOFF_SECS: u64 = 1;
const SUPERVISOR_MAX_BACKOFF_SECS: u64 = 30;
const GATEWAY_DRAIN_SECONDS: u64 = 10;

/// Build the credential store the config asks for.
pub fn build_store(config: &Config) -> Arc<dyn CredentialStore> {
    if config.store.enabled {
        tracing::info!(base_url = %config.store.base_url, "Credential store enabled");
        Arc::new(HttpCredentialStore::from_config(&config.store))
    } else {
        tracing::warn!("Credential store disabled; credentials only live in the local workspace");
        Arc::new(DisabledCredentialStore)
    }
}

/// Run the session daemon until Ctrl+C: control API, session manager and
/// startup restore.
pub async fn run(config: Config) -> Result<()> {
    crate::health::mark_component_ok("daemon");

    let store = build_store(&config);
    let connector = protocol::create_connector(&config.protocol)?;
    tracing::info!(backend = connector.name(), "Protocol backend ready");
    let manager = SessionManager::new(config.sessions.clone(), store, connector);

    if config.store.enabled && config.store.restore_on_start {
        let delay = Duration::from_millis(config.store.restore_start_delay_ms);
        let stagger = Duration::from_millis(config.store.restore_stagger_ms);
        tracing::info!(?delay, ?stagger, "Startup restore scheduled");
        manager.schedule_startup_restore(delay, stagger);
    }

    let shutdown = CancellationToken::new();

    let gateway_handle = {
        let manager = Arc::clone(&manager);
        let gateway_cfg = config.gateway.clone();
        let token = shutdown.clone();
        spawn_component_supervisor("gateway", token.clone(), move || {
            let manager = Arc::clone(&manager);
            let cfg = gateway_cfg.clone();
            let token = token.clone();
            async move { gateway::run_gateway(manager, &cfg, token.cancelled_owned()).await }
        })
    };

    println!("wa-sessiond started");
    println!(
        "   Control API: http://{}:{}",
        config.gateway.host, config.gateway.port
    );
    println!("   Workspace:   {}", config.sessions.workspace_dir.display());
    println!("   Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    crate::health::mark_component_error("daemon", "shutdown requested");

    shutdown.cancel();
    manager.shutdown();

    if tokio::time::timeout(Duration::from_secs(GATEWAY_DRAIN_SECONDS), gateway_handle)
        .await
        .is_err()
    {
        tracing::warn!("Control API did not drain within {GATEWAY_DRAIN_SECONDS}s");
    }
    Ok(())
}

/// Keep `run_component` running, restarting it with exponential backoff
/// until `shutdown` is cancelled.
fn spawn_component_supervisor<F, Fut>(
    name: &'static str,
    shutdown: CancellationToken,
    mut run_component: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut backoff = SUPERVISOR_INITIAL_BACKOFF_SECS;

        loop {
            crate::health::mark_component_ok(name);
            let result = run_component().await;
            if shutdown.is_cancelled() {
                tracing::info!("Daemon component '{name}' stopped");
                return;
            }
            match result {
                Ok(()) => {
                    crate::health::mark_component_error(name, "component exited unexpectedly");
                    tracing::warn!("Daemon component '{name}' exited unexpectedly");
                }
                Err(e) => {
                    crate::health::mark_component_error(name, &e);
                    tracing::error!("Daemon component '{name}' failed: {e:#}");
                }
            }

            crate::health::bump_component_restart(name);
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(Duration::from_secs(backoff)) => {}
            }
            backoff = backoff.saturating_mul(2).min(SUPERVISOR_MAX_BACKOFF_SECS);
        }
    })
}
