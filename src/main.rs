use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use calsync_core::SyncConfig;
use calsync_engine::{AccountManager, PollingScheduler, SyncEngine, WebhookHandler};

mod server;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Arc::new(SyncConfig::from_env().context("Failed to load configuration")?);
    info!(
        accounts = config.accounts.len(),
        sync_flows = config.sync_flows.len(),
        "CalSync starting"
    );

    let accounts = Arc::new(AccountManager::new(Arc::clone(&config)));
    let engine = Arc::new(SyncEngine::new(Arc::clone(&config), Arc::clone(&accounts)));
    let webhooks = Arc::new(WebhookHandler::new(
        Arc::clone(&engine),
        Arc::clone(&accounts),
    ));
    let scheduler = Arc::new(PollingScheduler::new(Arc::clone(&engine)));

    // Watch each distinct source calendar when a public callback URL is
    // configured; without one, polling alone keeps targets consistent.
    if let Some(callback_url) = &config.callback_url {
        for (account_id, calendar_id) in config.source_calendars() {
            match webhooks
                .subscribe(account_id, &calendar_id, callback_url)
                .await
            {
                Ok(sub) => {
                    info!(channel_id = %sub.channel_id, %calendar_id, "Watching calendar");
                }
                Err(e) => {
                    warn!(
                        account_id,
                        %calendar_id,
                        error = %e,
                        "Subscription failed; polling will cover this calendar"
                    );
                }
            }
        }
    } else {
        info!("No WEBHOOK_CALLBACK_URL configured; relying on polling only");
    }

    let shutdown = CancellationToken::new();
    let daily = scheduler.spawn_daily(
        config.daily_sync_hour,
        config.poll_days_back,
        config.poll_days_forward,
        shutdown.clone(),
    );

    // Initial sweep so a fresh start converges without waiting for the
    // daily trigger.
    scheduler
        .run(config.poll_days_back, config.poll_days_forward)
        .await;

    let addr: std::net::SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid BIND_ADDR: {}", config.bind_addr))?;
    let routes = server::routes(
        Arc::clone(&config),
        Arc::clone(&engine),
        Arc::clone(&webhooks),
        Arc::clone(&scheduler),
    );

    let (bound, serving) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, {
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    })?;
    info!(addr = %bound, "HTTP server listening");
    let server_task = tokio::spawn(serving);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install signal handler")?;
    info!("Shutdown signal received");
    shutdown.cancel();

    // Stop push channels so the provider does not keep delivering to a
    // dead endpoint.
    for sub in webhooks.channels() {
        if let Err(e) = webhooks.unsubscribe(&sub.channel_id).await {
            warn!(channel_id = %sub.channel_id, error = %e, "Failed to stop channel");
        }
    }

    let _ = server_task.await;
    let _ = daily.await;
    info!("CalSync stopped");
    Ok(())
}
