//! HTTP surface: the webhook receiver plus operational entry points.
//!
//! This layer stays thin: header validation and JSON shaping only, with
//! every decision delegated to the engine.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::Filter;

use calsync_core::SyncConfig;
use calsync_engine::{PollingScheduler, SyncEngine, WebhookHandler};

#[derive(Debug, Deserialize)]
struct SyncParams {
    days_back: Option<i64>,
    days_forward: Option<i64>,
}

/// Account record with credentials redacted.
#[derive(Debug, Serialize)]
struct AccountView {
    id: u32,
    name: String,
}

pub fn routes(
    config: Arc<SyncConfig>,
    engine: Arc<SyncEngine>,
    webhooks: Arc<WebhookHandler>,
    scheduler: Arc<PollingScheduler>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let webhook = warp::post()
        .and(warp::path!("webhooks" / "calendar"))
        .and(warp::header::headers_cloned())
        .and(with(webhooks))
        .and_then(handle_webhook);

    let sync = warp::post()
        .and(warp::path!("sync"))
        .and(warp::query::<SyncParams>())
        .and(with(Arc::clone(&config)))
        .and(with(scheduler))
        .and_then(handle_sync);

    let stats = warp::get()
        .and(warp::path!("stats"))
        .and(with(engine))
        .and_then(handle_stats);

    let accounts = warp::get()
        .and(warp::path!("accounts"))
        .and(with(Arc::clone(&config)))
        .and_then(handle_accounts);

    let flows = warp::get()
        .and(warp::path!("flows"))
        .and(with(config))
        .and_then(handle_flows);

    webhook.or(sync).or(stats).or(accounts).or(flows)
}

fn with<T: Clone + Send>(value: T) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

/// Push notifications: malformed or unknown-channel requests get 400 and
/// never reach the engine; everything valid is acknowledged with 200 even
/// when processing runs out of budget.
async fn handle_webhook(
    headers: warp::http::HeaderMap,
    webhooks: Arc<WebhookHandler>,
) -> Result<impl warp::Reply, Infallible> {
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    let notification = match webhooks.validate(&headers) {
        Ok(notification) => notification,
        Err(e) => {
            warn!(error = %e, "Rejected webhook notification");
            return Ok(warp::reply::with_status(
                warp::reply::json(&serde_json::json!({"error": e.to_string()})),
                StatusCode::BAD_REQUEST,
            ));
        }
    };

    let results = webhooks.handle_notification(&notification).await;
    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({"processed": results.len()})),
        StatusCode::OK,
    ))
}

async fn handle_sync(
    params: SyncParams,
    config: Arc<SyncConfig>,
    scheduler: Arc<PollingScheduler>,
) -> Result<impl warp::Reply, Infallible> {
    let days_back = params.days_back.unwrap_or(config.poll_days_back);
    let days_forward = params.days_forward.unwrap_or(config.poll_days_forward);

    if !(0..=calsync_engine::poll::MAX_WINDOW_DAYS).contains(&days_back)
        || !(0..=calsync_engine::poll::MAX_WINDOW_DAYS).contains(&days_forward)
    {
        warn!(days_back, days_forward, "Rejected sync window");
        return Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({
                "error": format!(
                    "days_back and days_forward must be between 0 and {}",
                    calsync_engine::poll::MAX_WINDOW_DAYS
                )
            })),
            StatusCode::BAD_REQUEST,
        ));
    }

    info!(days_back, days_forward, "Manual sync requested");
    let summary = scheduler.run(days_back, days_forward).await;
    Ok(warp::reply::with_status(
        warp::reply::json(&summary),
        StatusCode::OK,
    ))
}

async fn handle_stats(engine: Arc<SyncEngine>) -> Result<impl warp::Reply, Infallible> {
    Ok(warp::reply::json(&engine.stats()))
}

async fn handle_accounts(config: Arc<SyncConfig>) -> Result<impl warp::Reply, Infallible> {
    let accounts: Vec<AccountView> = config
        .accounts
        .iter()
        .map(|a| AccountView {
            id: a.id,
            name: a.name.clone(),
        })
        .collect();
    Ok(warp::reply::json(&accounts))
}

async fn handle_flows(config: Arc<SyncConfig>) -> Result<impl warp::Reply, Infallible> {
    Ok(warp::reply::json(&config.sync_flows))
}
