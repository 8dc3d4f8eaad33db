//! `jobpulse-watch` -- follow one server-side job from the terminal.
//!
//! Tracks the job named by `PROGRESS_ID` over the push channel (when
//! configured) and status polling, logging every visible change. Exits
//! 0 on completion, 1 on failure and 130 when interrupted (the job is
//! cancelled on the server first).
//!
//! # Environment variables
//!
//! | Variable                     | Required | Default                 | Description                          |
//! |------------------------------|----------|-------------------------|--------------------------------------|
//! | `PROGRESS_ID`                | yes      | --                      | Job to track                         |
//! | `JOBPULSE_BASE_URL`          | no       | `http://localhost:5000` | REST base URL                        |
//! | `JOBPULSE_WS_URL`            | no       | --                      | WebSocket endpoint; enables push     |
//! | `JOBPULSE_POLL_INTERVAL_MS`  | no       | `2000`                  | Wait between status polls            |
//! | `JOBPULSE_POLL_MAX_ATTEMPTS` | no       | `5`                     | Failed polls tolerated (5 to 10)     |
//! | `JOBPULSE_PUSH_ENABLED`      | no       | set iff WS URL is set   | Use the push channel                 |
//! | `JOBPULSE_POLLING_ENABLED`   | no       | `true`                  | Poll from the start                  |
//! | `JOBPULSE_STATUS_ROUTES`     | no       | three built-in aliases  | Comma-separated, `{id}` placeholder  |
//! | `JOBPULSE_OPERATION_CLASS`   | no       | `document`              | `document` or `training`             |
//! | `JOBPULSE_CSRF_TOKEN`        | no       | --                      | Sent as `X-CSRFToken` on POSTs       |

use std::sync::Arc;
use std::time::Duration;

use jobpulse_client::api::{HttpJobService, StaticTokenProvider};
use jobpulse_client::client::{PushTransport, WsPushTransport};
use jobpulse_client::config::TrackerConfig;
use jobpulse_client::reporter::ErrorReporter;
use jobpulse_client::tracker::ProgressTracker;
use jobpulse_watch::render::{progress_line, LogRenderer, Outcome};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Grace period for the background cancel request before exiting.
const CANCEL_FLUSH: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobpulse_client=info,jobpulse_watch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let progress_id = std::env::var("PROGRESS_ID").unwrap_or_else(|_| {
        tracing::error!("PROGRESS_ID environment variable is required");
        std::process::exit(1);
    });

    let config = TrackerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        progress_id = %progress_id,
        base_url = %config.base_url,
        push = config.transport.push_enabled,
        poll_interval_ms = config.transport.poll_interval.as_millis() as u64,
        "Starting jobpulse-watch",
    );

    let mut service = HttpJobService::new(config.base_url.clone())
        .with_status_routes(config.status_routes.clone());
    if let Some(token) = &config.csrf_token {
        service = service.with_auth(Arc::new(StaticTokenProvider(token.clone())));
    }

    let push = config
        .ws_url
        .clone()
        .filter(|_| config.transport.push_enabled)
        .map(|url| Arc::new(WsPushTransport::new(url)) as Arc<dyn PushTransport>);

    let reporter = Arc::new(ErrorReporter::default());
    reporter.install_panic_hook();

    let tracker = ProgressTracker::new(Arc::new(service), push, config, reporter);
    let (renderer, mut outcomes) = LogRenderer::new();

    if let Err(e) = tracker.start(&progress_id, Arc::new(renderer)) {
        tracing::error!(error = %e, "Failed to start tracking");
        std::process::exit(1);
    }

    let outcome = tokio::select! {
        outcome = outcomes.recv() => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, cancelling job");
            if let Err(e) = tracker.cancel() {
                tracing::warn!(error = %e, "Nothing to cancel");
            }
            tokio::time::sleep(CANCEL_FLUSH).await;
            Some(Outcome::Cancelled)
        }
    };

    let code = match outcome {
        Some(Outcome::Completed(job)) => {
            tracing::info!(progress_id = %job.progress_id, "{}", progress_line(&job));
            tracing::info!("Job completed");
            0
        }
        Some(Outcome::Failed(error)) => {
            tracing::error!(
                kind = error.kind().as_str(),
                action = ?error.action(),
                technical = error.technical_message(),
                "{}",
                error.user_message(),
            );
            1
        }
        Some(Outcome::Cancelled) => 130,
        None => 1,
    };

    tracker.stop();
    std::process::exit(code);
}
