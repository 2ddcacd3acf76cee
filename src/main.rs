use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use newsletter_dispatch::app_state::AppState;
use newsletter_dispatch::config::AppConfig;
use newsletter_dispatch::routes;
use newsletter_dispatch::services::dispatch::DispatchConfig;
use newsletter_dispatch::services::mailer::{MailApiClient, Mailer};
use newsletter_dispatch::services::rate_limit::RateLimiter;
use newsletter_dispatch::store::{JobRegistry, QueueStore, RecipientDirectory, RowStoreClient};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing newsletter-dispatch server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "newsletter_sends_total",
        "Newsletter emails accepted by the mail provider"
    );
    metrics::describe_counter!(
        "newsletter_sends_failed",
        "Newsletter emails rejected by the mail provider"
    );
    metrics::describe_counter!(
        "newsletter_dispatch_cycles_total",
        "Dispatch cycles started"
    );
    metrics::describe_histogram!(
        "newsletter_dispatch_cycle_seconds",
        "Wall-clock duration of one dispatch cycle"
    );
    metrics::describe_gauge!(
        "newsletter_queue_remaining",
        "Pending queue rows after the most recent cycle"
    );

    // Row store client, shared by the job registry, queue, and directory
    let store = Arc::new(RowStoreClient::new(
        &config.store_url(),
        &config.store_api_key,
        config.store_write_batch_size,
        Duration::from_millis(config.store_request_delay_ms),
    ));
    let jobs: Arc<dyn JobRegistry> = store.clone();
    let queue: Arc<dyn QueueStore> = store.clone();
    let directory: Arc<dyn RecipientDirectory> = store;

    // Mail provider client
    let mailer: Arc<dyn Mailer> = Arc::new(MailApiClient::new(
        &config.mail_base_url,
        &config.mail_api_key,
        &config.sender_name,
        &config.sender_email,
    ));

    // Attempt limiter; runs without one when Redis is not configured
    let limiter = match &config.redis_url {
        Some(url) => Some(
            RateLimiter::new(
                url,
                config.rate_limit_max_attempts,
                Duration::from_secs(config.rate_limit_window_secs),
            )
            .expect("Failed to initialize attempt limiter"),
        ),
        None => {
            tracing::warn!("REDIS_URL not set, attempt limiter disabled");
            None
        }
    };

    // Create shared application state
    let dispatch = DispatchConfig::from_config(&config);
    let state = AppState::new(jobs, queue, directory, mailer, dispatch, limiter);

    // Build API routes; the Prometheus scrape route carries its own state
    let app = routes::router(state).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );

    tracing::info!("Starting newsletter-dispatch on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
