use std::{net::SocketAddr, sync::Arc};

use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use storefront_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }

    // Init Redis client (construction only; connection checked in health)
    let redis_client = Arc::new(redis::Client::open(cfg.redis_url.clone())?);

    let db_arc = Arc::new(db_pool);
    let cfg = Arc::new(cfg);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = api::events::EventSender::new(event_tx);

    // Transactional email goes through the event loop, off the request path
    let notifier = api::services::notifications::HttpEmailSender::from_config(&cfg).map(|sender| {
        info!("Transactional email enabled");
        Arc::new(api::services::notifications::OrderNotifier::new(
            db_arc.clone(),
            Arc::new(sender),
        ))
    });
    if notifier.is_none() {
        info!("Transactional email disabled; order notifications will be skipped");
    }

    tokio::spawn(api::events::process_events(event_rx, notifier));

    // Payment gateway is optional; without a secret key the payment
    // endpoints answer 400 instead of the router disappearing
    let gateway = api::services::payments::PaystackGateway::from_config(&cfg).map(|gw| {
        info!("Payment gateway configured: {}", cfg.payment_base_url);
        Arc::new(gw) as Arc<dyn api::services::payments::PaymentGateway>
    });
    if gateway.is_none() {
        warn!("No payment secret key configured; payment endpoints disabled");
    }

    let auth_service = Arc::new(api::auth::AuthService::new(
        cfg.jwt_secret.clone(),
        cfg.jwt_expiration,
    ));

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        cfg.clone(),
        Arc::new(event_sender.clone()),
        redis_client.clone(),
        gateway,
    );

    // Compose shared app state
    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services,
        auth_service,
        redis: redis_client,
    };

    let app = api::build_router(app_state);

    // Bind and serve
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
