use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Context;
use clubhouse_api::{app, metrics, worker, AppState, ResiliencyState};
use clubhouse_billing::{CheckoutOrchestrator, MockPaymentGateway};
use clubhouse_core::PaymentGateway;
use clubhouse_store::{
    ChannelNotifier, Config, DbClient, ExpoPushClient, PgPaymentLedger, PgRecipientDirectory, PgWaitlistStore,
    StripeGateway,
};
use clubhouse_waitlist::PromotionCoordinator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "clubhouse_api=debug,clubhouse_waitlist=debug,clubhouse_store=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Clubhouse API on port {}", config.server.port);

    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let payments: Arc<dyn PaymentGateway> = if config.payments.secret_key.is_empty() {
        tracing::warn!("No payment secret configured, using the mock gateway");
        Arc::new(MockPaymentGateway::new())
    } else {
        Arc::new(StripeGateway::new(&config.payments).context("Failed to build payment client")?)
    };

    let push = Arc::new(ExpoPushClient::new(&config.notifications).context("Failed to build push client")?);
    let notifier = Arc::new(
        ChannelNotifier::new(push.clone(), &config.notifications).context("Failed to build notifier")?,
    );

    let coordinator = Arc::new(PromotionCoordinator::new(
        Arc::new(PgWaitlistStore::new(db.pool.clone())),
        notifier,
        payments.clone(),
        config.waitlist.to_policy(),
    ));
    let billing = Arc::new(CheckoutOrchestrator::new(
        payments,
        Arc::new(PgPaymentLedger::new(db.pool.clone())),
        &config.payments.currency,
    ));

    tokio::spawn(metrics::run_event_recorder(coordinator.subscribe()));
    tokio::spawn(worker::start_offer_sweeper(
        coordinator.clone(),
        config.waitlist.sweep_interval(),
    ));

    let app_state = AppState {
        coordinator,
        billing,
        push,
        recipients: Arc::new(PgRecipientDirectory::new(db.pool.clone())),
        resiliency: Arc::new(ResiliencyState::default()),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
