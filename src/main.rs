use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::ExposeSecret;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use nft_shopping_store::api::create_router;
use nft_shopping_store::app::{AppService, AppState, Repositories, TransactionRunner};
use nft_shopping_store::config::{AppConfig, BrokerBackend, ConsumerMode};
use nft_shopping_store::domain::{AppError, MessagePublisher, MessageSubscriber};
use nft_shopping_store::events::{EventPublisher, EventRouter, ItemHandler, ItemSubscriber};
use nft_shopping_store::infra::{
    InMemoryBroker, PgBrandRepository, PgCreationRepository, PgItemRepository, PgMessageQueue,
    PgSessionFactory, PgTradeRepository, PgUserRepository, init_metrics_handle, init_tracing,
};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);
    let metrics_handle = init_metrics_handle();

    let sessions = Arc::new(
        PgSessionFactory::connect(config.database_url.expose_secret(), &config.database)
            .await
            .context("Failed to connect to PostgreSQL")?,
    );
    sessions.run_migrations().await.context("Failed to run migrations")?;
    let pool = sessions.pool().clone();

    let (broker_out, broker_in): (Arc<dyn MessagePublisher>, Arc<dyn MessageSubscriber>) =
        match config.broker {
            BrokerBackend::Postgres => {
                let queue = Arc::new(PgMessageQueue::new(pool.clone(), config.queue.clone()));
                (queue.clone(), queue)
            }
            BrokerBackend::Memory => {
                warn!("Using the in-memory broker, queued events are lost on restart");
                let broker = Arc::new(InMemoryBroker::new());
                (broker.clone(), broker)
            }
        };

    let repositories = Repositories {
        users: Arc::new(PgUserRepository::new(pool.clone())),
        brands: Arc::new(PgBrandRepository::new(pool.clone())),
        creations: Arc::new(PgCreationRepository::new(pool.clone())),
        trades: Arc::new(PgTradeRepository::new(pool.clone())),
        items: Arc::new(PgItemRepository::new(pool)),
    };
    let runner = TransactionRunner::new(sessions, config.unit_of_work.clone());
    let publisher = Arc::new(EventPublisher::new(broker_out));
    let service = Arc::new(AppService::new(runner, repositories, publisher));
    let handler = Arc::new(ItemHandler::new(Arc::clone(&service)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = match config.consumer {
        ConsumerMode::Router => {
            let mut router = EventRouter::with_default_middleware(broker_in, config.retry.clone());
            handler.register(&mut router)?;
            tokio::spawn(router.run(shutdown_rx))
        }
        ConsumerMode::Subscriber => {
            let subscriber = ItemSubscriber::new(&*broker_in, handler, shutdown_rx).await?;
            tokio::spawn(async move {
                subscriber.run().await;
                Ok::<(), AppError>(())
            })
        }
    };

    let state = Arc::new(AppState::new(service).with_metrics(metrics_handle));
    let app = create_router(state, config.server.request_timeout);

    let addr = config.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "Server starting");

    let shutdown = async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    };
    let server = async { axum::serve(listener, app).with_graceful_shutdown(shutdown).await };

    let (served, consumed) = tokio::join!(server, consumer);
    served.context("Server error")?;
    match consumed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e).context("Event consumer failed"),
        Err(e) => return Err(e).context("Event consumer panicked"),
    }

    info!("Shutdown complete");
    Ok(())
}
