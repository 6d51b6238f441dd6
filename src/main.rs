use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use tokio::{sync::watch, time::sleep};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ticket_notifications::{
    api::run_api_server,
    clients::{
        circuit_breaker::CircuitBreaker,
        email::{EmailTransport, HttpEmailTransport},
        health::HealthChecker,
        postgres::PostgresRecordStore,
        queue::{MessageQueue, QueueSet},
        rbmq::RabbitMqClient,
        store::RecordStore,
    },
    config::Config,
    models::message::QueueKind,
    repository::NotificationRepository,
    services::{
        handlers::DeliveryHandler,
        orchestrator::NotificationOrchestrator,
        processor::QueueProcessor,
    },
};

const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Error> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::load()?;
    info!("Configuration loaded");

    let rabbitmq = RabbitMqClient::connect(&config.rabbitmq_url).await?;
    let queues = QueueSet::new(
        Arc::new(rabbitmq.queue(&config.events_queue_name).await?),
        Arc::new(rabbitmq.queue(&config.reservations_queue_name).await?),
        Arc::new(rabbitmq.queue(&config.reminders_queue_name).await?),
    );

    let postgres = PostgresRecordStore::connect(&config.database_url).await?;
    if config.store_auto_migrate {
        postgres.ensure_collections().await?;
    }
    let store: Arc<dyn RecordStore> = Arc::new(postgres);

    let mut transport = HttpEmailTransport::from_config(&config)?;
    if let Some(redis_url) = &config.redis_url {
        let breaker =
            CircuitBreaker::connect(redis_url, "email", config.circuit_breaker_config()).await?;
        transport = transport.with_circuit_breaker(breaker);
    } else {
        warn!("REDIS_URL not set, email transport runs without a circuit breaker");
    }
    let email: Arc<dyn EmailTransport> = Arc::new(transport);

    let orchestrator = NotificationOrchestrator::new(email.clone(), queues.clone(), &config.email_from)
        .with_bulk_concurrency(config.bulk_concurrency);
    let repository = NotificationRepository::new(store.clone());
    let handler = Arc::new(DeliveryHandler::new(orchestrator, repository));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut processor =
        QueueProcessor::new(queues.clone(), handler, config.processor_config()).with_shutdown(shutdown_rx.clone());
    if let (Some(name), Some(_)) = (&config.dead_letter_queue_name, config.dead_letter_after) {
        let dead_letter: Arc<dyn MessageQueue> = Arc::new(rabbitmq.queue(name).await?);
        processor = processor.with_dead_letter_queue(dead_letter);
    }

    let health_checker = HealthChecker::new(store, queues, email);
    let api_handle = tokio::spawn(run_api_server(
        health_checker,
        config.server_port,
        shutdown_rx.clone(),
    ));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("Notification worker started");

    run_worker(&processor, config.poll_interval(), shutdown_rx).await;

    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "Health server stopped with error"),
        Err(e) => error!(error = %e, "Health server task failed"),
        Ok(Ok(())) => {}
    }

    if !rabbitmq.is_connected() {
        warn!("RabbitMQ connection was already closed at shutdown");
    }

    info!("Notification worker stopped");
    Ok(())
}

async fn run_worker(processor: &QueueProcessor, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut error_backoff = poll_interval;

    while !*shutdown.borrow() {
        let mut had_error = false;

        for kind in QueueKind::ALL {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = processor.process_queue(kind.as_str()).await {
                had_error = true;
                error!(queue = %kind, error = %e, "Queue processing failed");
            }
        }

        let pause = if had_error {
            error_backoff = (error_backoff * 2).min(MAX_ERROR_BACKOFF);
            error_backoff
        } else {
            error_backoff = poll_interval;
            poll_interval
        };

        tokio::select! {
            _ = sleep(pause) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    sleep(pause).await;
                }
            }
        }
    }
}
