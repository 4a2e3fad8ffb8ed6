//! Reference binary: wires `outbox-core` to the PostgreSQL adapter and
//! exposes a small actix-web health surface so a caller can see how the
//! processor is meant to be embedded behind a service boundary.

use anyhow::{Context, Result};
use actix_web::{web, App, HttpServer};
use handlers::AppState;
use outbox_core::{Handler, HandlerGroup, HandlerMap, Processor, ProcessorOptions};
use outbox_postgres::PostgresStorage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

mod handlers;

#[tokio::main]
async fn main() -> Result<()> {
    shared::init_tracing();
    tracing::info!("starting outbox-demo");

    let config = shared::Config::from_env().context("failed to load configuration")?;

    let db_pool = shared::db::create_pool(&config.database)
        .await
        .context("failed to create database pool")?;

    outbox_postgres::check_health(&db_pool)
        .await
        .context("database health check failed")?;

    let storage = Arc::new(PostgresStorage::new(db_pool.clone()));

    let mut demo_group: HandlerGroup = HashMap::new();
    demo_group.insert(
        "log".to_string(),
        Arc::new(handlers::log_handler) as Arc<dyn Handler>,
    );
    let mut handler_map: HandlerMap = HashMap::new();
    handler_map.insert("demo.event".to_string(), demo_group);

    let options = ProcessorOptions::builder()
        .polling_interval(Duration::from_millis(config.processor.polling_interval_ms))
        .max_errors(config.processor.max_errors)
        .max_event_concurrency(config.processor.max_event_concurrency)
        .max_handler_concurrency(config.processor.max_handler_concurrency)
        .max_queued_events(config.processor.max_queued_events)
        .wakeup_timeout(Duration::from_millis(config.processor.wakeup_timeout_ms))
        .wakeup_throttle(Duration::from_millis(config.processor.wakeup_throttle_ms))
        .build();

    let processor = Arc::new(Processor::new(storage.clone(), storage.clone(), handler_map, options));
    processor.start().await;

    let app_state = Arc::new(AppState { db_pool });
    let server_host = config.server.host.clone();
    let server_port = config.server.port;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .route("/health", web::get().to(handlers::health_check))
            .route("/ready", web::get().to(handlers::readiness_check))
    })
    .bind((server_host.as_str(), server_port))
    .context("failed to bind HTTP server")?
    .run();

    let server_handle = tokio::spawn(server);

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            tracing::info!("shutdown signal received, stopping outbox-demo");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => tracing::warn!("HTTP server exited cleanly (unexpected)"),
                Ok(Err(e)) => {
                    tracing::error!("HTTP server failed: {}", e);
                    return Err(e).context("HTTP server failed");
                }
                Err(e) => {
                    tracing::error!("HTTP server task panicked: {}", e);
                    anyhow::bail!("HTTP server task panicked: {}", e);
                }
            }
        }
    }

    processor
        .stop(Processor::default_shutdown_timeout())
        .await
        .context("processor failed to drain in-flight events during shutdown")?;

    Ok(())
}
