use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod model;
mod models;
mod routes;
mod sync;
mod utils;

use config::Config;
use db::{init_db, run_migrations};

use crate::api::attendance::PoolSink;
use crate::docs::ApiDoc;
use crate::sync::offline_queue::{OfflineQueue, spawn_flusher};
use crate::sync::realtime::{Realtime, spawn_cache_invalidator};
use crate::utils::query_cache::QueryCache;
use crate::utils::roll_filter;
use tracing::{info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "HostelTrack is running"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(config.log_level)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!(addr = %config.server_addr, "Server starting...");

    let pool = init_db(&config).await?;
    if config.run_migrations {
        run_migrations(&pool).await?;
        info!("Database migrations applied");
    }

    let pool_for_filter_warmup = pool.clone();
    actix_web::rt::spawn(async move {
        if let Err(e) = roll_filter::warmup_roll_filter(&pool_for_filter_warmup, 100).await {
            warn!(error = %e, "Failed to warm up roll number filter");
        }
    });

    let cache = QueryCache::new(
        config.cache_max_entries,
        Duration::from_secs(config.cache_ttl_secs),
    );
    let realtime = Realtime::new(config.realtime_capacity);
    let queue = Arc::new(OfflineQueue::load(&config.offline_queue_path).await);

    spawn_cache_invalidator(&realtime, cache.clone());
    spawn_flusher(
        queue.clone(),
        PoolSink {
            pool: pool.clone(),
            realtime: realtime.clone(),
        },
        Duration::from_secs(config.sync_interval_secs.max(1)),
    );

    let server_addr = config.server_addr.clone();
    let queue_data = Data::from(queue);

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .app_data(Data::new(cache.clone()))
            .app_data(Data::new(realtime.clone()))
            .app_data(queue_data.clone())
            .service(index)
            // Configure auth + protected routes with rate limiting
            .configure(|cfg| routes::configure(cfg, config.clone()))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}
