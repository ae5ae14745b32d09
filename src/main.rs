use std::{process, sync::Arc};

use aside::{
    application::{
        error::AppError, management::CacheAdminService, repos::CacheEntriesRepo,
        sweeper::Sweeper, tracker::CacheTracker,
    },
    cache::{CacheConfig, CacheInterceptor, CacheStore, RedisBackend},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        memory::InMemoryCacheEntries,
        telemetry,
    },
};
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Sweep(_) => run_sweep(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let postgres = match settings.database.url.as_deref() {
        Some(url) => Some(init_postgres(url, &settings).await?),
        None => {
            info!("No database configured; keeping cache metadata in process");
            None
        }
    };
    let repo: Arc<dyn CacheEntriesRepo> = match &postgres {
        Some(postgres) => Arc::new(postgres.clone()),
        None => Arc::new(InMemoryCacheEntries::new()),
    };

    let store = init_store(&settings, &cache_config).await?;
    let tracker = if cache_config.track_metadata {
        CacheTracker::new(repo.clone())
    } else {
        warn!("Cache metadata tracking is disabled");
        CacheTracker::disabled()
    };
    let sweep_interval = cache_config.sweep_interval();
    let interceptor = Arc::new(CacheInterceptor::new(store, tracker, cache_config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = Sweeper::new(repo.clone(), sweep_interval);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx));

    let state = HttpState {
        cache: interceptor.clone(),
        admin: CacheAdminService::new(repo, interceptor),
        db: postgres,
    };
    let result = serve_http(&settings, state).await;

    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(settings.server.graceful_shutdown, sweeper_handle)
        .await
        .is_err()
    {
        warn!("Sweeper did not stop within the graceful shutdown window");
    }

    result
}

async fn run_sweep(settings: config::Settings) -> Result<(), AppError> {
    let url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;
    let postgres = init_postgres(url, &settings).await?;
    let sweeper = Sweeper::new(
        Arc::new(postgres),
        CacheConfig::from(&settings.cache).sweep_interval(),
    );

    let removed = sweeper.sweep_once().await?;
    info!(target: "aside::sweep", removed, "Sweep completed");
    Ok(())
}

async fn init_postgres(
    url: &str,
    settings: &config::Settings,
) -> Result<PostgresRepositories, AppError> {
    let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| InfraError::database("connect", err))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| InfraError::database("migrate", err))?;

    Ok(PostgresRepositories::new(pool))
}

async fn init_store(
    settings: &config::Settings,
    cache_config: &CacheConfig,
) -> Result<CacheStore, AppError> {
    match settings.redis.url.as_deref() {
        Some(url) => {
            let backend = RedisBackend::connect(url, &settings.redis.instance_prefix)
                .await
                .map_err(InfraError::from)?;
            Ok(CacheStore::new(Arc::new(backend)))
        }
        None => {
            let capacity = cache_config.memory_max_entries_non_zero();
            info!(
                capacity = capacity.get(),
                "No Redis configured; using the in-process cache store"
            );
            Ok(CacheStore::in_memory_with_capacity(capacity))
        }
    }
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.public_addr, "Listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
