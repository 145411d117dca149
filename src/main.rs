use std::{process, sync::Arc, time::Duration};

use catalog::{
    application::{
        catalog::CatalogService,
        error::{AppError, CatalogError},
        import::ImportService,
        index::{ProductIndex, StoreIndex},
        repos::{CatalogRepo, CatalogWriteRepo},
        resolver::FilterResolver,
    },
    cache::{
        CacheConfig, CacheRebuilder, MemoryMirror, MirrorIndex, MirrorStore, RedisMirror,
        ResultCache,
    },
    config::{self, CacheBackend},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, ApiState, RouterState},
        telemetry,
    },
};
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const STATS_TOP_ATTRIBUTES: u32 = 10;

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
        config::Command::Rebuild(_) => run_rebuild(settings).await,
        config::Command::Import(args) => run_import(settings, args).await,
        config::Command::Stats(_) => run_stats(settings).await,
    }
}

/// Shared handles built once at startup and injected everywhere.
struct ApplicationContext {
    repositories: Arc<PostgresRepositories>,
    catalog: Arc<CatalogService>,
    rebuilder: Option<Arc<CacheRebuilder>>,
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;

    if settings.server.rebuild_on_start {
        match app.rebuilder.as_ref() {
            Some(rebuilder) => match rebuilder.rebuild().await {
                Ok(report) => info!(
                    target = "catalog::serve",
                    products = report.products,
                    values = report.values,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Startup rebuild completed"
                ),
                Err(err) => warn!(
                    target = "catalog::serve",
                    error = %err,
                    "Startup rebuild failed; serving from the relational store"
                ),
            },
            None => warn!(
                target = "catalog::serve",
                "rebuild_on_start is set but no cache backend is configured"
            ),
        }
    }

    let state = RouterState {
        api: ApiState {
            catalog: app.catalog.clone(),
            expose_error_detail: settings.server.expose_error_detail,
        },
    };
    serve_http(&settings, state).await
}

async fn run_rebuild(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let rebuilder = app
        .rebuilder
        .ok_or(InfraError::Missing("a cache backend (required by `rebuild`)"))?;

    let report = rebuilder.rebuild().await?;
    info!(
        target = "catalog::rebuild",
        products = report.products,
        values = report.values,
        attributes = report.attributes,
        cleared_keys = report.cleared_keys,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Rebuild completed"
    );
    Ok(())
}

async fn run_import(settings: config::Settings, args: config::ImportArgs) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let path = args.file;

    info!(
        target = "catalog::import",
        path = %path.display(),
        "Starting import"
    );

    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(InfraError::from)?;
    let writer: Arc<dyn CatalogWriteRepo> = app.repositories.clone();
    let service = ImportService::new(writer, app.rebuilder.clone());
    let report = service.import_document(&raw, !args.skip_rebuild).await?;

    info!(
        target = "catalog::import",
        products = report.summary.products,
        parameters = report.summary.parameters,
        values = report.summary.values,
        links = report.summary.links,
        skipped = report.skipped.len(),
        rebuilt = report.rebuild.is_some(),
        "Import completed"
    );
    Ok(())
}

async fn run_stats(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let repo: Arc<dyn CatalogRepo> = app.repositories.clone();

    let stats = app.catalog.catalog_stats().await?;
    let usage = repo
        .attribute_usage(STATS_TOP_ATTRIBUTES)
        .await
        .map_err(CatalogError::from)?;
    let health = app.catalog.health().await;

    println!("products: {}", stats.total_products);
    println!(
        "price range: {} .. {}",
        stats.min_price.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
        stats.max_price.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
    );
    println!("mirror ready: {}", health.mirror_ready);
    println!("top attributes:");
    for attribute in usage {
        println!(
            "  {:<32} {:>8} products {:>6} values  ({})",
            attribute.slug, attribute.products, attribute.values, attribute.name
        );
    }
    Ok(())
}

async fn init_repositories(settings: &config::Settings) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or(InfraError::Missing("database.url"))?;

    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.acquire_timeout,
        settings.database.statement_timeout,
    )
    .await
    .map_err(InfraError::Connect)?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(InfraError::Migrate)?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

/// A Redis that cannot be reached at startup is not fatal: the catalog runs
/// on the relational store alone.
async fn init_mirror(settings: &config::Settings) -> Option<Arc<dyn MirrorStore>> {
    match &settings.cache.backend {
        CacheBackend::Redis { url } => {
            match RedisMirror::connect(url, settings.cache.operation_timeout).await {
                Ok(mirror) => Some(Arc::new(mirror)),
                Err(err) => {
                    warn!(
                        target = "catalog::bootstrap",
                        error = %err,
                        "Redis unreachable; serving from the relational store only"
                    );
                    None
                }
            }
        }
        CacheBackend::Memory => {
            info!(
                target = "catalog::bootstrap",
                "Using the in-process mirror; it starts empty until a rebuild"
            );
            Some(Arc::new(MemoryMirror::new()))
        }
        CacheBackend::Disabled => None,
    }
}

async fn build_application_context(settings: &config::Settings) -> Result<ApplicationContext, AppError> {
    let repositories = init_repositories(settings).await?;
    let mirror = init_mirror(settings).await;
    let cache_config = CacheConfig::from(&settings.cache);

    let repo: Arc<dyn CatalogRepo> = repositories.clone();
    let store_index: Arc<dyn ProductIndex> = Arc::new(StoreIndex::new(repo.clone()));
    let mirror_index = mirror.as_ref().map(|store| {
        Arc::new(MirrorIndex::new(store.clone(), cache_config.scratch_ttl)) as Arc<dyn ProductIndex>
    });
    let resolver = Arc::new(FilterResolver::new(store_index, mirror_index));
    let results = mirror
        .as_ref()
        .map(|store| ResultCache::new(store.clone(), cache_config.clone()));

    let catalog = Arc::new(CatalogService::new(
        repo.clone(),
        resolver,
        results,
        settings.catalog.clone(),
    ));
    let rebuilder =
        mirror.map(|store| Arc::new(CacheRebuilder::new(repo, store, cache_config.clone())));

    Ok(ApplicationContext {
        repositories,
        catalog,
        rebuilder,
    })
}

async fn serve_http(settings: &config::Settings, state: RouterState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "catalog::serve",
        addr = %settings.server.addr,
        "Listening"
    );

    let shutdown = Arc::new(Notify::new());
    let drain = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move { drain.notified().await })
            .await
    });

    tokio::select! {
        joined = &mut server => return server_outcome(joined),
        () = shutdown_signal() => {}
    }

    shutdown.notify_one();
    drain_with_deadline(server, settings.server.graceful_shutdown).await
}

async fn drain_with_deadline(
    mut server: tokio::task::JoinHandle<std::io::Result<()>>,
    deadline: Duration,
) -> Result<(), AppError> {
    match tokio::time::timeout(deadline, &mut server).await {
        Ok(joined) => server_outcome(joined),
        Err(_) => {
            warn!(
                target = "catalog::serve",
                deadline_secs = deadline.as_secs(),
                "Graceful shutdown deadline passed; dropping open connections"
            );
            server.abort();
            Ok(())
        }
    }
}

fn server_outcome(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::unexpected(format!("server error: {err}"))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(target = "catalog::serve", error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(target = "catalog::serve", error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(target = "catalog::serve", "Received Ctrl+C; shutting down"),
        _ = terminate => info!(target = "catalog::serve", "Received SIGTERM; shutting down"),
    }
}
