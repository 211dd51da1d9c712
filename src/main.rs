use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use fleetmap::api;
use fleetmap::config::Config;
use fleetmap::hub::Hub;
use fleetmap::ingest::{ScheduleIngestor, VehicleIngestor};
use fleetmap::providers::feed::FeedClient;
use fleetmap::providers::gtfs::{cache, download::ArchiveDownloader};
use fleetmap::store::{ScheduleStore, VehicleStore};

#[derive(OpenApi)]
#[openapi(
    info(title = "Fleetmap API", version = "0.3.0"),
    paths(
        api::vehicles::list_vehicles,
        api::vehicles::get_vehicle,
        api::routes::list_routes,
        api::routes::get_route,
        api::routes::get_route_shape,
        api::routes::get_route_stops,
        api::stops::list_stops,
        api::stops::get_stop,
        api::stops::get_stop_schedule,
        api::stops::get_stop_lines,
        api::sync::get_sync,
        api::sync::check_sync,
        api::sync::get_schedule_stats,
        api::health::healthz,
        api::health::readyz,
        api::health::stats,
    ),
    components(schemas(
        api::ErrorResponse,
        api::vehicles::VehiclesResponse,
        api::routes::RoutesResponse,
        api::routes::ShapesResponse,
        api::routes::RouteStopsResponse,
        api::stops::StopsResponse,
        api::stops::StopScheduleResponse,
        api::stops::StopLinesResponse,
        api::sync::SyncResponse,
        api::sync::SyncCheckResponse,
        api::health::ReadyResponse,
        api::health::StatsResponse,
        api::health::VehicleStats,
        fleetmap::models::Vehicle,
        fleetmap::models::Route,
        fleetmap::models::Shape,
        fleetmap::models::ShapePoint,
        fleetmap::models::Stop,
        fleetmap::models::StopTime,
        fleetmap::models::StopLine,
        fleetmap::models::Calendar,
        fleetmap::models::CalendarDate,
        fleetmap::store::ScheduleStats,
    )),
    tags(
        (name = "vehicles", description = "Live vehicle positions"),
        (name = "routes", description = "Route and shape queries"),
        (name = "stops", description = "Stop and timetable queries"),
        (name = "sync", description = "Full schedule sync for offline clients"),
        (name = "health", description = "Service health and statistics")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetmap=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load("config.yaml").expect("Failed to load config.yaml");
    config.validate();
    let timezone = config.feed.parsed_timezone();

    info!(
        http_addr = %config.http_addr,
        poll_interval_secs = config.feed.poll_interval_secs,
        tile_zoom = config.feed.tile_zoom,
        schedule_enabled = config.schedule.enabled,
        "starting fleetmap server"
    );

    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: permissive mode enabled (all origins allowed) - do not use in production");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        info!(origins = ?config.cors_origins, "CORS: restricting to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        panic!("CORS configuration error: set 'cors_origins' or 'cors_permissive: true'");
    };

    let vehicle_store = Arc::new(VehicleStore::new(config.feed.stale_after()));
    let schedule_store = Arc::new(ScheduleStore::new());
    let hub = Arc::new(Hub::new());

    let feed = FeedClient::new(
        &config.feed.base_url,
        &config.feed.api_key,
        &config.feed.resource_id,
        timezone,
    )
    .expect("Failed to build feed client");

    let vehicle_ingestor = Arc::new(VehicleIngestor::new(
        feed,
        vehicle_store.clone(),
        hub.clone(),
        config.feed.poll_interval(),
        config.feed.tile_zoom,
    ));

    let shutdown = CancellationToken::new();

    let hub_task = hub.clone();
    let hub_shutdown = shutdown.clone();
    tokio::spawn(async move { hub_task.run(hub_shutdown).await });

    let ingestor_task = vehicle_ingestor.clone();
    let ingestor_shutdown = shutdown.clone();
    tokio::spawn(async move { ingestor_task.run(ingestor_shutdown).await });

    if config.schedule.enabled {
        let cache_dir = if config.schedule.cache_dir.is_empty() {
            cache::default_cache_dir()
        } else {
            PathBuf::from(&config.schedule.cache_dir)
        };
        let downloader = ArchiveDownloader::new(&config.schedule.url, &cache_dir)
            .expect("Failed to build archive downloader");
        let schedule_ingestor = ScheduleIngestor::new(
            downloader,
            schedule_store.clone(),
            config.schedule.update_interval(),
            cache_dir,
        );
        let schedule_shutdown = shutdown.clone();
        tokio::spawn(async move { schedule_ingestor.run(schedule_shutdown).await });
    }

    let app = api::router(
        vehicle_store,
        schedule_store,
        hub,
        vehicle_ingestor,
        timezone,
    )
    .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    .layer(CompressionLayer::new())
    .layer(TraceLayer::new_for_http())
    .layer(cors_layer);

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind {}: {e}", config.http_addr));

    info!(addr = %config.http_addr, "HTTP server listening");
    info!("Swagger UI: /swagger-ui");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            server_shutdown.cancel();
        })
        .await
        .expect("HTTP server error");

    shutdown.cancel();
    info!("shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
