use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::providers::gtfs::{cache, download::ArchiveDownloader, ScheduleParser};
use crate::store::ScheduleStore;

type UpdateHook = Box<dyn Fn() + Send + Sync>;

/// Periodically downloads the schedule archive and swaps the parsed
/// snapshot into the store. Parsing is skipped entirely when an archive
/// with the same fingerprint has been parsed before.
pub struct ScheduleIngestor {
    downloader: ArchiveDownloader,
    store: Arc<ScheduleStore>,
    update_interval: Duration,
    parsed_cache_dir: PathBuf,
    ready: AtomicBool,
    on_update: Option<UpdateHook>,
}

impl ScheduleIngestor {
    pub fn new(
        downloader: ArchiveDownloader,
        store: Arc<ScheduleStore>,
        update_interval: Duration,
        parsed_cache_dir: PathBuf,
    ) -> Self {
        Self {
            downloader,
            store,
            update_interval,
            parsed_cache_dir,
            ready: AtomicBool::new(false),
            on_update: None,
        }
    }

    /// Invoked inline after every successful schedule swap. Blocking
    /// the ticker here is acceptable; the next update just starts late.
    pub fn set_on_update(&mut self, hook: impl Fn() + Send + Sync + 'static) {
        self.on_update = Some(Box::new(hook));
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        self.update().await;

        let mut ticker = tokio::time::interval(self.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("schedule ingestor stopping");
                    return;
                }
                _ = ticker.tick() => self.update().await,
            }
        }
    }

    /// One full update cycle. Every failure path leaves the previous
    /// snapshot serving.
    async fn update(&self) {
        info!("starting schedule update");
        let start = Instant::now();

        let archive_bytes = match self.downloader.download().await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to download schedule archive");
                return;
            }
        };
        let download_ms = start.elapsed().as_millis() as u64;

        let fp = cache::fingerprint(&archive_bytes);

        let parse_start = Instant::now();
        let snapshot = match cache::load(&self.parsed_cache_dir, &fp) {
            Ok((snapshot, path)) => {
                info!(path = %path.display(), fingerprint = %fp, "loaded parsed snapshot from cache");
                snapshot
            }
            Err(_) => {
                let parsed = tokio::task::spawn_blocking(move || {
                    ScheduleParser::parse(&archive_bytes)
                })
                .await;

                let snapshot = match parsed {
                    Ok(Ok(snapshot)) => snapshot,
                    Ok(Err(e)) => {
                        error!(error = %e, "failed to parse schedule archive");
                        return;
                    }
                    Err(e) => {
                        error!(error = %e, "schedule parse task panicked");
                        return;
                    }
                };

                match cache::save(&self.parsed_cache_dir, &fp, &snapshot) {
                    Ok(path) => info!(path = %path.display(), "saved parsed snapshot to cache"),
                    Err(e) => error!(error = %e, "failed to save parsed snapshot"),
                }
                snapshot
            }
        };
        let parse_ms = parse_start.elapsed().as_millis() as u64;

        let routes = snapshot.routes.len();
        let shapes = snapshot.shapes.len();
        let stops = snapshot.stops.len();
        let stops_with_schedules = snapshot.stop_schedules.len();
        let calendars = snapshot.calendars.len();

        self.store.update_all(snapshot).await;

        if !self.is_ready() {
            self.ready.store(true, Ordering::Release);
        }

        if let Some(hook) = &self.on_update {
            hook();
        }

        info!(
            download_duration_ms = download_ms,
            parse_duration_ms = parse_ms,
            total_duration_ms = start.elapsed().as_millis() as u64,
            routes,
            shapes,
            stops,
            stops_with_schedules,
            calendars,
            "schedule update completed"
        );
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
