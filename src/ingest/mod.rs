//! Background ingestion loops: the vehicle-position poller and the
//! schedule archive sync.

mod schedule;

pub use schedule::ScheduleIngestor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::hub::{tile, Hub};
use crate::models::Vehicle;
use crate::providers::feed::FeedClient;
use crate::store::VehicleStore;

/// Polls the vehicle feed, feeds the store, and forwards the resulting
/// deltas to the hub. A second, slower ticker sweeps stale vehicles.
pub struct VehicleIngestor {
    feed: FeedClient,
    store: Arc<VehicleStore>,
    hub: Arc<Hub>,
    poll_interval: Duration,
    tile_zoom: u32,
    ready: AtomicBool,
}

impl VehicleIngestor {
    pub fn new(
        feed: FeedClient,
        store: Arc<VehicleStore>,
        hub: Arc<Hub>,
        poll_interval: Duration,
        tile_zoom: u32,
    ) -> Self {
        Self {
            feed,
            store,
            hub,
            poll_interval,
            tile_zoom,
            ready: AtomicBool::new(false),
        }
    }

    /// Poll immediately, then on every tick until shutdown. Overrunning
    /// polls coalesce; only one poll runs at a time.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.poll().await;

        let mut poll_ticker = tokio::time::interval(self.poll_interval);
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll_ticker.tick().await;

        let mut prune_ticker = tokio::time::interval(self.poll_interval * 3);
        prune_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        prune_ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("vehicle ingestor stopping");
                    return;
                }
                _ = poll_ticker.tick() => self.poll().await,
                _ = prune_ticker.tick() => self.prune().await,
            }
        }
    }

    async fn poll(&self) {
        let (buses, trams) = tokio::join!(
            self.feed.fetch(crate::models::VehicleType::Bus),
            self.feed.fetch(crate::models::VehicleType::Tram),
        );

        let bus_ok = buses.is_ok();
        let tram_ok = trams.is_ok();

        let buses = buses.unwrap_or_else(|e| {
            error!(error = %e, "failed to fetch buses");
            Vec::new()
        });
        let trams = trams.unwrap_or_else(|e| {
            error!(error = %e, "failed to fetch trams");
            Vec::new()
        });

        let bus_count = buses.len();
        let tram_count = trams.len();

        let mut vehicles: Vec<Vehicle> = Vec::with_capacity(bus_count + tram_count);
        vehicles.extend(buses);
        vehicles.extend(trams);
        for v in &mut vehicles {
            v.tile_id = tile::tile_id(v.lat, v.lon, self.tile_zoom);
        }

        let deltas = self.store.update(vehicles).await;
        let delta_count = deltas.len();
        self.hub.broadcast(deltas);

        if !self.is_ready() && (bus_ok || tram_ok) {
            self.ready.store(true, Ordering::Release);
            info!(buses = bus_count, trams = tram_count, "vehicle ingestor ready");
        }

        let total = self.store.count().await;
        debug!(
            buses = bus_count,
            trams = tram_count,
            deltas = delta_count,
            total,
            "poll completed"
        );
    }

    async fn prune(&self) {
        let deltas = self.store.prune_stale().await;
        if !deltas.is_empty() {
            let count = deltas.len();
            self.hub.broadcast(deltas);
            info!(count, "pruned stale vehicles");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
