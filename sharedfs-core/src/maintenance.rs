//! Background maintenance: keep-alive refresh and stale-record cleanup.
//!
//! Two timers drive one loop. The refresh timer keeps every registered
//! volume's keep-alive record fresh; the cleanup timer sweeps expired peer
//! locks and the mount registrations they orphaned. Each pass takes the
//! driver mutex, so maintenance and driver operations never overlap.

use crate::config::Config;
use crate::driver::Driver;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct Maintenance {
    driver: Arc<Driver>,
    config: Arc<Config>,
    shutdown: broadcast::Receiver<()>,
}

impl Maintenance {
    pub fn new(
        driver: Arc<Driver>,
        config: Arc<Config>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self { driver, config, shutdown }
    }

    /// Run until the shutdown signal fires. A failing pass is logged by the
    /// driver and never ends the loop.
    pub async fn run(mut self) {
        // First fire one full period out, not immediately: the driver
        // refreshed the locks it registered during startup.
        let mut lock_tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.lock_interval,
            self.config.lock_interval,
        );
        let mut cleanup_tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.cleanup_interval,
            self.config.cleanup_interval,
        );
        lock_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        cleanup_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            "maintenance loop started (refresh every {:?}, cleanup every {:?})",
            self.config.lock_interval, self.config.cleanup_interval
        );

        loop {
            tokio::select! {
                _ = lock_tick.tick() => {
                    debug!("refreshing locks");
                    self.driver.refresh_locks().await;
                }
                _ = cleanup_tick.tick() => {
                    debug!("running cleanup sweep");
                    self.driver.cleanup().await;
                }
                _ = self.shutdown.recv() => {
                    info!("maintenance loop stopping");
                    return;
                }
            }
        }
    }
}
