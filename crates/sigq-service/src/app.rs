//! Application wiring.
//!
//! Builds every component once at startup from [`AppConfig`] and the
//! external collaborators, and owns the promotion loop lifecycle.

use sigq_core::{Clock, SystemClock};
use sigq_offset::{ConnectorFactory, RiskOffsetPlanner};
use sigq_queue::{
    EntryConfigSource, ExecutionPool, FixedSlotPool, PositionCreator, PositionSource,
    PriceSource, PromotionLoop, QueueManager, QueuePorts, RiskConfigSource,
};
use sigq_store::{InMemorySignalStore, SignalStore};
use sigq_telemetry::Metrics;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::error::AppResult;

/// External systems the service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub positions: Arc<dyn PositionSource>,
    pub risk: Arc<dyn RiskConfigSource>,
    pub entries: Arc<dyn EntryConfigSource>,
    pub creator: Arc<dyn PositionCreator>,
    pub prices: Arc<dyn PriceSource>,
    pub connectors: Arc<dyn ConnectorFactory>,
    /// External execution pool. A [`FixedSlotPool`] sized from config is
    /// used when absent.
    pub pool: Option<Arc<dyn ExecutionPool>>,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    metrics: Metrics,
    store: Arc<dyn SignalStore>,
    manager: Arc<QueueManager>,
    promotion_loop: PromotionLoop,
    planner: RiskOffsetPlanner,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("config", &self.config)
            .field("promotion_loop", &self.promotion_loop)
            .finish_non_exhaustive()
    }
}

impl Application {
    /// Create a new application using the system clock.
    pub fn new(config: AppConfig, collaborators: Collaborators) -> AppResult<Self> {
        Self::with_clock(config, collaborators, Arc::new(SystemClock))
    }

    /// Create a new application with an explicit clock.
    pub fn with_clock(
        config: AppConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        config.validate()?;

        let metrics = Metrics::new()?;

        let store: Arc<dyn SignalStore> = match &config.store.journal_path {
            Some(path) => Arc::new(InMemorySignalStore::with_journal(path)?),
            None => Arc::new(InMemorySignalStore::new()),
        };

        let pool: Arc<dyn ExecutionPool> = match collaborators.pool {
            Some(pool) => pool,
            None => Arc::new(FixedSlotPool::new(config.pool.capacity)),
        };

        let ports = QueuePorts {
            positions: collaborators.positions,
            risk: collaborators.risk,
            entries: collaborators.entries,
            creator: collaborators.creator,
            prices: collaborators.prices,
        };

        let manager = Arc::new(QueueManager::new(
            Arc::clone(&store),
            pool,
            ports,
            clock,
            metrics.clone(),
        ));
        let promotion_loop =
            PromotionLoop::new(Arc::clone(&manager), config.scheduler.loop_settings());
        let planner = RiskOffsetPlanner::new(
            collaborators.connectors,
            config.offset.precision_defaults(),
            metrics.clone(),
        );

        info!(
            pool_capacity = config.pool.capacity,
            scheduler_enabled = config.scheduler.enabled,
            journal = ?config.store.journal_path,
            "Application initialized"
        );

        Ok(Self {
            config,
            metrics,
            store,
            manager,
            promotion_loop,
            planner,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn SignalStore> {
        &self.store
    }

    pub fn manager(&self) -> &Arc<QueueManager> {
        &self.manager
    }

    pub fn promotion_loop(&self) -> &PromotionLoop {
        &self.promotion_loop
    }

    pub fn planner(&self) -> &RiskOffsetPlanner {
        &self.planner
    }

    /// Start background tasks. Returns whether the loop was started.
    pub async fn start(&self) -> bool {
        if !self.config.scheduler.enabled {
            info!("Promotion loop disabled by configuration");
            return false;
        }
        self.promotion_loop.start().await
    }

    /// Stop background tasks and wait for them to exit.
    pub async fn stop(&self) -> bool {
        self.promotion_loop.stop().await
    }

    /// Run until `shutdown` resolves, then stop.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.start().await;
        shutdown.await;
        info!("Shutdown requested");
        self.stop().await;
    }
}
