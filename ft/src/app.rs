//! Application assembly
//!
//! Wires the store, state actor, scheduler, heartbeat monitor, recovery and
//! engine together in the order recovery requires: nothing reaches the
//! engine or the user until persisted state has been reconciled.

use std::sync::Arc;

use eyre::{Context, Result};
use sessionstore::{FileStore, KvStore};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, TimerConfig};
use crate::engine::{Engine, EngineDeps, EngineHandle};
use crate::error::TimerResult;
use crate::heartbeat::HeartbeatMonitor;
use crate::notify::{EventBus, FanoutSink, LogSink, NotificationSink};
use crate::recovery::{RecoveryCoordinator, RecoveryReport};
use crate::scheduler::{BackgroundScheduler, InProcessHost, SchedulerHandle, TaskHost};
use crate::state::{StateConfig, StateManager};

/// A running timer: engine plus the services it owns
pub struct App {
    engine: EngineHandle,
    state: StateManager,
    scheduler: SchedulerHandle,
    events: EventBus,
    recovery: RecoveryReport,
}

impl App {
    pub fn builder(store: Arc<dyn KvStore>, config: TimerConfig) -> AppBuilder {
        AppBuilder::new(store, config)
    }

    /// Open the on-disk store named by `config` and start
    ///
    /// Fails with a [`sessionstore::StoreError::Locked`] cause when another
    /// process holds the store.
    pub async fn start(config: &Config) -> Result<Self> {
        debug!(data_dir = %config.storage.data_dir, "App::start: called");
        let state_dir = config.storage.state_dir();
        let store = FileStore::open(&state_dir)
            .wrap_err_with(|| format!("Failed to open session store at {}", state_dir.display()))?;
        let app = Self::builder(Arc::new(store), config.timer.clone())
            .start()
            .await
            .wrap_err("Failed to start timer")?;
        Ok(app)
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Bus carrying every timer event
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// What the startup recovery pass did
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Stop all actors; the active session stays persisted as it is
    pub async fn shutdown(&self) -> TimerResult<()> {
        debug!("App::shutdown: called");
        self.engine.shutdown().await?;
        if let Err(e) = self.scheduler.cancel_all().await {
            warn!(error = %e, "failed to cancel background tasks");
        }
        if let Err(e) = self.scheduler.shutdown().await {
            warn!(error = %e, "scheduler did not shut down cleanly");
        }
        self.state.shutdown().await?;
        info!("Timer shut down");
        Ok(())
    }
}

/// Collects collaborators before [`AppBuilder::start`]
pub struct AppBuilder {
    store: Arc<dyn KvStore>,
    config: TimerConfig,
    clock: Arc<dyn Clock>,
    host: Option<Arc<dyn TaskHost>>,
    sink: Option<Arc<dyn NotificationSink>>,
    events: EventBus,
}

impl AppBuilder {
    fn new(store: Arc<dyn KvStore>, config: TimerConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            host: None,
            sink: None,
            events: EventBus::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the in-process task host
    pub fn with_host(mut self, host: Arc<dyn TaskHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Extra sink receiving every event, alongside the log and the bus
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The bus the app will publish on
    ///
    /// Subscribe here to also see events raised during recovery.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Recover persisted state, then start the engine
    pub async fn start(self) -> TimerResult<App> {
        debug!("AppBuilder::start: called");
        let Self {
            store,
            config,
            clock,
            host,
            sink,
            events,
        } = self;

        let mut fanout = FanoutSink::new()
            .with(Arc::new(LogSink))
            .with(Arc::new(events.clone()));
        if let Some(sink) = sink {
            fanout = fanout.with(sink);
        }
        let sink: Arc<dyn NotificationSink> = Arc::new(fanout);
        let host: Arc<dyn TaskHost> = match host {
            Some(host) => host,
            None => Arc::new(InProcessHost::new(config.min_background_interval())),
        };
        let threshold_ms = config.staleness_threshold_ms();
        let config = Arc::new(config);

        let state = StateManager::spawn(store, StateConfig::from(&*config));
        let (scheduler, scheduler_rx) = BackgroundScheduler::spawn(host, clock.clone(), state.clone());
        let heartbeat = HeartbeatMonitor::new(state.clone(), clock.clone(), threshold_ms);

        let recovery = RecoveryCoordinator::new(
            state.clone(),
            heartbeat.clone(),
            clock.clone(),
            config.clone(),
            sink.clone(),
        )
        .run()
        .await?;
        info!(outcome = %recovery.outcome, replayed = recovery.replayed, "Recovery finished");

        let degraded = match state.is_degraded().await {
            Ok(degraded) => degraded,
            Err(e) => {
                warn!(error = %e, "could not read degraded flag, assuming background scheduling works");
                false
            }
        };

        let deps = EngineDeps {
            state: state.clone(),
            scheduler: scheduler.clone(),
            heartbeat,
            clock,
            config,
            sink,
        };
        let engine = Engine::spawn(
            deps,
            scheduler_rx,
            recovery.active.clone(),
            recovery.unpersisted,
            degraded,
        );

        Ok(App {
            engine,
            state,
            scheduler,
            events,
            recovery,
        })
    }
}
