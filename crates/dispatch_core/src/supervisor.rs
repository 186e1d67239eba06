//! Autonomous loop supervisor.
//!
//! Owns the three periodic engines (dispatch, SLA reassignment, smart
//! batching) as independent workers. Engines initialize in isolation:
//! one engine failing its init never stops the others, and the supervisor
//! is operational as long as at least one worker runs. `start`, `stop`,
//! and `shutdown` are idempotent; a stopping worker drains its current
//! iteration before halting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::batching::BatchingEngine;
use crate::config::DispatchConfig;
use crate::dispatch::DispatchEngine;
use crate::drivers::DriverEngine;
use crate::error::DispatchError;
use crate::events::EventBus;
use crate::eta::EtaPolicy;
use crate::matrix::MatrixCache;
use crate::monitoring::ErrorMonitor;
use crate::optimizer::{CvrpClient, RouteOptimizer};
use crate::reassign::ReassignEngine;
use crate::routing::TableClient;
use crate::store::FleetStore;
use crate::trigger::{
    AgentTriggerGate, CycleKick, TriggerPriority, TriggerReceipt, TriggerStats,
};

/// How often the dispatch worker polls the pending backlog between agent
/// kicks.
const DISPATCH_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Capacity of the agent-kick channel; kicks beyond it coalesce.
const KICK_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineHealth {
    pub initialized: bool,
    pub running: bool,
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub operational: bool,
    pub dispatch: EngineHealth,
    pub reassignment: EngineHealth,
    pub batching: EngineHealth,
    pub trigger_stats: TriggerStats,
}

#[derive(Debug, Clone, Copy)]
pub struct StartReport {
    pub operational: bool,
    pub dispatch_started: bool,
    pub reassignment_started: bool,
    pub batching_started: bool,
}

/// External service endpoints injected at assembly time.
#[derive(Debug, Clone)]
pub struct CoreEndpoints {
    pub routing_url: String,
    pub cvrp_url: String,
    /// Shared KV for the matrix cache; `None` runs the cache pass-through.
    pub redis_url: Option<String>,
}

struct EngineFlags {
    initialized: AtomicBool,
    running: Arc<AtomicBool>,
}

impl EngineFlags {
    fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn health(&self) -> EngineHealth {
        EngineHealth {
            initialized: self.initialized.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
        }
    }
}

struct SupervisorState {
    handles: Vec<JoinHandle<()>>,
}

pub struct Supervisor {
    store: Arc<dyn FleetStore>,
    bus: EventBus,
    monitor: Arc<ErrorMonitor>,
    config: DispatchConfig,
    dispatch: Arc<DispatchEngine>,
    reassign: Arc<ReassignEngine>,
    batching: Arc<BatchingEngine>,
    gate: Arc<AgentTriggerGate>,
    kick_rx: Arc<Mutex<mpsc::Receiver<CycleKick>>>,
    shutdown_tx: watch::Sender<bool>,
    dispatch_flags: EngineFlags,
    reassign_flags: EngineFlags,
    batching_flags: EngineFlags,
    state: Mutex<SupervisorState>,
}

impl Supervisor {
    /// Wire the whole core from a store handle, configuration, and the
    /// external endpoints. Everything downstream shares the one event bus
    /// and error monitor built here.
    pub async fn assemble(
        store: Arc<dyn FleetStore>,
        config: DispatchConfig,
        endpoints: CoreEndpoints,
    ) -> Self {
        let bus = EventBus::default();
        let monitor = Arc::new(ErrorMonitor::new(config.monitoring.clone(), bus.clone()));

        let router = TableClient::new(&endpoints.routing_url, config.matrix.fetch_timeout);
        let kv = match &endpoints.redis_url {
            Some(url) => MatrixCache::connect_kv(url).await,
            None => None,
        };
        let matrix = Arc::new(MatrixCache::new(kv, router, config.matrix.clone()));
        let cvrp = CvrpClient::new(&endpoints.cvrp_url, config.optimizer.solve_timeout);
        let optimizer = Arc::new(RouteOptimizer::new(
            cvrp,
            Arc::clone(&matrix),
            config.optimizer.clone(),
        ));

        let drivers = Arc::new(DriverEngine::new(
            Arc::clone(&store),
            bus.clone(),
            config.driver_engine.clone(),
            EtaPolicy::default(),
        ));
        let dispatch = Arc::new(DispatchEngine::new(
            Arc::clone(&store),
            Arc::clone(&drivers),
            bus.clone(),
            Arc::clone(&monitor),
        ));
        let reassign = Arc::new(ReassignEngine::new(
            Arc::clone(&store),
            Arc::clone(&drivers),
            bus.clone(),
            Arc::clone(&monitor),
            config.reassign.clone(),
        ));
        let batching = Arc::new(BatchingEngine::new(
            Arc::clone(&store),
            Arc::clone(&drivers),
            optimizer,
            bus.clone(),
            Arc::clone(&monitor),
            config.batching.clone(),
        ));

        Self::new(store, bus, monitor, config, dispatch, reassign, batching)
    }

    /// Assemble from pre-built engines. Used directly by tests.
    pub fn new(
        store: Arc<dyn FleetStore>,
        bus: EventBus,
        monitor: Arc<ErrorMonitor>,
        config: DispatchConfig,
        dispatch: Arc<DispatchEngine>,
        reassign: Arc<ReassignEngine>,
        batching: Arc<BatchingEngine>,
    ) -> Self {
        let (kick_tx, kick_rx) = mpsc::channel(KICK_CHANNEL_CAPACITY);
        let gate = Arc::new(AgentTriggerGate::new(config.trigger.clone(), kick_tx));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            bus,
            monitor,
            config,
            dispatch,
            reassign,
            batching,
            gate,
            kick_rx: Arc::new(Mutex::new(kick_rx)),
            shutdown_tx,
            dispatch_flags: EngineFlags::new(),
            reassign_flags: EngineFlags::new(),
            batching_flags: EngineFlags::new(),
            state: Mutex::new(SupervisorState { handles: Vec::new() }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn trigger_gate(&self) -> Arc<AgentTriggerGate> {
        Arc::clone(&self.gate)
    }

    /// Agent-facing entry point: run the cooldown gate and, when allowed,
    /// kick the dispatch worker.
    pub fn trigger_cycle(
        &self,
        agent: &str,
        reason: &str,
        context: serde_json::Value,
        priority: TriggerPriority,
    ) -> Result<TriggerReceipt, DispatchError> {
        self.gate.trigger_from_agent(agent, reason, context, priority)
    }

    /// Start every engine that passes its isolated init. Already-running
    /// engines are left alone. Operational ⇔ at least one worker runs.
    pub async fn start(&self) -> StartReport {
        let mut state = self.state.lock().await;
        // A fresh start rearms the shutdown signal.
        let _ = self.shutdown_tx.send(false);

        let dispatch_started = self.start_dispatch(&mut state).await;
        let reassignment_started = self.start_reassign(&mut state).await;
        let batching_started = self.start_batching(&mut state).await;

        let report = StartReport {
            operational: dispatch_started || reassignment_started || batching_started,
            dispatch_started,
            reassignment_started,
            batching_started,
        };
        if report.operational {
            info!(
                dispatch = dispatch_started,
                reassignment = reassignment_started,
                batching = batching_started,
                "autonomous loop started"
            );
        } else {
            error!("autonomous loop failed to start any engine");
        }
        report
    }

    /// Isolated init: each engine proves it can reach the store before its
    /// worker spawns.
    async fn engine_init(&self, name: &'static str, flags: &EngineFlags) -> bool {
        if flags.running.load(Ordering::Relaxed) {
            return true;
        }
        match self.store.ping().await {
            Ok(()) => {
                flags.initialized.store(true, Ordering::Relaxed);
                true
            }
            Err(err) => {
                warn!(engine = name, %err, "engine init failed, leaving it down");
                self.monitor
                    .track_dispatch(name, &DispatchError::Database(err));
                false
            }
        }
    }

    async fn start_dispatch(&self, state: &mut SupervisorState) -> bool {
        if self.dispatch_flags.running.load(Ordering::Relaxed) {
            return true;
        }
        if !self.engine_init("dispatch", &self.dispatch_flags).await {
            return false;
        }
        let engine = Arc::clone(&self.dispatch);
        let monitor = Arc::clone(&self.monitor);
        let running = Arc::clone(&self.dispatch_flags.running);
        let kick_rx = Arc::clone(&self.kick_rx);
        let mut shutdown = self.shutdown_tx.subscribe();
        running.store(true, Ordering::Relaxed);

        state.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DISPATCH_POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let mut kicks = kick_rx.lock().await;
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        drop(kicks);
                        if let Err(err) = engine.run_cycle().await {
                            warn!(%err, "dispatch cycle failed");
                            monitor.track_dispatch("dispatch", &err);
                        }
                    }
                    kick = kicks.recv() => {
                        drop(kicks);
                        match kick {
                            Some(kick) => {
                                info!(agent = %kick.agent, reason = %kick.reason, "agent-kicked dispatch cycle");
                                if let Err(err) = engine.run_cycle().await {
                                    warn!(%err, "dispatch cycle failed");
                                    monitor.track_dispatch("dispatch", &err);
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            running.store(false, Ordering::Relaxed);
        }));
        true
    }

    async fn start_reassign(&self, state: &mut SupervisorState) -> bool {
        if self.reassign_flags.running.load(Ordering::Relaxed) {
            return true;
        }
        if !self.engine_init("reassignment", &self.reassign_flags).await {
            return false;
        }
        let engine = Arc::clone(&self.reassign);
        let monitor = Arc::clone(&self.monitor);
        let running = Arc::clone(&self.reassign_flags.running);
        let interval = self.config.reassign.scan_interval;
        let mut shutdown = self.shutdown_tx.subscribe();
        running.store(true, Ordering::Relaxed);

        state.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = engine.run_cycle().await {
                            warn!(%err, "reassignment scan failed");
                            monitor.track_dispatch("reassignment", &err);
                        }
                    }
                }
            }
            running.store(false, Ordering::Relaxed);
        }));
        true
    }

    async fn start_batching(&self, state: &mut SupervisorState) -> bool {
        if self.batching_flags.running.load(Ordering::Relaxed) {
            return true;
        }
        if !self.engine_init("batching", &self.batching_flags).await {
            return false;
        }
        let engine = Arc::clone(&self.batching);
        let monitor = Arc::clone(&self.monitor);
        let running = Arc::clone(&self.batching_flags.running);
        let interval = self.config.batching.interval;
        let mut shutdown = self.shutdown_tx.subscribe();
        running.store(true, Ordering::Relaxed);

        state.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = engine.run_cycle().await {
                            warn!(%err, "batching cycle failed");
                            monitor.track_dispatch("batching", &err);
                        }
                    }
                }
            }
            running.store(false, Ordering::Relaxed);
        }));
        true
    }

    /// Stop every worker, draining in-progress iterations. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.handles.is_empty() {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        for handle in state.handles.drain(..) {
            if let Err(err) = handle.await {
                warn!(%err, "engine worker exited abnormally");
            }
        }
        info!("autonomous loop stopped");
    }

    /// Alias kept for operators; same semantics as [`Supervisor::stop`].
    pub async fn shutdown(&self) {
        self.stop().await;
    }

    pub fn health(&self) -> HealthSnapshot {
        let dispatch = self.dispatch_flags.health();
        let reassignment = self.reassign_flags.health();
        let batching = self.batching_flags.health();
        HealthSnapshot {
            operational: dispatch.running || reassignment.running || batching.running,
            dispatch,
            reassignment,
            batching,
            trigger_stats: self.gate.stats(),
        }
    }
}
