//! Shared test fixtures: an in-memory store implementing the full store
//! contract, plus builders for drivers, orders, and wired-up engines.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::batching::BatchingEngine;
use crate::config::{
    BatchingConfig, DispatchConfig, DriverEngineConfig, MatrixConfig, MonitoringConfig,
    OptimizerConfig, ReassignConfig,
};
use crate::dispatch::DispatchEngine;
use crate::domain::{
    Batch, BatchId, BatchStatus, Driver, DriverId, DriverState, Order, OrderId, OrderStatus,
    ReassignmentRecord, Route, ServiceClass, VehicleType,
};
use crate::drivers::DriverEngine;
use crate::error::StoreError;
use crate::eta::EtaPolicy;
use crate::events::{EventBus, FleetEvent};
use crate::matrix::MatrixCache;
use crate::monitoring::ErrorMonitor;
use crate::optimizer::{CvrpClient, Delivery, RouteOptimizer};
use crate::reassign::ReassignEngine;
use crate::routing::TableClient;
use crate::spatial::{haversine_km, GeoPoint};
use crate::store::{DriverQuery, FleetStore};
use crate::supervisor::Supervisor;

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    orders: HashMap<OrderId, Order>,
    drivers: HashMap<DriverId, Driver>,
    batches: HashMap<BatchId, Batch>,
    routes: HashMap<BatchId, Route>,
    reassignments: Vec<ReassignmentRecord>,
}

/// Store contract implementation over a mutex-guarded map set. Transaction
/// methods validate everything first and only then mutate, so a failed
/// "transaction" leaves no partial writes, matching the Postgres adapter.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn seed_order(&self, order: Order) {
        self.state.lock().await.orders.insert(order.id, order);
    }

    pub async fn seed_driver(&self, driver: Driver) {
        self.state.lock().await.drivers.insert(driver.id, driver);
    }

    pub async fn all_batches(&self) -> Vec<Batch> {
        let state = self.state.lock().await;
        let mut batches: Vec<Batch> = state.batches.values().cloned().collect();
        batches.sort_by_key(|batch| batch.created_at);
        batches
    }

    pub async fn first_order(&self) -> Order {
        let state = self.state.lock().await;
        state
            .orders
            .values()
            .next()
            .cloned()
            .expect("store has at least one order")
    }

    fn assignable(driver: &Driver) -> bool {
        matches!(
            driver.state,
            DriverState::Available | DriverState::Returning
        ) && driver.active_order.is_none()
            && driver.active_batch.is_none()
    }
}

#[async_trait]
impl FleetStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.seed_order(order.clone()).await;
        Ok(())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn pending_unassigned_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| {
                order.status == OrderStatus::Pending
                    && order.driver_id.is_none()
                    && order.batch_id.is_none()
            })
            .cloned()
            .collect();
        orders.sort_by_key(|order| order.created_at);
        orders.truncate(limit as usize);
        Ok(orders)
    }

    async fn batching_candidates(
        &self,
        class: ServiceClass,
        max_age_minutes: i64,
        min_deadline_slack_minutes: i64,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let now = Utc::now();
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| {
                order.status == OrderStatus::Pending
                    && order.driver_id.is_none()
                    && order.batch_id.is_none()
                    && order.service_class == class
                    && now - order.created_at <= Duration::minutes(max_age_minutes)
                    && order.sla_deadline - now >= Duration::minutes(min_deadline_slack_minutes)
            })
            .cloned()
            .collect();
        orders.sort_by_key(|order| order.created_at);
        orders.truncate(limit as usize);
        Ok(orders)
    }

    async fn in_flight_orders(&self) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| {
                matches!(order.status, OrderStatus::Assigned | OrderStatus::PickedUp)
            })
            .cloned()
            .collect();
        orders.sort_by_key(|order| order.sla_deadline);
        Ok(orders)
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;
        order.status = status;
        Ok(())
    }

    async fn set_order_delivery_eta(
        &self,
        id: OrderId,
        eta: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;
        order.delivery_eta = Some(eta);
        Ok(())
    }

    async fn insert_driver(&self, driver: &Driver) -> Result<(), StoreError> {
        self.seed_driver(driver.clone()).await;
        Ok(())
    }

    async fn driver(&self, id: DriverId) -> Result<Option<Driver>, StoreError> {
        Ok(self.state.lock().await.drivers.get(&id).cloned())
    }

    async fn all_drivers(&self) -> Result<Vec<Driver>, StoreError> {
        let state = self.state.lock().await;
        let mut drivers: Vec<Driver> = state.drivers.values().cloned().collect();
        drivers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(drivers)
    }

    async fn update_driver(&self, driver: &Driver) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.drivers.contains_key(&driver.id) {
            return Err(StoreError::NotFound(format!("driver {}", driver.id)));
        }
        state.drivers.insert(driver.id, driver.clone());
        Ok(())
    }

    async fn drivers_near(
        &self,
        center: GeoPoint,
        query: &DriverQuery,
    ) -> Result<Vec<Driver>, StoreError> {
        let state = self.state.lock().await;
        let mut drivers: Vec<(f64, Driver)> = state
            .drivers
            .values()
            .filter(|driver| {
                driver.active
                    && matches!(
                        driver.state,
                        DriverState::Available | DriverState::Returning
                    )
                    && query
                        .service_class
                        .map_or(true, |class| driver.serves(class))
                    && !query.exclude_vehicle_types.contains(&driver.vehicle_type)
            })
            .map(|driver| (haversine_km(driver.position, center), driver.clone()))
            .filter(|(distance, _)| *distance <= query.radius_km)
            .collect();
        drivers.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(drivers.into_iter().map(|(_, driver)| driver).collect())
    }

    async fn reset_daily_metrics(&self) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut touched = 0;
        for driver in state.drivers.values_mut() {
            driver.completed_today = 0;
            driver.consecutive_deliveries = 0;
            driver.hours_worked_today = 0.0;
            touched += 1;
        }
        Ok(touched)
    }

    async fn assign_order_tx(
        &self,
        order_id: OrderId,
        driver_id: DriverId,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get(&order_id)
            .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))?;
        if order.status != OrderStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "order {order_id} is no longer pending"
            )));
        }
        let driver = state
            .drivers
            .get(&driver_id)
            .ok_or_else(|| StoreError::NotFound(format!("driver {driver_id}")))?;
        if !Self::assignable(driver) {
            return Err(StoreError::Conflict(format!(
                "driver {driver_id} is no longer assignable"
            )));
        }

        let order = state.orders.get_mut(&order_id).expect("checked above");
        order.status = OrderStatus::Assigned;
        order.driver_id = Some(driver_id);
        let driver = state.drivers.get_mut(&driver_id).expect("checked above");
        driver.state = DriverState::Busy;
        driver.active_order = Some(order_id);
        Ok(())
    }

    async fn reassign_order_tx(&self, record: &ReassignmentRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get(&record.order_id)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", record.order_id)))?;
        if !matches!(
            order.status,
            OrderStatus::Pending | OrderStatus::Assigned | OrderStatus::PickedUp
        ) {
            return Err(StoreError::Conflict(format!(
                "order {} left the reassignable states",
                record.order_id
            )));
        }
        let new_driver = state
            .drivers
            .get(&record.to_driver)
            .ok_or_else(|| StoreError::NotFound(format!("driver {}", record.to_driver)))?;
        if !Self::assignable(new_driver) {
            return Err(StoreError::Conflict(format!(
                "driver {} is no longer assignable",
                record.to_driver
            )));
        }

        let order = state.orders.get_mut(&record.order_id).expect("checked");
        order.driver_id = Some(record.to_driver);
        order.status = OrderStatus::Assigned;
        order.reassignment_count += 1;
        order.last_reassignment_reason = Some(record.reason.clone());

        if let Some(old_id) = record.from_driver {
            if let Some(old_driver) = state.drivers.get_mut(&old_id) {
                old_driver.state = DriverState::Available;
                old_driver.active_order = None;
            }
        }
        let new_driver = state.drivers.get_mut(&record.to_driver).expect("checked");
        new_driver.state = DriverState::Busy;
        new_driver.active_order = Some(record.order_id);

        state.reassignments.push(record.clone());
        Ok(())
    }

    async fn create_batch(&self, batch: &Batch) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for order_id in &batch.order_ids {
            let order = state
                .orders
                .get(order_id)
                .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))?;
            if order.status != OrderStatus::Pending || order.batch_id.is_some() {
                return Err(StoreError::Conflict(format!(
                    "order {order_id} is no longer batchable"
                )));
            }
        }
        for order_id in &batch.order_ids {
            state.orders.get_mut(order_id).expect("checked").batch_id = Some(batch.id);
        }
        state.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn assign_batch_tx(
        &self,
        batch_id: BatchId,
        driver_id: DriverId,
        route: &Route,
        member_etas: &[(OrderId, DateTime<Utc>)],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let batch = state
            .batches
            .get(&batch_id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {batch_id}")))?;
        if batch.status != BatchStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "batch {batch_id} is no longer pending"
            )));
        }
        let driver = state
            .drivers
            .get(&driver_id)
            .ok_or_else(|| StoreError::NotFound(format!("driver {driver_id}")))?;
        if !Self::assignable(driver) {
            return Err(StoreError::Conflict(format!(
                "driver {driver_id} is no longer assignable"
            )));
        }
        for (order_id, _) in member_etas {
            let order = state
                .orders
                .get(order_id)
                .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))?;
            if order.batch_id != Some(batch_id) || order.status != OrderStatus::Pending {
                return Err(StoreError::Conflict(format!(
                    "order {order_id} left batch {batch_id} before assignment"
                )));
            }
        }

        let batch = state.batches.get_mut(&batch_id).expect("checked");
        batch.driver_id = Some(driver_id);
        batch.status = BatchStatus::Assigned;
        for (order_id, eta) in member_etas {
            let order = state.orders.get_mut(order_id).expect("checked");
            order.status = OrderStatus::Assigned;
            order.driver_id = Some(driver_id);
            order.delivery_eta = Some(*eta);
        }
        let driver = state.drivers.get_mut(&driver_id).expect("checked");
        driver.state = DriverState::Busy;
        driver.active_batch = Some(batch_id);
        state.routes.insert(batch_id, route.clone());
        Ok(())
    }

    async fn dissolve_batch(&self, batch_id: BatchId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for order in state.orders.values_mut() {
            if order.batch_id == Some(batch_id) {
                order.batch_id = None;
            }
        }
        if let Some(batch) = state.batches.get_mut(&batch_id) {
            batch.status = BatchStatus::Cancelled;
        }
        Ok(())
    }

    async fn update_batch_status(
        &self,
        batch_id: BatchId,
        status: BatchStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let batch = state
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {batch_id}")))?;
        batch.status = status;
        Ok(())
    }

    async fn batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        let state = self.state.lock().await;
        let Some(batch) = state.batches.get(&id) else {
            return Ok(None);
        };
        let mut members: Vec<&Order> = state
            .orders
            .values()
            .filter(|order| order.batch_id == Some(id))
            .collect();
        members.sort_by_key(|order| order.created_at);
        let mut batch = batch.clone();
        batch.order_ids = members.into_iter().map(|order| order.id).collect();
        Ok(Some(batch))
    }

    async fn route_for_batch(&self, batch_id: BatchId) -> Result<Option<Route>, StoreError> {
        Ok(self.state.lock().await.routes.get(&batch_id).cloned())
    }

    async fn reassignment_history(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<ReassignmentRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .reassignments
            .iter()
            .filter(|record| record.order_id == order_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Opt-in log output for debugging tests: `RUST_LOG=debug cargo test`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Base depot used across fixtures; matches `DriverEngineConfig::default`.
pub fn base() -> GeoPoint {
    GeoPoint::new(52.5200, 13.4050)
}

pub fn make_driver() -> Driver {
    Driver {
        id: Uuid::new_v4(),
        name: "driver".to_string(),
        position: base(),
        state: DriverState::Available,
        vehicle_type: VehicleType::Car,
        capacity_kg: 20.0,
        current_load_kg: 0.0,
        service_classes: vec![ServiceClass::Express, ServiceClass::Standard],
        active: true,
        rating: 4.5,
        on_time_rate: Some(0.92),
        completed_today: 3,
        target_deliveries: 12,
        consecutive_deliveries: 0,
        requires_break_after: 8,
        hours_worked_today: 4.0,
        max_hours_per_day: 10.0,
        active_order: None,
        active_batch: None,
        shift_started_at: Some(Utc::now() - Duration::hours(4)),
    }
}

pub fn make_order() -> Order {
    let id = Uuid::new_v4();
    Order {
        id,
        tracking_number: format!("TRK-{}", &id.simple().to_string()[..8]),
        pickup: base(),
        pickup_address: "Alexanderplatz 1".to_string(),
        dropoff: GeoPoint::new(52.5000, 13.4200),
        dropoff_address: "Hermannplatz 4".to_string(),
        service_class: ServiceClass::Standard,
        created_at: Utc::now(),
        sla_deadline: Utc::now() + Duration::minutes(240),
        status: OrderStatus::Pending,
        driver_id: None,
        reassignment_count: 0,
        last_reassignment_reason: None,
        batch_id: None,
        weight_kg: 3.0,
        delivery_eta: None,
    }
}

pub fn make_delivery(pickup: GeoPoint, dropoff: GeoPoint) -> Delivery {
    Delivery {
        order_id: Uuid::new_v4(),
        pickup,
        dropoff,
        demand_kg: 4.0,
        deadline: Utc::now() + Duration::minutes(240),
    }
}

/// Drain everything currently buffered on an event subscription.
pub fn collect_events(rx: &mut broadcast::Receiver<FleetEvent>) -> Vec<FleetEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Wired engines
// ---------------------------------------------------------------------------

fn driver_engine(store: &Arc<MemoryStore>, bus: &EventBus) -> Arc<DriverEngine> {
    let dyn_store: Arc<dyn FleetStore> = Arc::clone(store) as Arc<dyn FleetStore>;
    Arc::new(DriverEngine::new(
        dyn_store,
        bus.clone(),
        DriverEngineConfig::default(),
        EtaPolicy::default(),
    ))
}

fn monitor(bus: &EventBus) -> Arc<ErrorMonitor> {
    Arc::new(ErrorMonitor::new(MonitoringConfig::default(), bus.clone()))
}

/// Optimizer with unreachable external services: CVRP downgrades and the
/// matrix degrades to haversine, keeping tests deterministic and offline.
pub fn offline_optimizer() -> Arc<RouteOptimizer> {
    let cvrp = CvrpClient::new("http://127.0.0.1:1", StdDuration::from_millis(200));
    let router = TableClient::new("http://127.0.0.1:1", StdDuration::from_millis(200));
    let matrix = Arc::new(MatrixCache::new(None, router, MatrixConfig::default()));
    Arc::new(RouteOptimizer::new(
        cvrp,
        matrix,
        OptimizerConfig {
            health_timeout: StdDuration::from_millis(300),
            ..OptimizerConfig::default()
        },
    ))
}

pub fn engine_fixture() -> (Arc<MemoryStore>, EventBus, Arc<DriverEngine>) {
    let store = MemoryStore::new();
    let bus = EventBus::default();
    let engine = driver_engine(&store, &bus);
    (store, bus, engine)
}

pub fn dispatch_fixture() -> (Arc<MemoryStore>, EventBus, DispatchEngine) {
    let store = MemoryStore::new();
    let bus = EventBus::default();
    let drivers = driver_engine(&store, &bus);
    let dyn_store: Arc<dyn FleetStore> = Arc::clone(&store) as Arc<dyn FleetStore>;
    let engine = DispatchEngine::new(dyn_store, drivers, bus.clone(), monitor(&bus));
    (store, bus, engine)
}

pub fn reassign_fixture() -> (Arc<MemoryStore>, EventBus, ReassignEngine) {
    let store = MemoryStore::new();
    let bus = EventBus::default();
    let drivers = driver_engine(&store, &bus);
    let dyn_store: Arc<dyn FleetStore> = Arc::clone(&store) as Arc<dyn FleetStore>;
    let engine = ReassignEngine::new(
        dyn_store,
        drivers,
        bus.clone(),
        monitor(&bus),
        ReassignConfig::default(),
    );
    (store, bus, engine)
}

pub fn batching_fixture() -> (Arc<MemoryStore>, EventBus, BatchingEngine) {
    let store = MemoryStore::new();
    let bus = EventBus::default();
    let drivers = driver_engine(&store, &bus);
    let dyn_store: Arc<dyn FleetStore> = Arc::clone(&store) as Arc<dyn FleetStore>;
    let engine = BatchingEngine::new(
        dyn_store,
        drivers,
        offline_optimizer(),
        bus.clone(),
        monitor(&bus),
        BatchingConfig::default(),
    );
    (store, bus, engine)
}

pub fn supervisor_fixture() -> (Arc<MemoryStore>, Supervisor) {
    let store = MemoryStore::new();
    let bus = EventBus::default();
    let shared_monitor = monitor(&bus);
    let drivers = driver_engine(&store, &bus);
    let dyn_store: Arc<dyn FleetStore> = Arc::clone(&store) as Arc<dyn FleetStore>;

    let dispatch = Arc::new(DispatchEngine::new(
        Arc::clone(&dyn_store),
        Arc::clone(&drivers),
        bus.clone(),
        Arc::clone(&shared_monitor),
    ));
    let reassign = Arc::new(ReassignEngine::new(
        Arc::clone(&dyn_store),
        Arc::clone(&drivers),
        bus.clone(),
        Arc::clone(&shared_monitor),
        ReassignConfig::default(),
    ));
    let batching = Arc::new(BatchingEngine::new(
        Arc::clone(&dyn_store),
        Arc::clone(&drivers),
        offline_optimizer(),
        bus.clone(),
        Arc::clone(&shared_monitor),
        BatchingConfig::default(),
    ));

    let supervisor = Supervisor::new(
        dyn_store,
        bus,
        shared_monitor,
        DispatchConfig::default(),
        dispatch,
        reassign,
        batching,
    );
    (store, supervisor)
}
