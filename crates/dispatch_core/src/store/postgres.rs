//! Postgres implementation of the store contract.
//!
//! Queries are written against the schema the platform migrations own
//! (migrations themselves are outside the core). Row mapping is manual so
//! that enum columns stay plain `text` and the domain enums remain the only
//! authority on their wire strings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::{DriverQuery, FleetStore};
use crate::domain::{
    Batch, BatchId, BatchStatus, Driver, DriverId, DriverState, Order, OrderId, OrderStatus,
    ReassignmentRecord, Route, RouteEngine, RouteStop, ServiceClass, StopKind, VehicleType,
};
use crate::error::StoreError;
use crate::spatial::GeoPoint;

/// Great-circle distance expression over driver rows, km. Parameters:
/// `$1` latitude, `$2` longitude.
const DISTANCE_KM_SQL: &str = "2 * 6371 * asin(sqrt(\
    power(sin(radians(drivers.lat - $1) / 2), 2) + \
    cos(radians($1)) * cos(radians(drivers.lat)) * \
    power(sin(radians(drivers.lng - $2) / 2), 2)))";

const ORDER_COLUMNS: &str = "id, tracking_number, pickup_lat, pickup_lng, pickup_address, \
    dropoff_lat, dropoff_lng, dropoff_address, service_class, created_at, sla_deadline, \
    status, driver_id, reassignment_count, last_reassignment_reason, batch_id, weight_kg, \
    delivery_eta";

const DRIVER_COLUMNS: &str = "id, name, lat, lng, operational_state, vehicle_type, \
    capacity_kg, current_load_kg, service_classes, active, rating, on_time_rate, \
    completed_today, target_deliveries, consecutive_deliveries, requires_break_after, \
    hours_worked_today, max_hours_per_day, active_order, active_batch, shift_started_at";

pub struct PgFleetStore {
    pool: PgPool,
}

impl PgFleetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the crate's default pool sizing. Failure here is fatal
    /// to the supervisor by design.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_enum<T>(label: &str, raw: &str, parsed: Option<T>) -> Result<T, StoreError> {
    parsed.ok_or_else(|| StoreError::Database(format!("unknown {label} value: {raw}")))
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let service_class_raw: String = row.try_get("service_class").map_err(StoreError::from)?;
    let status_raw: String = row.try_get("status").map_err(StoreError::from)?;
    Ok(Order {
        id: row.try_get("id").map_err(StoreError::from)?,
        tracking_number: row.try_get("tracking_number").map_err(StoreError::from)?,
        pickup: GeoPoint::new(
            row.try_get("pickup_lat").map_err(StoreError::from)?,
            row.try_get("pickup_lng").map_err(StoreError::from)?,
        ),
        pickup_address: row.try_get("pickup_address").map_err(StoreError::from)?,
        dropoff: GeoPoint::new(
            row.try_get("dropoff_lat").map_err(StoreError::from)?,
            row.try_get("dropoff_lng").map_err(StoreError::from)?,
        ),
        dropoff_address: row.try_get("dropoff_address").map_err(StoreError::from)?,
        service_class: parse_enum(
            "service_class",
            &service_class_raw,
            ServiceClass::parse(&service_class_raw),
        )?,
        created_at: row.try_get("created_at").map_err(StoreError::from)?,
        sla_deadline: row.try_get("sla_deadline").map_err(StoreError::from)?,
        status: parse_enum("status", &status_raw, OrderStatus::parse(&status_raw))?,
        driver_id: row.try_get("driver_id").map_err(StoreError::from)?,
        reassignment_count: row
            .try_get::<i32, _>("reassignment_count")
            .map_err(StoreError::from)?
            .max(0) as u32,
        last_reassignment_reason: row
            .try_get("last_reassignment_reason")
            .map_err(StoreError::from)?,
        batch_id: row.try_get("batch_id").map_err(StoreError::from)?,
        weight_kg: row.try_get("weight_kg").map_err(StoreError::from)?,
        delivery_eta: row.try_get("delivery_eta").map_err(StoreError::from)?,
    })
}

fn driver_from_row(row: &PgRow) -> Result<Driver, StoreError> {
    let state_raw: String = row.try_get("operational_state").map_err(StoreError::from)?;
    let vehicle_raw: String = row.try_get("vehicle_type").map_err(StoreError::from)?;
    let class_raw: Vec<String> = row.try_get("service_classes").map_err(StoreError::from)?;
    let mut service_classes = Vec::with_capacity(class_raw.len());
    for raw in &class_raw {
        service_classes.push(parse_enum(
            "service_class",
            raw,
            ServiceClass::parse(raw),
        )?);
    }
    Ok(Driver {
        id: row.try_get("id").map_err(StoreError::from)?,
        name: row.try_get("name").map_err(StoreError::from)?,
        position: GeoPoint::new(
            row.try_get("lat").map_err(StoreError::from)?,
            row.try_get("lng").map_err(StoreError::from)?,
        ),
        state: parse_enum(
            "operational_state",
            &state_raw,
            DriverState::parse(&state_raw),
        )?,
        vehicle_type: parse_enum(
            "vehicle_type",
            &vehicle_raw,
            VehicleType::parse(&vehicle_raw),
        )?,
        capacity_kg: row.try_get("capacity_kg").map_err(StoreError::from)?,
        current_load_kg: row.try_get("current_load_kg").map_err(StoreError::from)?,
        service_classes,
        active: row.try_get("active").map_err(StoreError::from)?,
        rating: row.try_get("rating").map_err(StoreError::from)?,
        on_time_rate: row.try_get("on_time_rate").map_err(StoreError::from)?,
        completed_today: row
            .try_get::<i32, _>("completed_today")
            .map_err(StoreError::from)?
            .max(0) as u32,
        target_deliveries: row
            .try_get::<i32, _>("target_deliveries")
            .map_err(StoreError::from)?
            .max(0) as u32,
        consecutive_deliveries: row
            .try_get::<i32, _>("consecutive_deliveries")
            .map_err(StoreError::from)?
            .max(0) as u32,
        requires_break_after: row
            .try_get::<i32, _>("requires_break_after")
            .map_err(StoreError::from)?
            .max(0) as u32,
        hours_worked_today: row.try_get("hours_worked_today").map_err(StoreError::from)?,
        max_hours_per_day: row.try_get("max_hours_per_day").map_err(StoreError::from)?,
        active_order: row.try_get("active_order").map_err(StoreError::from)?,
        active_batch: row.try_get("active_batch").map_err(StoreError::from)?,
        shift_started_at: row.try_get("shift_started_at").map_err(StoreError::from)?,
    })
}

fn record_from_row(row: &PgRow) -> Result<ReassignmentRecord, StoreError> {
    Ok(ReassignmentRecord {
        order_id: row.try_get("order_id").map_err(StoreError::from)?,
        from_driver: row.try_get("from_driver").map_err(StoreError::from)?,
        to_driver: row.try_get("to_driver").map_err(StoreError::from)?,
        reason: row.try_get("reason").map_err(StoreError::from)?,
        distance_km: row.try_get("distance_km").map_err(StoreError::from)?,
        driver_score: row.try_get("driver_score").map_err(StoreError::from)?,
        at: row.try_get("created_at").map_err(StoreError::from)?,
    })
}

#[async_trait]
impl FleetStore for PgFleetStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO orders (id, tracking_number, pickup_lat, pickup_lng, pickup_address, \
             dropoff_lat, dropoff_lng, dropoff_address, service_class, created_at, sla_deadline, \
             status, driver_id, reassignment_count, last_reassignment_reason, batch_id, \
             weight_kg, delivery_eta) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(order.id)
        .bind(&order.tracking_number)
        .bind(order.pickup.lat)
        .bind(order.pickup.lng)
        .bind(&order.pickup_address)
        .bind(order.dropoff.lat)
        .bind(order.dropoff.lng)
        .bind(&order.dropoff_address)
        .bind(order.service_class.as_str())
        .bind(order.created_at)
        .bind(order.sla_deadline)
        .bind(order.status.as_str())
        .bind(order.driver_id)
        .bind(order.reassignment_count as i32)
        .bind(&order.last_reassignment_reason)
        .bind(order.batch_id)
        .bind(order.weight_kg)
        .bind(order.delivery_eta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn pending_unassigned_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = 'PENDING' AND driver_id IS NULL AND batch_id IS NULL \
             ORDER BY created_at ASC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn batching_candidates(
        &self,
        class: ServiceClass,
        max_age_minutes: i64,
        min_deadline_slack_minutes: i64,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = 'PENDING' AND driver_id IS NULL AND batch_id IS NULL \
               AND service_class = $1 \
               AND created_at >= now() - make_interval(mins => $2) \
               AND sla_deadline >= now() + make_interval(mins => $3) \
             ORDER BY created_at ASC LIMIT $4"
        ))
        .bind(class.as_str())
        .bind(max_age_minutes as i32)
        .bind(min_deadline_slack_minutes as i32)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn in_flight_orders(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status IN ('ASSIGNED', 'PICKED_UP') \
             ORDER BY sla_deadline ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {id}")));
        }
        Ok(())
    }

    async fn set_order_delivery_eta(
        &self,
        id: OrderId,
        eta: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET delivery_eta = $2 WHERE id = $1")
            .bind(id)
            .bind(eta)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_driver(&self, driver: &Driver) -> Result<(), StoreError> {
        let classes: Vec<String> = driver
            .service_classes
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        sqlx::query(
            "INSERT INTO drivers (id, name, lat, lng, operational_state, vehicle_type, \
             capacity_kg, current_load_kg, service_classes, active, rating, on_time_rate, \
             completed_today, target_deliveries, consecutive_deliveries, requires_break_after, \
             hours_worked_today, max_hours_per_day, active_order, active_batch, shift_started_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21)",
        )
        .bind(driver.id)
        .bind(&driver.name)
        .bind(driver.position.lat)
        .bind(driver.position.lng)
        .bind(driver.state.as_str())
        .bind(driver.vehicle_type.as_str())
        .bind(driver.capacity_kg)
        .bind(driver.current_load_kg)
        .bind(&classes)
        .bind(driver.active)
        .bind(driver.rating)
        .bind(driver.on_time_rate)
        .bind(driver.completed_today as i32)
        .bind(driver.target_deliveries as i32)
        .bind(driver.consecutive_deliveries as i32)
        .bind(driver.requires_break_after as i32)
        .bind(driver.hours_worked_today)
        .bind(driver.max_hours_per_day)
        .bind(driver.active_order)
        .bind(driver.active_batch)
        .bind(driver.shift_started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn driver(&self, id: DriverId) -> Result<Option<Driver>, StoreError> {
        let row = sqlx::query(&format!("SELECT {DRIVER_COLUMNS} FROM drivers WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(driver_from_row).transpose()
    }

    async fn all_drivers(&self) -> Result<Vec<Driver>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {DRIVER_COLUMNS} FROM drivers ORDER BY name ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(driver_from_row).collect()
    }

    async fn update_driver(&self, driver: &Driver) -> Result<(), StoreError> {
        let classes: Vec<String> = driver
            .service_classes
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        let result = sqlx::query(
            "UPDATE drivers SET name = $2, lat = $3, lng = $4, operational_state = $5, \
             vehicle_type = $6, capacity_kg = $7, current_load_kg = $8, service_classes = $9, \
             active = $10, rating = $11, on_time_rate = $12, completed_today = $13, \
             target_deliveries = $14, consecutive_deliveries = $15, requires_break_after = $16, \
             hours_worked_today = $17, max_hours_per_day = $18, active_order = $19, \
             active_batch = $20, shift_started_at = $21 \
             WHERE id = $1",
        )
        .bind(driver.id)
        .bind(&driver.name)
        .bind(driver.position.lat)
        .bind(driver.position.lng)
        .bind(driver.state.as_str())
        .bind(driver.vehicle_type.as_str())
        .bind(driver.capacity_kg)
        .bind(driver.current_load_kg)
        .bind(&classes)
        .bind(driver.active)
        .bind(driver.rating)
        .bind(driver.on_time_rate)
        .bind(driver.completed_today as i32)
        .bind(driver.target_deliveries as i32)
        .bind(driver.consecutive_deliveries as i32)
        .bind(driver.requires_break_after as i32)
        .bind(driver.hours_worked_today)
        .bind(driver.max_hours_per_day)
        .bind(driver.active_order)
        .bind(driver.active_batch)
        .bind(driver.shift_started_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("driver {}", driver.id)));
        }
        Ok(())
    }

    async fn drivers_near(
        &self,
        center: GeoPoint,
        query: &DriverQuery,
    ) -> Result<Vec<Driver>, StoreError> {
        let excluded: Vec<String> = query
            .exclude_vehicle_types
            .iter()
            .map(|v| v.as_str().to_string())
            .collect();
        let rows = sqlx::query(&format!(
            "SELECT {DRIVER_COLUMNS}, {DISTANCE_KM_SQL} AS distance_km FROM drivers \
             WHERE active \
               AND operational_state IN ('AVAILABLE', 'RETURNING') \
               AND ($4::text IS NULL OR $4 = ANY(service_classes)) \
               AND NOT (vehicle_type = ANY($5)) \
               AND {DISTANCE_KM_SQL} <= $3 \
             ORDER BY distance_km ASC"
        ))
        .bind(center.lat)
        .bind(center.lng)
        .bind(query.radius_km)
        .bind(query.service_class.map(|c| c.as_str().to_string()))
        .bind(&excluded)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(driver_from_row).collect()
    }

    async fn reset_daily_metrics(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE drivers SET completed_today = 0, consecutive_deliveries = 0, \
             hours_worked_today = 0",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn assign_order_tx(
        &self,
        order_id: OrderId,
        driver_id: DriverId,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let order_rows = sqlx::query(
            "UPDATE orders SET status = 'ASSIGNED', driver_id = $2 \
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(order_id)
        .bind(driver_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if order_rows == 0 {
            return Err(StoreError::Conflict(format!(
                "order {order_id} is no longer pending"
            )));
        }

        let driver_rows = sqlx::query(
            "UPDATE drivers SET operational_state = 'BUSY', active_order = $2 \
             WHERE id = $1 AND operational_state IN ('AVAILABLE', 'RETURNING') \
               AND active_order IS NULL AND active_batch IS NULL",
        )
        .bind(driver_id)
        .bind(order_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if driver_rows == 0 {
            return Err(StoreError::Conflict(format!(
                "driver {driver_id} is no longer assignable"
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn reassign_order_tx(&self, record: &ReassignmentRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let order_rows = sqlx::query(
            "UPDATE orders SET driver_id = $2, status = 'ASSIGNED', \
             reassignment_count = reassignment_count + 1, last_reassignment_reason = $3 \
             WHERE id = $1 AND status IN ('ASSIGNED', 'PICKED_UP', 'PENDING')",
        )
        .bind(record.order_id)
        .bind(record.to_driver)
        .bind(&record.reason)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if order_rows == 0 {
            return Err(StoreError::Conflict(format!(
                "order {} left the reassignable states",
                record.order_id
            )));
        }

        if let Some(old_driver) = record.from_driver {
            sqlx::query(
                "UPDATE drivers SET operational_state = 'AVAILABLE', active_order = NULL \
                 WHERE id = $1",
            )
            .bind(old_driver)
            .execute(&mut *tx)
            .await?;
        }

        let driver_rows = sqlx::query(
            "UPDATE drivers SET operational_state = 'BUSY', active_order = $2 \
             WHERE id = $1 AND operational_state IN ('AVAILABLE', 'RETURNING') \
               AND active_order IS NULL AND active_batch IS NULL",
        )
        .bind(record.to_driver)
        .bind(record.order_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if driver_rows == 0 {
            return Err(StoreError::Conflict(format!(
                "driver {} is no longer assignable",
                record.to_driver
            )));
        }

        sqlx::query(
            "INSERT INTO reassignment_events (id, order_id, from_driver, to_driver, reason, \
             distance_km, driver_score, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::new_v4())
        .bind(record.order_id)
        .bind(record.from_driver)
        .bind(record.to_driver)
        .bind(&record.reason)
        .bind(record.distance_km)
        .bind(record.driver_score)
        .bind(record.at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_batch(&self, batch: &Batch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO batches (id, number, service_class, driver_id, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(batch.id)
        .bind(&batch.number)
        .bind(batch.service_class.as_str())
        .bind(batch.driver_id)
        .bind(batch.status.as_str())
        .bind(batch.created_at)
        .execute(&mut *tx)
        .await?;

        for order_id in &batch.order_ids {
            let rows = sqlx::query(
                "UPDATE orders SET batch_id = $2 \
                 WHERE id = $1 AND status = 'PENDING' AND batch_id IS NULL",
            )
            .bind(order_id)
            .bind(batch.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if rows == 0 {
                return Err(StoreError::Conflict(format!(
                    "order {order_id} is no longer batchable"
                )));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn assign_batch_tx(
        &self,
        batch_id: BatchId,
        driver_id: DriverId,
        route: &Route,
        member_etas: &[(OrderId, DateTime<Utc>)],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let batch_rows = sqlx::query(
            "UPDATE batches SET driver_id = $2, status = 'ASSIGNED' \
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(batch_id)
        .bind(driver_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if batch_rows == 0 {
            return Err(StoreError::Conflict(format!(
                "batch {batch_id} is no longer pending"
            )));
        }

        for (order_id, eta) in member_etas {
            let rows = sqlx::query(
                "UPDATE orders SET status = 'ASSIGNED', driver_id = $2, delivery_eta = $3 \
                 WHERE id = $1 AND batch_id = $4 AND status = 'PENDING'",
            )
            .bind(order_id)
            .bind(driver_id)
            .bind(eta)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if rows == 0 {
                return Err(StoreError::Conflict(format!(
                    "order {order_id} left batch {batch_id} before assignment"
                )));
            }
        }

        let driver_rows = sqlx::query(
            "UPDATE drivers SET operational_state = 'BUSY', active_batch = $2 \
             WHERE id = $1 AND operational_state IN ('AVAILABLE', 'RETURNING') \
               AND active_order IS NULL AND active_batch IS NULL",
        )
        .bind(driver_id)
        .bind(batch_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if driver_rows == 0 {
            return Err(StoreError::Conflict(format!(
                "driver {driver_id} is no longer assignable"
            )));
        }

        let route_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO routes (id, batch_id, driver_id, total_distance_km, \
             total_duration_secs, engine, fallback_reason, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, now())",
        )
        .bind(route_id)
        .bind(batch_id)
        .bind(driver_id)
        .bind(route.total_distance_km)
        .bind(route.total_duration_secs)
        .bind(route.engine.as_str())
        .bind(&route.fallback_reason)
        .execute(&mut *tx)
        .await?;

        for (seq, stop) in route.stops.iter().enumerate() {
            sqlx::query(
                "INSERT INTO route_stops (route_id, seq, order_id, kind, lat, lng, eta, \
                 cumulative_load_kg) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(route_id)
            .bind(seq as i32)
            .bind(stop.order_id)
            .bind(stop.kind.as_str())
            .bind(stop.location.lat)
            .bind(stop.location.lng)
            .bind(stop.eta)
            .bind(stop.cumulative_load_kg)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn dissolve_batch(&self, batch_id: BatchId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE orders SET batch_id = NULL WHERE batch_id = $1")
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE batches SET status = 'CANCELLED' WHERE id = $1")
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_batch_status(
        &self,
        batch_id: BatchId,
        status: BatchStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE batches SET status = $2 WHERE id = $1")
            .bind(batch_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("batch {batch_id}")));
        }
        Ok(())
    }

    async fn batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        let Some(row) = sqlx::query(
            "SELECT id, number, service_class, driver_id, status, created_at \
             FROM batches WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let class_raw: String = row.try_get("service_class").map_err(StoreError::from)?;
        let status_raw: String = row.try_get("status").map_err(StoreError::from)?;

        let member_rows =
            sqlx::query("SELECT id FROM orders WHERE batch_id = $1 ORDER BY created_at ASC")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;
        let mut order_ids = Vec::with_capacity(member_rows.len());
        for member in &member_rows {
            order_ids.push(member.try_get("id").map_err(StoreError::from)?);
        }

        Ok(Some(Batch {
            id: row.try_get("id").map_err(StoreError::from)?,
            number: row.try_get("number").map_err(StoreError::from)?,
            order_ids,
            service_class: parse_enum("service_class", &class_raw, ServiceClass::parse(&class_raw))?,
            driver_id: row.try_get("driver_id").map_err(StoreError::from)?,
            status: parse_enum("status", &status_raw, BatchStatus::parse(&status_raw))?,
            created_at: row.try_get("created_at").map_err(StoreError::from)?,
        }))
    }

    async fn route_for_batch(&self, batch_id: BatchId) -> Result<Option<Route>, StoreError> {
        let Some(route_row) = sqlx::query(
            "SELECT id, driver_id, total_distance_km, total_duration_secs, engine, \
             fallback_reason FROM routes WHERE batch_id = $1 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let route_id: Uuid = route_row.try_get("id").map_err(StoreError::from)?;
        let engine_raw: String = route_row.try_get("engine").map_err(StoreError::from)?;
        let engine = match engine_raw.as_str() {
            "cvrp" => RouteEngine::Cvrp,
            "fast_matrix" => RouteEngine::FastMatrix,
            "naive" => RouteEngine::Naive,
            other => {
                return Err(StoreError::Database(format!("unknown engine value: {other}")))
            }
        };

        let stop_rows = sqlx::query(
            "SELECT order_id, kind, lat, lng, eta, cumulative_load_kg \
             FROM route_stops WHERE route_id = $1 ORDER BY seq ASC",
        )
        .bind(route_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stops = Vec::with_capacity(stop_rows.len());
        for stop in &stop_rows {
            let kind_raw: String = stop.try_get("kind").map_err(StoreError::from)?;
            stops.push(RouteStop {
                order_id: stop.try_get("order_id").map_err(StoreError::from)?,
                kind: parse_enum("stop kind", &kind_raw, StopKind::parse(&kind_raw))?,
                location: GeoPoint::new(
                    stop.try_get("lat").map_err(StoreError::from)?,
                    stop.try_get("lng").map_err(StoreError::from)?,
                ),
                eta: stop.try_get("eta").map_err(StoreError::from)?,
                cumulative_load_kg: stop.try_get("cumulative_load_kg").map_err(StoreError::from)?,
            });
        }

        Ok(Some(Route {
            driver_id: route_row.try_get("driver_id").map_err(StoreError::from)?,
            batch_id: Some(batch_id),
            stops,
            total_distance_km: route_row
                .try_get("total_distance_km")
                .map_err(StoreError::from)?,
            total_duration_secs: route_row
                .try_get("total_duration_secs")
                .map_err(StoreError::from)?,
            engine,
            fallback_reason: route_row.try_get("fallback_reason").map_err(StoreError::from)?,
        }))
    }

    async fn reassignment_history(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<ReassignmentRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT order_id, from_driver, to_driver, reason, distance_km, driver_score, \
             created_at FROM reassignment_events WHERE order_id = $1 ORDER BY created_at ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }
}
