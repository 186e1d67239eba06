//! Single-link clustering of batching candidates by dropoff proximity.

use chrono::Duration;

use crate::config::BatchingConfig;
use crate::domain::Order;
use crate::spatial::haversine_km;

/// Greedy single-link clustering, deterministic on the input order.
///
/// Starting from each unvisited seed, absorb any unvisited order whose
/// dropoff lies within `max_batch_distance_km` of *any* current member and
/// that is compatible with the batch: same service class, and the absorbed
/// batch's SLA spread stays within `max_sla_spread_minutes`. A batch stops
/// growing at `max_orders_per_batch`; batches below `min_orders_per_batch`
/// are discarded.
pub fn cluster_orders(orders: &[Order], config: &BatchingConfig) -> Vec<Vec<usize>> {
    let n = orders.len();
    let mut visited = vec![false; n];
    let mut clusters = Vec::new();

    for seed in 0..n {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        let mut batch = vec![seed];

        // Absorb to a fixpoint: each new member extends the link reach.
        let mut grew = true;
        while grew && batch.len() < config.max_orders_per_batch {
            grew = false;
            for j in 0..n {
                if visited[j] || batch.len() >= config.max_orders_per_batch {
                    continue;
                }
                if compatible(orders, &batch, j, config) {
                    visited[j] = true;
                    batch.push(j);
                    grew = true;
                }
            }
        }

        if batch.len() >= config.min_orders_per_batch {
            clusters.push(batch);
        }
    }

    clusters
}

fn compatible(orders: &[Order], batch: &[usize], candidate: usize, config: &BatchingConfig) -> bool {
    let incoming = &orders[candidate];
    if incoming.service_class != orders[batch[0]].service_class {
        return false;
    }

    let linked = batch.iter().any(|&member| {
        haversine_km(orders[member].dropoff, incoming.dropoff) <= config.max_batch_distance_km
    });
    if !linked {
        return false;
    }

    let mut earliest = incoming.sla_deadline;
    let mut latest = incoming.sla_deadline;
    for &member in batch {
        earliest = earliest.min(orders[member].sla_deadline);
        latest = latest.max(orders[member].sla_deadline);
    }
    latest - earliest <= Duration::minutes(config.max_sla_spread_minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::GeoPoint;
    use crate::test_helpers::make_order;
    use chrono::{Duration, Utc};

    fn order_at(lat: f64, lng: f64) -> Order {
        let mut order = make_order();
        order.dropoff = GeoPoint::new(lat, lng);
        order
    }

    #[test]
    fn two_geographic_groups_form_two_clusters() {
        // Four dropoffs within ~2 km, two more ~6 km away within ~1 km.
        let orders = vec![
            order_at(52.520, 13.400),
            order_at(52.525, 13.405),
            order_at(52.530, 13.410),
            order_at(52.522, 13.415),
            order_at(52.575, 13.480),
            order_at(52.578, 13.485),
        ];
        let clusters = cluster_orders(&orders, &BatchingConfig::default());
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], vec![0, 1, 2, 3]);
        assert_eq!(clusters[1], vec![4, 5]);
    }

    #[test]
    fn lone_orders_are_discarded() {
        let orders = vec![order_at(52.52, 13.40), order_at(52.70, 13.90)];
        let clusters = cluster_orders(&orders, &BatchingConfig::default());
        assert!(clusters.is_empty());
    }

    #[test]
    fn batch_size_is_capped() {
        let orders: Vec<Order> = (0..8)
            .map(|i| order_at(52.520 + 0.001 * i as f64, 13.400))
            .collect();
        let config = BatchingConfig::default();
        let clusters = cluster_orders(&orders, &config);
        // Five into the first batch, the remaining three form a second.
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 5);
        assert_eq!(clusters[1].len(), 3);
    }

    #[test]
    fn sla_spread_is_bounded() {
        let now = Utc::now();
        let mut near_deadline = order_at(52.520, 13.400);
        near_deadline.sla_deadline = now + Duration::minutes(60);
        let mut mid = order_at(52.521, 13.401);
        mid.sla_deadline = now + Duration::minutes(100);
        let mut far_deadline = order_at(52.522, 13.402);
        far_deadline.sla_deadline = now + Duration::minutes(180);

        let orders = vec![near_deadline, mid, far_deadline];
        let clusters = cluster_orders(&orders, &BatchingConfig::default());
        // The third order would stretch the spread to 120 min.
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0], vec![0, 1]);
    }

    #[test]
    fn service_classes_never_mix() {
        let mut express = order_at(52.520, 13.400);
        express.service_class = crate::domain::ServiceClass::Express;
        let standard = order_at(52.521, 13.401);
        let standard_two = order_at(52.522, 13.402);

        let orders = vec![express, standard, standard_two];
        let clusters = cluster_orders(&orders, &BatchingConfig::default());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0], vec![1, 2]);
    }

    #[test]
    fn clustering_is_deterministic() {
        let orders: Vec<Order> = (0..6)
            .map(|i| order_at(52.520 + 0.002 * i as f64, 13.400))
            .collect();
        let config = BatchingConfig::default();
        let first = cluster_orders(&orders, &config);
        let second = cluster_orders(&orders, &config);
        assert_eq!(first, second);
    }
}
