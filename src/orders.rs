//! Order records and their status transitions.
//!
//! `transition` is a compare-and-swap on the stored status, done under the
//! order's shard guard. Of any set of racing confirm/cancel/expire calls on
//! one order, exactly one sees the expected status and wins.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

use crate::model::{Order, OrderId, OrderStatus, Statistics, SystemState};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("order {0} already exists")]
    DuplicateId(OrderId),

    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("order {id} is {actual}, cannot move from {expected} to {requested}")]
    InvalidTransition {
        id: OrderId,
        expected: OrderStatus,
        requested: OrderStatus,
        actual: OrderStatus,
    },
}

#[derive(Debug, Default)]
pub struct OrderStore {
    orders: DashMap<OrderId, Order>,
    /// Orders currently in `PendingPayment`. Only touched under an order's guard.
    pending: AtomicUsize,
    /// Last system state reported in the logs
    observed: Mutex<SystemState>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new order. It always enters the store as `PendingPayment`.
    pub fn create(&self, mut order: Order) -> Result<(), OrderError> {
        match self.orders.entry(order.id.clone()) {
            Entry::Occupied(_) => Err(OrderError::DuplicateId(order.id)),
            Entry::Vacant(slot) => {
                order.status = OrderStatus::PendingPayment;
                order.paid_at = None;
                order.cancelled_at = None;
                order.expired_at = None;
                let stored = slot.insert(order);
                self.pending.fetch_add(1, Ordering::SeqCst);
                drop(stored);
                Ok(())
            }
        }
    }

    /// Move an order from `from` to `to` if it is still in `from`.
    ///
    /// Returns the updated order. `to` must be reachable from `from` in the
    /// lifecycle graph.
    pub fn transition(
        &self,
        id: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, OrderError> {
        let mut order = self
            .orders
            .get_mut(id)
            .ok_or_else(|| OrderError::NotFound(id.to_string()))?;

        if order.status != from || !from.can_transition_to(to) {
            return Err(OrderError::InvalidTransition {
                id: id.to_string(),
                expected: from,
                requested: to,
                actual: order.status,
            });
        }

        order.stamp(to, at);
        if from == OrderStatus::PendingPayment {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(order.clone())
    }

    pub fn get(&self, id: &str) -> Result<Order, OrderError> {
        self.orders
            .get(id)
            .map(|order| order.value().clone())
            .ok_or_else(|| OrderError::NotFound(id.to_string()))
    }

    /// All orders, oldest first.
    pub fn list_all(&self) -> Vec<Order> {
        self.collect(|_| true)
    }

    /// Orders currently in `status`, oldest first.
    pub fn list_by_status(&self, status: OrderStatus) -> Vec<Order> {
        self.collect(|order| order.status == status)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Log a READY <-> PROCESSING change since the last call.
    ///
    /// Returns the new state if it changed. Every writer of this store calls
    /// it after mutating, so each change is logged once, by whoever made it.
    pub fn observe_state(&self) -> Option<SystemState> {
        let mut observed = self.observed.lock();
        let current = SystemState::from_pending(self.pending_count());
        let previous = *observed;
        if previous == current {
            return None;
        }
        info!(from = %previous, to = %current, "system state changed");
        *observed = current;
        Some(current)
    }

    /// Per-status counts. Each order is read once, concurrent writers may
    /// land between reads.
    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics::default();
        for order in self.orders.iter() {
            stats.record(order.status);
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn collect(&self, keep: impl Fn(&Order) -> bool) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|order| keep(order.value()))
            .map(|order| order.value().clone())
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        orders
    }
}
