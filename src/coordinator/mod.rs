//! Reservation processing.
//!
//! The coordinator ties the seat inventory to the order lifecycle: a purchase
//! locks seats and records an order awaiting payment, which is then confirmed,
//! cancelled, or left for the sweeper to expire.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::clock::Clock;
use crate::inventory::InventoryStore;
use crate::model::{
    Order, OrderId, OrderStatus, SeatClass, Statistics, SystemState, TicketRequest,
};
use crate::orders::OrderStore;

mod error;
pub use error::{ErrorKind, ReservationError, ValidationError};

/// Most passengers a single order may carry.
pub const MAX_PASSENGERS: u32 = 5;

/// Outcome of a successful purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub order_id: OrderId,
    pub payment_deadline: DateTime<Utc>,
}

/// Orchestrates purchases over the inventory and order stores.
pub struct ReservationCoordinator {
    inventory: Arc<InventoryStore>,
    orders: Arc<OrderStore>,
    clock: Arc<dyn Clock>,
    payment_timeout: Duration,
}

/// Public API
impl ReservationCoordinator {
    pub fn new(
        inventory: Arc<InventoryStore>,
        orders: Arc<OrderStore>,
        clock: Arc<dyn Clock>,
        payment_timeout: Duration,
    ) -> Self {
        Self {
            inventory,
            orders,
            clock,
            payment_timeout,
        }
    }

    /// Lock `passenger_count` seats and open an order awaiting payment.
    ///
    /// Nothing is mutated unless the request is valid. If the seats cannot be
    /// locked no order is created.
    pub fn purchase(
        &self,
        train_id: &str,
        seat_class: SeatClass,
        passenger_count: u32,
        terminal_id: &str,
    ) -> Result<Reservation, ReservationError> {
        let result = self.apply_purchase(train_id, seat_class, passenger_count, terminal_id);
        Self::log_result("purchase", train_id, &result);
        if result.is_ok() {
            self.refresh_state();
        }
        result
    }

    /// Mark a pending order as paid. Its seats stay taken.
    pub fn confirm_payment(&self, order_id: &str) -> Result<Order, ReservationError> {
        let result = self
            .orders
            .transition(
                order_id,
                OrderStatus::PendingPayment,
                OrderStatus::Paid,
                self.clock.now(),
            )
            .map_err(ReservationError::from);
        Self::log_result("confirm", order_id, &result);
        self.refresh_state();
        result
    }

    /// Cancel a pending order and hand its seats back.
    pub fn cancel(&self, order_id: &str) -> Result<Order, ReservationError> {
        let result = self.apply_cancel(order_id);
        Self::log_result("cancel", order_id, &result);
        self.refresh_state();
        result
    }

    pub fn query(&self, order_id: &str) -> Result<Order, ReservationError> {
        Ok(self.orders.get(order_id)?)
    }

    pub fn statistics(&self) -> Statistics {
        self.orders.statistics()
    }

    /// `Processing` while any order awaits payment, `Ready` otherwise.
    pub fn system_state(&self) -> SystemState {
        SystemState::from_pending(self.orders.pending_count())
    }

    pub fn payment_timeout(&self) -> Duration {
        self.payment_timeout
    }
}

/// Private API
impl ReservationCoordinator {
    /// Small helper to log operation results
    fn log_result<T, E: std::fmt::Display>(op: &str, subject: &str, result: &Result<T, E>) {
        match result {
            Ok(_) => info!(subject, "{op} applied"),
            Err(e) => info!(subject, reason = %e, "{op} rejected"),
        }
    }

    fn validate(
        train_id: &str,
        passenger_count: u32,
        terminal_id: &str,
    ) -> Result<(), ValidationError> {
        if !(1..=MAX_PASSENGERS).contains(&passenger_count) {
            return Err(ValidationError::PassengerCount(i64::from(passenger_count)));
        }
        if train_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("trainId"));
        }
        if terminal_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("terminalId"));
        }
        Ok(())
    }

    /// Validate, lock seats, then record the order.
    /// If recording fails the locked seats are released before returning.
    fn apply_purchase(
        &self,
        train_id: &str,
        seat_class: SeatClass,
        passenger_count: u32,
        terminal_id: &str,
    ) -> Result<Reservation, ReservationError> {
        Self::validate(train_id, passenger_count, terminal_id)?;

        self.inventory.lock(train_id, seat_class, passenger_count)?;

        let request = TicketRequest::new(train_id, seat_class, passenger_count, terminal_id);
        let order = Order::new(&request, self.clock.now());
        let reservation = Reservation {
            order_id: order.id.clone(),
            payment_deadline: order.payment_deadline(self.payment_timeout),
        };

        if let Err(e) = self.orders.create(order) {
            if let Err(release) = self.inventory.release(train_id, seat_class, passenger_count) {
                error!(train = train_id, reason = %release, "failed to return seats of unrecorded order");
                return Err(ReservationError::Internal(release.to_string()));
            }
            return Err(e.into());
        }

        Ok(reservation)
    }

    /// Cancel first, release only if the cancel won. A concurrent confirm or
    /// expiry that won instead leaves the seats where they are.
    fn apply_cancel(&self, order_id: &str) -> Result<Order, ReservationError> {
        let order = self.orders.transition(
            order_id,
            OrderStatus::PendingPayment,
            OrderStatus::Cancelled,
            self.clock.now(),
        )?;

        self.inventory
            .release(&order.train_id, order.seat_class, order.passenger_count)
            .map_err(|e| {
                error!(order = order_id, reason = %e, "cancelled order could not return its seats");
                ReservationError::Internal(e.to_string())
            })?;

        Ok(order)
    }

    fn refresh_state(&self) {
        self.orders.observe_state();
    }
}
