//! Core domain types for the reservation service.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Train identifier, e.g. `G101`.
pub type TrainId = String;

/// Order identifier.
pub type OrderId = String;

/// Identifier of the terminal that issued a request.
pub type TerminalId = String;

/// Identifier of the request an order was created from.
pub type RequestId = String;

/// Seat tier. Closed set: unknown labels are rejected when parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SeatClass {
    #[serde(rename = "first-class", alias = "一等座")]
    FirstClass,
    #[serde(rename = "second-class", alias = "二等座")]
    SecondClass,
}

impl SeatClass {
    pub fn label(&self) -> &'static str {
        match self {
            SeatClass::FirstClass => "first-class",
            SeatClass::SecondClass => "second-class",
        }
    }
}

impl fmt::Display for SeatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported seat class '{0}', expected first-class or second-class")]
pub struct UnknownSeatClass(pub String);

impl FromStr for SeatClass {
    type Err = UnknownSeatClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "first-class" | "一等座" => Ok(SeatClass::FirstClass),
            "second-class" | "二等座" => Ok(SeatClass::SecondClass),
            other => Err(UnknownSeatClass(other.to_string())),
        }
    }
}

/// Lifecycle of an order.
///
/// ```text
/// PENDING_PAYMENT --confirm--> PAID
/// PENDING_PAYMENT --cancel---> CANCELLED
/// PENDING_PAYMENT --deadline-> EXPIRED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::Paid => "PAID",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::PendingPayment)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(self, OrderStatus::PendingPayment) && next.is_terminal()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate state of the service, derived from whether any order awaits payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemState {
    #[default]
    Ready,
    Processing,
}

impl SystemState {
    pub fn from_pending(pending: usize) -> Self {
        if pending == 0 {
            SystemState::Ready
        } else {
            SystemState::Processing
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemState::Ready => f.write_str("READY"),
            SystemState::Processing => f.write_str("PROCESSING"),
        }
    }
}

/// A train and its available seats per class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Train {
    pub train_id: TrainId,
    pub origin: String,
    pub destination: String,
    pub seats: BTreeMap<SeatClass, u32>,
}

impl Train {
    pub fn new(
        train_id: impl Into<TrainId>,
        origin: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            train_id: train_id.into(),
            origin: origin.into(),
            destination: destination.into(),
            seats: BTreeMap::new(),
        }
    }

    /// Available seats of a class; a class never stocked has none.
    pub fn available(&self, class: SeatClass) -> u32 {
        self.seats.get(&class).copied().unwrap_or(0)
    }
}

/// A validated purchase request, referenced by the order it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRequest {
    pub request_id: RequestId,
    pub train_id: TrainId,
    pub seat_class: SeatClass,
    pub passenger_count: u32,
    pub terminal_id: TerminalId,
}

impl TicketRequest {
    pub fn new(
        train_id: impl Into<TrainId>,
        seat_class: SeatClass,
        passenger_count: u32,
        terminal_id: impl Into<TerminalId>,
    ) -> Self {
        Self {
            request_id: format!("REQ-{}", Uuid::new_v4().simple()),
            train_id: train_id.into(),
            seat_class,
            passenger_count,
            terminal_id: terminal_id.into(),
        }
    }
}

/// A reservation of `passenger_count` seats.
///
/// Only `status` and the timestamp matching the status change after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub request_id: RequestId,
    pub train_id: TrainId,
    pub seat_class: SeatClass,
    pub passenger_count: u32,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub terminal_id: TerminalId,
}

impl Order {
    /// Create a new order awaiting payment from a purchase request.
    pub fn new(request: &TicketRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("ORD-{}", Uuid::new_v4().simple()),
            request_id: request.request_id.clone(),
            train_id: request.train_id.clone(),
            seat_class: request.seat_class,
            passenger_count: request.passenger_count,
            status: OrderStatus::PendingPayment,
            created_at,
            paid_at: None,
            cancelled_at: None,
            expired_at: None,
            terminal_id: request.terminal_id.clone(),
        }
    }

    pub fn payment_deadline(&self, timeout: Duration) -> DateTime<Utc> {
        TimeDelta::from_std(timeout)
            .ok()
            .and_then(|delta| self.created_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// True once the order has been around for longer than `timeout`.
    pub fn is_overdue(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        // negative ages (clock skew) count as zero
        let age = (now - self.created_at).to_std().unwrap_or_default();
        age > timeout
    }

    /// Move to `status`, stamping the matching timestamp.
    pub(crate) fn stamp(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        self.status = status;
        match status {
            OrderStatus::Paid => self.paid_at = Some(at),
            OrderStatus::Cancelled => self.cancelled_at = Some(at),
            OrderStatus::Expired => self.expired_at = Some(at),
            OrderStatus::PendingPayment => {}
        }
    }
}

/// Order counts per status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Statistics {
    pub pending: usize,
    pub paid: usize,
    pub cancelled: usize,
    pub expired: usize,
    pub total: usize,
}

impl Statistics {
    pub(crate) fn record(&mut self, status: OrderStatus) {
        match status {
            OrderStatus::PendingPayment => self.pending += 1,
            OrderStatus::Paid => self.paid += 1,
            OrderStatus::Cancelled => self.cancelled += 1,
            OrderStatus::Expired => self.expired += 1,
        }
        self.total += 1;
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pending:{}|paid:{}|cancelled:{}|expired:{}|total:{}",
            self.pending, self.paid, self.cancelled, self.expired, self.total
        )
    }
}
