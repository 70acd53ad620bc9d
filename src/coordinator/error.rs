//! Error types for reservation processing.

use thiserror::Error;

use crate::inventory::InventoryError;
use crate::orders::OrderError;

/// Broad category of a failure, as reported to terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-range input. Never mutates state.
    Validation,
    NotFound,
    AlreadyExists,
    InsufficientInventory,
    /// A status compare-and-swap found the order in another state.
    InvalidTransition,
    Internal,
}

/// Input rejected before any store is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("passenger count must be between 1 and 5, got {0}")]
    PassengerCount(i64),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

/// Top-level error returned by [`ReservationCoordinator`](super::ReservationCoordinator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Inventory(#[from] InventoryError),

    #[error("{0}")]
    Order(#[from] OrderError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl InventoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            InventoryError::TrainNotFound(_) => ErrorKind::NotFound,
            InventoryError::InvalidAmount(_) | InventoryError::SeatOverflow { .. } => {
                ErrorKind::Validation
            }
            InventoryError::InsufficientInventory { .. } => ErrorKind::InsufficientInventory,
        }
    }
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::DuplicateId(_) => ErrorKind::AlreadyExists,
            OrderError::NotFound(_) => ErrorKind::NotFound,
            OrderError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
        }
    }
}

impl ReservationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReservationError::Validation(_) => ErrorKind::Validation,
            ReservationError::Inventory(e) => e.kind(),
            ReservationError::Order(e) => e.kind(),
            ReservationError::Internal(_) => ErrorKind::Internal,
        }
    }
}
