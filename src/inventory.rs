//! Seat inventory shared by every terminal.
//!
//! Each train sits behind its own shard guard in a [`DashMap`], so every
//! mutation below is a single check-and-update under that guard. Callers never
//! read a count and write it back in two steps.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::debug;

use crate::model::{SeatClass, Train, TrainId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("train {0} already exists")]
    AlreadyExists(TrainId),

    #[error("train {0} not found")]
    TrainNotFound(TrainId),

    #[error("seat amount must be greater than 0, got {0}")]
    InvalidAmount(i64),

    #[error("not enough {class} seats on {train}: requested {requested}, available {available}")]
    InsufficientInventory {
        train: TrainId,
        class: SeatClass,
        requested: u32,
        available: u32,
    },

    #[error("adding {added} {class} seats to {train} would overflow its count of {current}")]
    SeatOverflow {
        train: TrainId,
        class: SeatClass,
        current: u32,
        added: u32,
    },
}

/// Per-train seat counts.
#[derive(Debug, Default)]
pub struct InventoryStore {
    trains: DashMap<TrainId, Train>,
}

impl InventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a train with no seats.
    pub fn add_train(
        &self,
        train_id: &str,
        origin: &str,
        destination: &str,
    ) -> Result<(), InventoryError> {
        match self.trains.entry(train_id.to_string()) {
            Entry::Occupied(_) => Err(InventoryError::AlreadyExists(train_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Train::new(train_id, origin, destination));
                debug!(train = train_id, origin, destination, "train added");
                Ok(())
            }
        }
    }

    /// Add `amount` seats of `class`, returning the new available count.
    pub fn add_seats(
        &self,
        train_id: &str,
        class: SeatClass,
        amount: u32,
    ) -> Result<u32, InventoryError> {
        Self::ensure_positive(amount)?;
        let mut train = self.train_mut(train_id)?;
        Self::put_back(&mut train, class, amount)
    }

    /// Take `amount` seats of `class` out of the available pool.
    ///
    /// Fails without touching the count if fewer than `amount` are available.
    pub fn lock(&self, train_id: &str, class: SeatClass, amount: u32) -> Result<u32, InventoryError> {
        Self::ensure_positive(amount)?;
        let mut train = self.train_mut(train_id)?;
        let available = train.available(class);
        if available < amount {
            return Err(InventoryError::InsufficientInventory {
                train: train_id.to_string(),
                class,
                requested: amount,
                available,
            });
        }
        let remaining = available - amount;
        train.seats.insert(class, remaining);
        Ok(remaining)
    }

    /// Return previously locked seats to the pool.
    ///
    /// Must be called exactly once per successful [`lock`](Self::lock).
    pub fn release(
        &self,
        train_id: &str,
        class: SeatClass,
        amount: u32,
    ) -> Result<u32, InventoryError> {
        Self::ensure_positive(amount)?;
        let mut train = self.train_mut(train_id)?;
        Self::put_back(&mut train, class, amount)
    }

    pub fn get(&self, train_id: &str) -> Option<Train> {
        self.trains.get(train_id).map(|train| train.value().clone())
    }

    pub fn available(&self, train_id: &str, class: SeatClass) -> Result<u32, InventoryError> {
        self.trains
            .get(train_id)
            .map(|train| train.available(class))
            .ok_or_else(|| InventoryError::TrainNotFound(train_id.to_string()))
    }

    /// Copy of every train, ordered by id.
    ///
    /// Each train is cloned under its guard, so its seat map is never torn.
    /// Different trains may be read at slightly different moments.
    pub fn snapshot(&self) -> Vec<Train> {
        let mut trains: Vec<Train> = self
            .trains
            .iter()
            .map(|train| train.value().clone())
            .collect();
        trains.sort_by(|a, b| a.train_id.cmp(&b.train_id));
        trains
    }

    pub fn len(&self) -> usize {
        self.trains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trains.is_empty()
    }

    fn train_mut(
        &self,
        train_id: &str,
    ) -> Result<dashmap::mapref::one::RefMut<'_, TrainId, Train>, InventoryError> {
        self.trains
            .get_mut(train_id)
            .ok_or_else(|| InventoryError::TrainNotFound(train_id.to_string()))
    }

    /// Add `amount` to a class count, leaving it untouched on overflow.
    fn put_back(train: &mut Train, class: SeatClass, amount: u32) -> Result<u32, InventoryError> {
        let current = train.available(class);
        let updated = current
            .checked_add(amount)
            .ok_or_else(|| InventoryError::SeatOverflow {
                train: train.train_id.clone(),
                class,
                current,
                added: amount,
            })?;
        train.seats.insert(class, updated);
        Ok(updated)
    }

    fn ensure_positive(amount: u32) -> Result<(), InventoryError> {
        if amount == 0 {
            return Err(InventoryError::InvalidAmount(0));
        }
        Ok(())
    }
}
