use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::inventory::{InventoryError, InventoryStore};
use crate::model::{SeatClass, Train};

/// Errors that can occur when reading seed rows or writing a snapshot
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: {source}")]
    Inventory { line: usize, source: InventoryError },

    #[error("failed to write snapshot: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush snapshot: {0}")]
    Flush(#[from] io::Error),
}

/// One (train, class) row of a seed file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedRow {
    pub train_id: String,
    pub origin: String,
    pub destination: String,
    pub seat_class: SeatClass,
    pub seats: u32,
}

#[derive(Debug, Serialize)]
struct SnapshotRow<'a> {
    train_id: &'a str,
    origin: &'a str,
    destination: &'a str,
    seat_class: SeatClass,
    available: u32,
}

/// Read seed rows from a csv file
pub fn read_seed(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = (usize, Result<SeedRow, CsvError>)>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<SeedRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            (line, result.map_err(|source| CsvError::Parse { line, source }))
        }))
}

/// Load a seed file into the inventory, returning how many rows were applied.
///
/// Bad rows are logged and skipped. A train appearing on several rows is
/// created once; its origin and destination come from the first row.
pub fn load_seed(inventory: &InventoryStore, path: impl AsRef<Path>) -> Result<usize, CsvError> {
    let mut applied = 0;
    for (line, row) in read_seed(path)? {
        let result = row.and_then(|row| {
            apply_row(inventory, &row).map_err(|source| CsvError::Inventory { line, source })
        });
        match result {
            Ok(()) => applied += 1,
            Err(e) => warn!("{e}"),
        }
    }
    Ok(applied)
}

fn apply_row(inventory: &InventoryStore, row: &SeedRow) -> Result<(), InventoryError> {
    match inventory.add_train(&row.train_id, &row.origin, &row.destination) {
        Ok(()) | Err(InventoryError::AlreadyExists(_)) => {}
        Err(e) => return Err(e),
    }
    if row.seats > 0 {
        inventory.add_seats(&row.train_id, row.seat_class, row.seats)?;
    }
    Ok(())
}

/// Write an inventory snapshot in csv format, one row per stocked class
pub fn write_snapshot<'a>(
    writer: impl io::Write,
    trains: impl IntoIterator<Item = &'a Train>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for train in trains {
        for (&seat_class, &available) in &train.seats {
            writer.serialize(SnapshotRow {
                train_id: &train.train_id,
                origin: &train.origin,
                destination: &train.destination,
                seat_class,
                available,
            })?;
        }
    }

    writer.flush()?;
    Ok(())
}
