pub mod app;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod csv;
pub mod inventory;
pub mod model;
pub mod orders;
pub mod router;
pub mod server;
pub mod sweeper;

pub use app::App;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use coordinator::{ErrorKind, Reservation, ReservationCoordinator, ReservationError};
pub use inventory::{InventoryError, InventoryStore};
pub use model::{Order, OrderId, OrderStatus, SeatClass, Statistics, SystemState, Train, TrainId};
pub use orders::{OrderError, OrderStore};
pub use router::{Reply, RequestRouter};
pub use sweeper::{SweeperHandle, TimeoutSweeper};
