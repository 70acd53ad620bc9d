//! Wiring of the stores, coordinator, sweeper and router.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::coordinator::ReservationCoordinator;
use crate::inventory::InventoryStore;
use crate::orders::OrderStore;
use crate::router::RequestRouter;
use crate::sweeper::TimeoutSweeper;

/// One instance of the reservation service. Each `App` owns fresh stores.
pub struct App {
    pub inventory: Arc<InventoryStore>,
    pub orders: Arc<OrderStore>,
    pub coordinator: Arc<ReservationCoordinator>,
    pub router: Arc<RequestRouter>,
    clock: Arc<dyn Clock>,
    payment_timeout: Duration,
}

impl App {
    pub fn new(payment_timeout: Duration) -> Self {
        Self::with_clock(Arc::new(SystemClock), payment_timeout)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, payment_timeout: Duration) -> Self {
        let inventory = Arc::new(InventoryStore::new());
        let orders = Arc::new(OrderStore::new());
        let coordinator = Arc::new(ReservationCoordinator::new(
            Arc::clone(&inventory),
            Arc::clone(&orders),
            Arc::clone(&clock),
            payment_timeout,
        ));
        let router = Arc::new(RequestRouter::new(
            Arc::clone(&coordinator),
            Arc::clone(&inventory),
        ));
        Self {
            inventory,
            orders,
            coordinator,
            router,
            clock,
            payment_timeout,
        }
    }

    /// A sweeper working on this instance's stores.
    pub fn sweeper(&self) -> TimeoutSweeper {
        TimeoutSweeper::new(
            Arc::clone(&self.orders),
            Arc::clone(&self.inventory),
            Arc::clone(&self.clock),
            self.payment_timeout,
        )
    }
}
