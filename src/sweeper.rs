//! Background expiry of unpaid orders.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::inventory::InventoryStore;
use crate::model::OrderStatus;
use crate::orders::OrderStore;

/// Expires orders whose payment deadline has passed and returns their seats.
///
/// Uses the same store operations as request handling: an order only expires
/// if the `PendingPayment -> Expired` swap succeeds, and only then are its
/// seats released.
#[derive(Clone)]
pub struct TimeoutSweeper {
    orders: Arc<OrderStore>,
    inventory: Arc<InventoryStore>,
    clock: Arc<dyn Clock>,
    payment_timeout: Duration,
}

impl TimeoutSweeper {
    pub fn new(
        orders: Arc<OrderStore>,
        inventory: Arc<InventoryStore>,
        clock: Arc<dyn Clock>,
        payment_timeout: Duration,
    ) -> Self {
        Self {
            orders,
            inventory,
            clock,
            payment_timeout,
        }
    }

    /// Run one tick at the clock's current time.
    pub fn sweep(&self) -> usize {
        self.sweep_at(self.clock.now())
    }

    /// Run one tick as of `now`, returning how many orders expired.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let overdue = self
            .orders
            .list_by_status(OrderStatus::PendingPayment)
            .into_iter()
            .filter(|order| order.is_overdue(now, self.payment_timeout));

        let mut expired = 0;
        for order in overdue {
            let order = match self.orders.transition(
                &order.id,
                OrderStatus::PendingPayment,
                OrderStatus::Expired,
                now,
            ) {
                Ok(order) => order,
                Err(e) => {
                    // paid or cancelled since the scan
                    debug!(order = %order.id, reason = %e, "expiry skipped");
                    continue;
                }
            };

            expired += 1;
            match self
                .inventory
                .release(&order.train_id, order.seat_class, order.passenger_count)
            {
                Ok(available) => info!(
                    order = %order.id,
                    train = %order.train_id,
                    class = %order.seat_class,
                    seats = order.passenger_count,
                    available,
                    "order expired"
                ),
                Err(e) => error!(
                    order = %order.id,
                    reason = %e,
                    "order expired but its seats could not be released"
                ),
            }
        }
        if expired > 0 {
            self.orders.observe_state();
        }
        expired
    }

    /// Run ticks every `interval` on the tokio runtime until shut down.
    pub fn spawn(self, interval: Duration) -> SweeperHandle {
        let (stop, stopped) = watch::channel(false);
        let task = tokio::spawn(self.run(interval, stopped));
        SweeperHandle { stop, task }
    }

    async fn run(self, interval: Duration, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        info!(?interval, timeout = ?self.payment_timeout, "timeout sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = self.sweep();
                    if expired > 0 {
                        info!(expired, "timeout sweep finished");
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        info!("timeout sweeper stopped");
    }
}

/// Stop signal and join handle of a running sweeper.
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it. A tick in progress finishes first.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            error!(reason = %e, "timeout sweeper task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{Order, SeatClass, SystemState, TicketRequest};

    const CLASS: SeatClass = SeatClass::SecondClass;
    const TIMEOUT: Duration = Duration::from_secs(60);

    struct Fixture {
        orders: Arc<OrderStore>,
        inventory: Arc<InventoryStore>,
        clock: Arc<ManualClock>,
        sweeper: TimeoutSweeper,
    }

    fn fixture() -> Fixture {
        let orders = Arc::new(OrderStore::new());
        let inventory = Arc::new(InventoryStore::new());
        inventory.add_train("G101", "Beijing", "Shanghai").unwrap();
        inventory.add_seats("G101", CLASS, 10).unwrap();
        let clock = Arc::new(ManualClock::default());
        let sweeper = TimeoutSweeper::new(
            Arc::clone(&orders),
            Arc::clone(&inventory),
            clock.clone(),
            TIMEOUT,
        );
        Fixture {
            orders,
            inventory,
            clock,
            sweeper,
        }
    }

    /// Lock seats and record an order, the way a purchase does.
    fn reserve(f: &Fixture, seats: u32) -> String {
        f.inventory.lock("G101", CLASS, seats).unwrap();
        let request = TicketRequest::new("G101", CLASS, seats, "T1");
        let order = Order::new(&request, f.clock.now());
        let id = order.id.clone();
        f.orders.create(order).unwrap();
        id
    }

    #[test]
    fn fresh_orders_survive_a_sweep() {
        let f = fixture();
        let id = reserve(&f, 3);

        f.clock.advance(TIMEOUT);
        assert_eq!(f.sweeper.sweep(), 0);
        assert_eq!(f.orders.get(&id).unwrap().status, OrderStatus::PendingPayment);
        assert_eq!(f.inventory.available("G101", CLASS), Ok(7));
    }

    #[test]
    fn overdue_order_expires_and_returns_seats() {
        let f = fixture();
        let id = reserve(&f, 3);
        assert_eq!(f.inventory.available("G101", CLASS), Ok(7));
        assert_eq!(f.orders.observe_state(), Some(SystemState::Processing));

        f.clock.advance(TIMEOUT + Duration::from_secs(1));
        assert_eq!(f.sweeper.sweep(), 1);

        let order = f.orders.get(&id).unwrap();
        assert_eq!(order.status, OrderStatus::Expired);
        assert_eq!(order.expired_at, Some(f.clock.now()));
        assert_eq!(f.inventory.available("G101", CLASS), Ok(10));
        assert_eq!(f.orders.pending_count(), 0);

        // the sweep itself reported the return to READY
        assert_eq!(f.orders.observe_state(), None);
        assert_eq!(SystemState::from_pending(f.orders.pending_count()), SystemState::Ready);

        // nothing left to expire, nothing released twice
        assert_eq!(f.sweeper.sweep(), 0);
        assert_eq!(f.inventory.available("G101", CLASS), Ok(10));
    }

    #[test]
    fn cancelled_order_is_not_released_again() {
        let f = fixture();
        let id = reserve(&f, 3);
        f.orders
            .transition(&id, OrderStatus::PendingPayment, OrderStatus::Cancelled, f.clock.now())
            .unwrap();
        f.inventory.release("G101", CLASS, 3).unwrap();

        f.clock.advance(TIMEOUT * 2);
        assert_eq!(f.sweeper.sweep(), 0);
        assert_eq!(f.orders.get(&id).unwrap().status, OrderStatus::Cancelled);
        assert_eq!(f.inventory.available("G101", CLASS), Ok(10));
    }

    #[test]
    fn paid_order_keeps_its_seats() {
        let f = fixture();
        let id = reserve(&f, 4);
        f.orders
            .transition(&id, OrderStatus::PendingPayment, OrderStatus::Paid, f.clock.now())
            .unwrap();

        f.clock.advance(TIMEOUT * 2);
        assert_eq!(f.sweeper.sweep(), 0);
        assert_eq!(f.inventory.available("G101", CLASS), Ok(6));
    }

    #[test]
    fn only_overdue_orders_expire() {
        let f = fixture();
        let old = reserve(&f, 2);
        f.clock.advance(Duration::from_secs(30));
        let young = reserve(&f, 2);

        let now = f.clock.now() + TimeDelta::seconds(31);
        assert_eq!(f.sweeper.sweep_at(now), 1);
        assert_eq!(f.orders.get(&old).unwrap().status, OrderStatus::Expired);
        assert_eq!(f.orders.get(&young).unwrap().status, OrderStatus::PendingPayment);
        assert_eq!(f.inventory.available("G101", CLASS), Ok(8));
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweeper_ticks_until_shutdown() {
        let f = fixture();
        let id = reserve(&f, 3);
        let handle = f.sweeper.clone().spawn(Duration::from_secs(10));

        f.clock.advance(TIMEOUT + Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        assert_eq!(f.orders.get(&id).unwrap().status, OrderStatus::Expired);
        assert_eq!(f.inventory.available("G101", CLASS), Ok(10));

        handle.shutdown().await;
    }
}
