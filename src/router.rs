//! Request decoding and dispatch.
//!
//! A request line is `clientId|opCode|payload`, where the payload is a flat
//! JSON object (braces optional). Decoding produces a typed [`Request`]; the
//! stores and the coordinator never see text. Every request gets exactly one
//! [`Reply`] line: `SUCCESS|...` or `ERROR|message`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::SecondsFormat;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::coordinator::{ErrorKind, ReservationCoordinator, ReservationError, ValidationError};
use crate::inventory::{InventoryError, InventoryStore};
use crate::model::{Order, OrderId, SeatClass, TerminalId, TrainId, UnknownSeatClass};

/// Errors raised while turning a request line into a [`Request`].
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request, expected clientId|opCode|payload")]
    Malformed,

    #[error("client id must not be empty")]
    MissingClient,

    #[error("unsupported operation '{0}'")]
    UnsupportedOperation(String),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    SeatClass(#[from] UnknownSeatClass),
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

/// Operation codes. Legacy terminals send the numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ListTrains,
    AddTrain,
    AddSeats,
    Purchase,
    Confirm,
    Cancel,
    QueryOrder,
    SystemState,
    Statistics,
}

impl FromStr for Operation {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim() {
            "list-trains" | "200" => Operation::ListTrains,
            "add-train" | "201" => Operation::AddTrain,
            "add-seats" | "202" => Operation::AddSeats,
            "purchase" | "203" => Operation::Purchase,
            "confirm" | "204" => Operation::Confirm,
            "cancel" | "205" => Operation::Cancel,
            "query-order" | "206" => Operation::QueryOrder,
            "system-state" | "207" => Operation::SystemState,
            "statistics" | "208" => Operation::Statistics,
            other => return Err(RequestError::UnsupportedOperation(other.to_string())),
        };
        Ok(op)
    }
}

/// A decoded request. Counts stay signed here; range checks belong to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ListTrains,
    AddTrain {
        train_id: TrainId,
        origin: String,
        destination: String,
        seats: Vec<(SeatClass, i64)>,
    },
    AddSeats {
        train_id: TrainId,
        seat_class: SeatClass,
        amount: i64,
    },
    Purchase {
        train_id: TrainId,
        seat_class: SeatClass,
        passenger_count: i64,
    },
    Confirm {
        order_id: OrderId,
    },
    Cancel {
        order_id: OrderId,
    },
    QueryOrder {
        order_id: OrderId,
    },
    SystemState,
    Statistics,
}

/// A request together with the terminal that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub client_id: TerminalId,
    pub request: Request,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddTrainPayload {
    train_id: String,
    #[serde(alias = "start")]
    origin: String,
    #[serde(alias = "end")]
    destination: String,
    #[serde(default, alias = "seatTypes")]
    seats: BTreeMap<String, i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeatsPayload {
    train_id: String,
    #[serde(alias = "seatType")]
    seat_class: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderPayload {
    order_id: String,
}

fn payload<T: DeserializeOwned>(raw: &str) -> Result<T, RequestError> {
    let raw = raw.trim();
    let parsed = if raw.is_empty() {
        serde_json::from_str("{}")
    } else if raw.starts_with('{') {
        serde_json::from_str(raw)
    } else {
        serde_json::from_str(&format!("{{{raw}}}"))
    };
    Ok(parsed?)
}

/// Decode one request line.
pub fn decode(line: &str) -> Result<Envelope, RequestError> {
    let mut parts = line.trim().splitn(3, '|');
    let client_id = parts.next().unwrap_or_default().trim();
    let op = parts.next().ok_or(RequestError::Malformed)?;
    let raw = parts.next().unwrap_or_default();

    if client_id.is_empty() {
        return Err(RequestError::MissingClient);
    }

    let request = match op.parse::<Operation>()? {
        Operation::ListTrains => Request::ListTrains,
        Operation::AddTrain => {
            let p: AddTrainPayload = payload(raw)?;
            let seats = p
                .seats
                .into_iter()
                .map(|(class, amount)| -> Result<_, RequestError> {
                    Ok((class.parse::<SeatClass>()?, amount))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Request::AddTrain {
                train_id: p.train_id,
                origin: p.origin,
                destination: p.destination,
                seats,
            }
        }
        Operation::AddSeats => {
            let p: SeatsPayload = payload(raw)?;
            Request::AddSeats {
                train_id: p.train_id,
                seat_class: p.seat_class.parse()?,
                amount: p.amount,
            }
        }
        Operation::Purchase => {
            let p: SeatsPayload = payload(raw)?;
            Request::Purchase {
                train_id: p.train_id,
                seat_class: p.seat_class.parse()?,
                passenger_count: p.amount,
            }
        }
        Operation::Confirm => Request::Confirm {
            order_id: payload::<OrderPayload>(raw)?.order_id,
        },
        Operation::Cancel => Request::Cancel {
            order_id: payload::<OrderPayload>(raw)?.order_id,
        },
        Operation::QueryOrder => Request::QueryOrder {
            order_id: payload::<OrderPayload>(raw)?.order_id,
        },
        Operation::SystemState => Request::SystemState,
        Operation::Statistics => Request::Statistics,
    };

    Ok(Envelope {
        client_id: client_id.to_string(),
        request,
    })
}

/// One reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Success(Vec<String>),
    Error { kind: ErrorKind, message: String },
}

impl Reply {
    fn success(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Reply::Success(fields.into_iter().map(Into::into).collect())
    }

    fn error(kind: ErrorKind, err: impl fmt::Display) -> Self {
        Reply::Error {
            kind,
            message: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Success(_))
    }
}

impl From<ReservationError> for Reply {
    fn from(e: ReservationError) -> Self {
        Reply::error(e.kind(), e)
    }
}

impl From<InventoryError> for Reply {
    fn from(e: InventoryError) -> Self {
        Reply::error(e.kind(), e)
    }
}

impl From<RequestError> for Reply {
    fn from(e: RequestError) -> Self {
        Reply::error(e.kind(), e)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Success(fields) => {
                f.write_str("SUCCESS")?;
                for field in fields {
                    write!(f, "|{}", single_line(field))?;
                }
                Ok(())
            }
            Reply::Error { message, .. } => write!(f, "ERROR|{}", single_line(message)),
        }
    }
}

fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

/// Routes decoded requests to the inventory (listing, admin) or the coordinator.
pub struct RequestRouter {
    coordinator: Arc<ReservationCoordinator>,
    inventory: Arc<InventoryStore>,
}

impl RequestRouter {
    pub fn new(coordinator: Arc<ReservationCoordinator>, inventory: Arc<InventoryStore>) -> Self {
        Self {
            coordinator,
            inventory,
        }
    }

    /// Decode and handle one request line.
    pub fn handle_line(&self, line: &str) -> Reply {
        match decode(line) {
            Ok(envelope) => self.dispatch(envelope),
            Err(e) => {
                debug!(line, reason = %e, "request rejected");
                e.into()
            }
        }
    }

    pub fn dispatch(&self, envelope: Envelope) -> Reply {
        let Envelope { client_id, request } = envelope;
        debug!(client = %client_id, ?request, "dispatching");

        match request {
            Request::ListTrains => match serde_json::to_string(&self.inventory.snapshot()) {
                Ok(json) => Reply::success([json]),
                Err(e) => {
                    warn!(reason = %e, "failed to encode train list");
                    Reply::error(ErrorKind::Internal, e)
                }
            },
            Request::AddTrain {
                train_id,
                origin,
                destination,
                seats,
            } => self
                .add_train(&train_id, &origin, &destination, &seats)
                .map_or_else(Reply::from, |()| {
                    Reply::success([format!("train {train_id} added")])
                }),
            Request::AddSeats {
                train_id,
                seat_class,
                amount,
            } => match seat_amount(amount)
                .and_then(|amount| self.inventory.add_seats(&train_id, seat_class, amount))
            {
                Ok(available) => Reply::success([
                    format!("added {amount} {seat_class} seats to {train_id}"),
                    format!("available:{available}"),
                ]),
                Err(e) => e.into(),
            },
            Request::Purchase {
                train_id,
                seat_class,
                passenger_count,
            } => {
                let result = u32::try_from(passenger_count)
                    .map_err(|_| ReservationError::from(ValidationError::PassengerCount(passenger_count)))
                    .and_then(|count| {
                        self.coordinator
                            .purchase(&train_id, seat_class, count, &client_id)
                    });
                match result {
                    Ok(reservation) => Reply::success([
                        reservation.order_id,
                        reservation
                            .payment_deadline
                            .to_rfc3339_opts(SecondsFormat::Secs, true),
                    ]),
                    Err(e) => e.into(),
                }
            }
            Request::Confirm { order_id } => match self.coordinator.confirm_payment(&order_id) {
                Ok(order) => Reply::success([format!("payment confirmed for {}", order.id)]),
                Err(e) => e.into(),
            },
            Request::Cancel { order_id } => match self.coordinator.cancel(&order_id) {
                Ok(order) => Reply::success([format!("order {} cancelled", order.id)]),
                Err(e) => e.into(),
            },
            Request::QueryOrder { order_id } => match self.coordinator.query(&order_id) {
                Ok(order) => Reply::Success(order_fields(&order)),
                Err(e) => e.into(),
            },
            Request::SystemState => Reply::success([self.coordinator.system_state().to_string()]),
            Request::Statistics => Reply::success([self.coordinator.statistics().to_string()]),
        }
    }

    /// Create a train and stock its initial seats. Seat amounts are checked
    /// before the train is created.
    fn add_train(
        &self,
        train_id: &str,
        origin: &str,
        destination: &str,
        seats: &[(SeatClass, i64)],
    ) -> Result<(), InventoryError> {
        let seats = seats
            .iter()
            .map(|&(class, amount)| seat_amount(amount).map(|amount| (class, amount)))
            .collect::<Result<Vec<_>, _>>()?;

        self.inventory.add_train(train_id, origin, destination)?;
        for (class, amount) in seats {
            self.inventory.add_seats(train_id, class, amount)?;
        }
        Ok(())
    }
}

fn seat_amount(amount: i64) -> Result<u32, InventoryError> {
    match u32::try_from(amount) {
        Ok(amount) if amount > 0 => Ok(amount),
        _ => Err(InventoryError::InvalidAmount(amount)),
    }
}

fn order_fields(order: &Order) -> Vec<String> {
    let stamp = |t: chrono::DateTime<chrono::Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut fields = vec![
        format!("status:{}", order.status),
        format!("train:{}", order.train_id),
        format!("class:{}", order.seat_class),
        format!("passengers:{}", order.passenger_count),
        format!("created:{}", stamp(order.created_at)),
        format!("terminal:{}", order.terminal_id),
    ];
    if let Some(at) = order.paid_at {
        fields.push(format!("paid:{}", stamp(at)));
    }
    if let Some(at) = order.cancelled_at {
        fields.push(format!("cancelled:{}", stamp(at)));
    }
    if let Some(at) = order.expired_at {
        fields.push(format!("expired:{}", stamp(at)));
    }
    fields
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::orders::OrderStore;

    fn router() -> RequestRouter {
        let inventory = Arc::new(InventoryStore::new());
        let orders = Arc::new(OrderStore::new());
        let coordinator = Arc::new(ReservationCoordinator::new(
            Arc::clone(&inventory),
            orders,
            Arc::new(ManualClock::default()),
            Duration::from_secs(60),
        ));
        RequestRouter::new(coordinator, inventory)
    }

    fn send(router: &RequestRouter, line: &str) -> String {
        router.handle_line(line).to_string()
    }

    fn order_id(reply: &str) -> String {
        reply.split('|').nth(1).unwrap().to_string()
    }

    // Decoding

    #[test]
    fn decode_purchase() {
        let envelope =
            decode(r#"T1|purchase|{"trainId":"G101","seatClass":"second-class","amount":3}"#)
                .unwrap();
        assert_eq!(envelope.client_id, "T1");
        assert_eq!(
            envelope.request,
            Request::Purchase {
                train_id: "G101".into(),
                seat_class: SeatClass::SecondClass,
                passenger_count: 3,
            }
        );
    }

    #[test]
    fn decode_accepts_legacy_codes_and_fields() {
        let envelope =
            decode(r#"CLIENT_1|203|{"trainId":"G1001","seatType":"二等座","amount":2}"#).unwrap();
        assert_eq!(
            envelope.request,
            Request::Purchase {
                train_id: "G1001".into(),
                seat_class: SeatClass::SecondClass,
                passenger_count: 2,
            }
        );

        let envelope = decode(
            r#"admin|201|{"trainId":"G85","start":"Beijing","end":"Shanghai","seatTypes":{"二等座":100,"一等座":10}}"#,
        )
        .unwrap();
        assert_eq!(
            envelope.request,
            Request::AddTrain {
                train_id: "G85".into(),
                origin: "Beijing".into(),
                destination: "Shanghai".into(),
                seats: vec![(SeatClass::FirstClass, 10), (SeatClass::SecondClass, 100)],
            }
        );
    }

    #[test]
    fn decode_payload_without_braces_in_any_order() {
        let envelope = decode(r#"T1|confirm|"orderId":"ORD-1""#).unwrap();
        assert_eq!(
            envelope.request,
            Request::Confirm {
                order_id: "ORD-1".into()
            }
        );

        let envelope =
            decode(r#"T1|add-seats|"amount":5, "seatClass":"first-class", "trainId":"G1""#)
                .unwrap();
        assert_eq!(
            envelope.request,
            Request::AddSeats {
                train_id: "G1".into(),
                seat_class: SeatClass::FirstClass,
                amount: 5,
            }
        );
    }

    #[test]
    fn decode_requests_without_payload() {
        assert_eq!(decode("T1|system-state|").unwrap().request, Request::SystemState);
        assert_eq!(decode("T1|statistics").unwrap().request, Request::Statistics);
        assert_eq!(decode("T1|200|").unwrap().request, Request::ListTrains);
    }

    #[test]
    fn decode_errors() {
        assert!(matches!(decode("just-text"), Err(RequestError::Malformed)));
        assert!(matches!(decode("|statistics|"), Err(RequestError::MissingClient)));
        assert!(matches!(
            decode("T1|refund|{}"),
            Err(RequestError::UnsupportedOperation(op)) if op == "refund"
        ));
        assert!(matches!(
            decode(r#"T1|confirm|{"order":"x"}"#),
            Err(RequestError::Payload(_))
        ));
        assert!(matches!(
            decode(r#"T1|purchase|{"trainId":"G1","seatClass":"sleeper","amount":1}"#),
            Err(RequestError::SeatClass(_))
        ));
    }

    // Dispatch

    #[test]
    fn purchase_then_confirm_over_the_wire() {
        let router = router();
        assert_eq!(
            send(
                &router,
                r#"admin|add-train|{"trainId":"G101","origin":"Beijing","destination":"Shanghai"}"#
            ),
            "SUCCESS|train G101 added"
        );
        assert_eq!(
            send(
                &router,
                r#"admin|add-seats|{"trainId":"G101","seatClass":"second-class","amount":10}"#
            ),
            "SUCCESS|added 10 second-class seats to G101|available:10"
        );
        assert_eq!(send(&router, "T1|system-state|"), "SUCCESS|READY");

        let reply = send(
            &router,
            r#"T1|purchase|{"trainId":"G101","seatClass":"second-class","amount":3}"#,
        );
        assert!(reply.starts_with("SUCCESS|ORD-"), "{reply}");
        let id = order_id(&reply);
        assert_eq!(send(&router, "T1|system-state|"), "SUCCESS|PROCESSING");

        let query = send(&router, &format!(r#"T1|query-order|{{"orderId":"{id}"}}"#));
        assert!(
            query.starts_with("SUCCESS|status:PENDING_PAYMENT|train:G101|class:second-class|passengers:3|created:"),
            "{query}"
        );
        assert!(!query.contains(&id), "{query}");
        assert!(query.contains("|terminal:T1"), "{query}");

        assert_eq!(
            send(&router, &format!(r#"T1|confirm|{{"orderId":"{id}"}}"#)),
            format!("SUCCESS|payment confirmed for {id}")
        );
        assert!(
            send(&router, &format!(r#"T1|confirm|{{"orderId":"{id}"}}"#)).starts_with("ERROR|")
        );
        assert_eq!(
            send(&router, "T1|statistics|"),
            "SUCCESS|pending:0|paid:1|cancelled:0|expired:0|total:1"
        );
    }

    #[test]
    fn list_trains_is_json() {
        let router = router();
        send(
            &router,
            r#"admin|add-train|{"trainId":"G1","origin":"Beijing","destination":"Guangzhou","seats":{"first-class":2}}"#,
        );
        assert_eq!(
            send(&router, "T1|list-trains|"),
            r#"SUCCESS|[{"trainId":"G1","origin":"Beijing","destination":"Guangzhou","seats":{"first-class":2}}]"#
        );
    }

    #[test]
    fn add_train_with_bad_seat_amount_creates_nothing() {
        let router = router();
        let reply = router.handle_line(
            r#"admin|add-train|{"trainId":"G1","origin":"A","destination":"B","seats":{"first-class":-2}}"#,
        );
        assert!(matches!(
            reply,
            Reply::Error {
                kind: ErrorKind::Validation,
                ..
            }
        ));
        assert_eq!(send(&router, "T1|list-trains|"), "SUCCESS|[]");
    }

    #[test]
    fn errors_carry_their_kind() {
        let router = router();
        let kind = |line: &str| match router.handle_line(line) {
            Reply::Error { kind, .. } => Some(kind),
            Reply::Success(_) => None,
        };

        assert_eq!(
            kind(r#"T1|purchase|{"trainId":"G404","seatClass":"first-class","amount":1}"#),
            Some(ErrorKind::NotFound)
        );
        assert_eq!(
            kind(r#"T1|purchase|{"trainId":"G404","seatClass":"first-class","amount":-1}"#),
            Some(ErrorKind::Validation)
        );
        assert_eq!(
            kind(r#"T1|cancel|{"orderId":"ORD-none"}"#),
            Some(ErrorKind::NotFound)
        );
        assert_eq!(kind("T1|nonsense|"), Some(ErrorKind::Validation));

        send(&router, r#"a|add-train|{"trainId":"G1","origin":"A","destination":"B"}"#);
        assert_eq!(
            kind(r#"a|add-train|{"trainId":"G1","origin":"A","destination":"B"}"#),
            Some(ErrorKind::AlreadyExists)
        );
        assert_eq!(
            kind(r#"a|add-seats|{"trainId":"G1","seatClass":"first-class","amount":0}"#),
            Some(ErrorKind::Validation)
        );
        assert_eq!(
            kind(r#"T1|purchase|{"trainId":"G1","seatClass":"first-class","amount":1}"#),
            Some(ErrorKind::InsufficientInventory)
        );
    }

    #[test]
    fn cancel_over_the_wire_returns_seats() {
        let router = router();
        send(
            &router,
            r#"a|add-train|{"trainId":"G101","origin":"A","destination":"B","seats":{"second-class":10}}"#,
        );
        let id = order_id(&send(
            &router,
            r#"T1|purchase|{"trainId":"G101","seatClass":"second-class","amount":3}"#,
        ));

        assert_eq!(
            send(&router, &format!(r#"T1|cancel|{{"orderId":"{id}"}}"#)),
            format!("SUCCESS|order {id} cancelled")
        );
        let query = send(&router, &format!(r#"T1|query-order|{{"orderId":"{id}"}}"#));
        assert!(query.contains("|status:CANCELLED|"), "{query}");
        assert!(query.contains("|cancelled:"), "{query}");
        assert!(send(&router, "T1|list-trains|").contains(r#""second-class":10"#));
    }

    #[test]
    fn error_replies_stay_on_one_line() {
        let reply = Reply::error(ErrorKind::Internal, "first\nsecond");
        assert_eq!(reply.to_string(), "ERROR|first second");
    }
}
