//! Per-route delivery handling.

use std::future::Future;

use conveyor_nats::stream::Delivery;
use conveyor_nats::{Route, Topology};
use serde::de::DeserializeOwned;

use super::WorkerState;
use crate::Result;

/// Handling logic for the messages of one route.
///
/// The [`Worker`](super::Worker) owns subscription, concurrency and
/// shutdown. A handler settles each delivery itself (ack, nack or term).
/// Returning `Err` means the delivery could not be settled properly and
/// the worker requests redelivery.
pub trait DeliveryHandler: Send + Sync + 'static {
    /// Message type carried by the route.
    type Message: DeserializeOwned + Send + Sync + 'static;

    /// Human-readable name for this worker (used in logs).
    const WORKER_NAME: &'static str;

    /// Selects the route this handler consumes.
    fn route(topology: &Topology) -> &Route;

    /// Processes and settles one delivery.
    fn handle(
        state: &WorkerState,
        delivery: &Delivery<Self::Message>,
    ) -> impl Future<Output = Result<()>> + Send;
}
