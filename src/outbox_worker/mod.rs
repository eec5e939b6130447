//! Outbox Worker - drains the outbox to the bus on a schedule.
//!
//! - `OutboxWorker` - background tokio task calling
//!   [`OutboxStore::dispatch_outbox_items`](crate::outbox::OutboxStore::dispatch_outbox_items)
//!   on every interval tick or trigger
//! - `DispatchTrigger` - lets the store wake the worker as soon as items are stored
//! - `WorkerStats` - counters returned when the worker stops

mod trigger;
mod worker;

pub use trigger::DispatchTrigger;
pub use worker::{OutboxWorker, WorkerStats};
