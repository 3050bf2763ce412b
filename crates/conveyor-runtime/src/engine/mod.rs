//! Execution engine.
//!
//! - [`StepExecutor`]: runs a single step through the dispatcher
//! - [`Coordinator`]: consumes step messages and advances runs
//! - [`RunLedger`]: idempotency record for redelivered steps
//! - [`DefinitionStore`] and [`Outbox`]: the coordinator's seams to storage
//!   and transport

mod coordinator;
mod executor;
mod ledger;
mod outbox;
mod store;

pub use coordinator::{Coordinator, Disposition};
pub use executor::{StepExecutor, StepOutcome, Transition};
pub use ledger::{
    Claim, InMemoryRunLedger, LedgerKey, RecordState, RunLedger, StepEffects, StepRecord, missing,
};
pub use outbox::Outbox;
pub use store::{DefinitionStore, InMemoryDefinitionStore};
