#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Background work scheduling for orchard
//!
//! A host-independent model of an OS background-work service: one-time and
//! periodic work units gated by device constraints, deduplicated through
//! unique names, addressed for queries and cancellation by tag.
//! [`LocalWorkScheduler`] runs them as tokio tasks inside the process.

pub mod conditions;
pub mod request;
pub mod scheduler;
pub mod worker;

pub use conditions::{DeviceConditions, NetworkState, StaticConditions};
pub use request::{
    Constraints, EnqueueOutcome, ExistingWorkPolicy, NetworkType, OutOfQuotaPolicy, WorkId,
    WorkInfo, WorkKind, WorkRequest, WorkState, MIN_PERIODIC_INTERVAL,
};
pub use scheduler::{LocalWorkScheduler, SchedulerConfig, WorkScheduler};
pub use worker::{WorkContext, WorkResult, Worker};
