#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! High-level operations for orchard
//!
//! This crate ties the pipeline together: the download orchestrator and
//! its transfer worker, the update orchestrator and its check worker, the
//! migration runner, package broadcast handling and the process scope that
//! owns the long-lived observers.

mod broadcast;
mod context;
pub mod download;
pub mod logging;
pub mod migration;
mod scope;
pub mod update;
mod worker;

pub use broadcast::{BroadcastHandler, PackageBroadcast};
pub use context::{OpsContextBuilder, OpsCtx};
pub use download::{next_to_trigger, DownloadHelper};
pub use logging::init_tracing;
pub use migration::{MigrationReport, MigrationRunner, MigrationStep};
pub use scope::{AppScope, Orchard};
pub use update::{filter_visible, UpdateChecker, UpdateHelper, UpdateWorker};
pub use worker::DownloadWorker;
