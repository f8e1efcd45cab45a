#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the orchard download and install pipeline
//!
//! This crate provides the records that flow between the persistent queue,
//! the orchestrators and the installer abstraction.

pub mod app;
pub mod download;
pub mod update;

// Re-export commonly used types
pub use app::{App, InstalledPackage, StandaloneBundle};
pub use download::{Download, DownloadFile, DownloadSource, DownloadStatus, SharedLib};
pub use update::Update;

/// Package identifier (for example `com.example.foo`)
pub type PackageName = String;

/// Monotonically increasing build number of a package
pub type VersionCode = i64;
