//! trackdeck - persistence and migration for issue-tracking dashboards
//!
//! This crate owns the on-disk state behind trackdeck dashboards:
//! profiles, saved queries, cached issue data with TTL expiry, derived
//! statistics, and a one-way migration from the legacy flat-file tree
//! into a single relational store.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod exchange;
pub mod migration;
pub mod model;
pub mod storage;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use config::Paths;
pub use error::StoreError;
pub use migration::{MigrationState, Migrator};
pub use storage::{Database, FlatFileStore, SqliteStore, StoreBackend};
