//! Configuration for the trackdeck storage layer.
//!
//! This module resolves where trackdeck keeps its data on disk.

mod paths;

pub use paths::Paths;
