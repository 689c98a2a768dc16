//! Shared types for the stream daemon and its clients: the program catalog
//! (remote schedule + offline recordings), configuration, platform paths and
//! the control-socket wire format.

pub mod config;
pub mod error;
pub mod offline;
pub mod platform;
pub mod program;
pub mod protocol;
pub mod schedule;

pub use error::CatalogError;
pub use program::{OfflineEntry, Program};
