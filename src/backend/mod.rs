//! Embedded document database backend.
//!
//! Named collections of schemaless records with monotonic id assignment,
//! acknowledged updates, and a declarative read pipeline. Collections can
//! live purely in memory or be persisted as one snapshot file.

mod collection;
mod database;
pub mod pipeline;

pub use collection::{Collection, ID_FIELD};
pub use database::{Database, DatabaseConfig};
pub use pipeline::{Filter, Stage};
