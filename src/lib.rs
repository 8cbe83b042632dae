//! # Snapbase
//!
//! An embedded, versioned document store. Every write produces a new
//! snapshot commit; nothing is ever overwritten, so any point in history
//! can be read back or made the head again.
//!
//! ## Core Concepts
//!
//! - **Items**: Stable identities that never carry content themselves
//! - **Documents**: Immutable content versions of one item
//! - **Commits**: Full snapshots mapping every live item to its version
//! - **Links**: Typed relations between items, including ownership with
//!   cascading delete
//! - **Tags**: String key/value labels on versions, merged on write
//!
//! ## Example
//!
//! ```ignore
//! use snapbase::{Database, Filter, OpContext, Store};
//! use serde_json::json;
//!
//! let db = Database::in_memory();
//! let store = Store::new(&db);
//! let ctx = OpContext::by("alice");
//!
//! // Create an item with a first document version.
//! let body = json!({"title": "Hello"}).as_object().unwrap().clone();
//! let created = store.add_item(&ctx, body, None, None)?;
//!
//! // Every write is a new commit; old versions stay readable.
//! let patch = json!({"title": "Hello, world"}).as_object().unwrap().clone();
//! store.update_item(&ctx, created.item, patch)?;
//! let original = store.item_in_commit(created.commit, created.item)?;
//!
//! // Move the head back in time.
//! store.reset_head(Some(created.commit))?;
//! ```

pub mod backend;
pub mod commits;
pub mod documents;
pub mod error;
pub mod items;
pub mod store;
pub mod types;

// Re-exports
pub use backend::{Database, DatabaseConfig, Filter, Stage};
pub use commits::Commits;
pub use documents::Documents;
pub use error::{Result, StoreError};
pub use items::Items;
pub use store::{push_link_unique, remove_link, PatchOutcome, Store, OWNED_BY, OWNS};
pub use types::*;
