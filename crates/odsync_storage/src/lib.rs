//! # odsync Storage
//!
//! Keyed store trait and implementations for the odsync offline engine.
//!
//! Stores are **opaque byte maps** - they do not interpret the values
//! they hold. Higher layers own the encoding of queue items, conflicts
//! and domain entities.
//!
//! ## Design Principles
//!
//! - Stores are simple keyed maps (get, put, delete, keys, values)
//! - All methods take `&self`; writers are serialized internally
//! - Must be `Send + Sync` for concurrent access
//! - A set of four named stores ("boxes") backs one engine instance
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral state
//! - [`FileStore`] - Append-only log file replayed into memory on open
//! - [`Boxes`] - The `queue`, `conflicts`, `items` and `meta` boxes
//!
//! ## Example
//!
//! ```rust
//! use odsync_storage::{InMemoryStore, KeyValueStore};
//!
//! let store = InMemoryStore::new();
//! store.put("req-1", b"hello world").unwrap();
//! assert_eq!(store.get("req-1").unwrap().as_deref(), Some(&b"hello world"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod dir;
mod error;
mod file;
mod memory;

pub use backend::KeyValueStore;
pub use dir::{BoxName, Boxes, StoreDir};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
