//! # Tidelog Storage
//!
//! Storage backend trait and implementations for Tidelog.
//!
//! This crate provides the lowest-level storage abstraction for the
//! chunked transaction log. Storage backends are **opaque byte stores**:
//! they do not interpret chunk headers, record framing, or checkpoints.
//! All file-format knowledge lives in `tidelog_core`.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, flush, truncate)
//! - No knowledge of chunk layout, records, or indexes
//! - Must be `Send + Sync` for concurrent readers
//! - Flush/sync failures after bounded retries are surfaced, never hidden
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use tidelog_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"record bytes").unwrap();
//! let data = backend.read_at(offset, 12).unwrap();
//! assert_eq!(&data, b"record bytes");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
