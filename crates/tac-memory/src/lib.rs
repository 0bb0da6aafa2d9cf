//! Persistence and sharing layer for TAC workers.
//!
//! Workers exchange intermediate and final results through a key/value
//! [`MemoryStore`]. The engine depends only on `store`, `retrieve` and
//! `delete`; which backend sits behind the trait is decided once at startup
//! by [`build_store`].
//!
//! # Main types
//!
//! - [`MemoryStore`]: Backend-agnostic key/value interface.
//! - [`InMemoryStore`]: Process-local map.
//! - [`JsonFileStore`]: Durable store persisted as a single JSON document.
//! - [`VectorMemoryStore`]: Store that also indexes values for similarity search.
//! - [`LocalEmbedding`]: Hash-based embedding used by the vector store.

/// Backend selection and the store registry.
pub mod config;
/// Embedding provider trait and local implementation.
pub mod embedding;
/// JSON-file backed durable store.
pub mod file;
/// Store trait and in-memory implementation.
pub mod store;
/// Vector-indexed store.
pub mod vector;

pub use config::{build_store, MemoryBackendKind, MemoryConfig};
pub use embedding::{EmbeddingProvider, LocalEmbedding};
pub use file::JsonFileStore;
pub use store::{InMemoryStore, MemoryStore};
pub use vector::{SearchHit, VectorMemoryStore};
