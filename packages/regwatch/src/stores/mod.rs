//! Storage implementations.

pub mod blob_fs;
pub mod blob_memory;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use blob_fs::FsBlobStore;
pub use blob_memory::MemoryBlobStore;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
