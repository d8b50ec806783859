//! Test infrastructure for the replication engine
//!
//! [`MemoryDatabase`] interprets every [`crate::statement::Statement`] against
//! in-process tables so the table sync, metadata store, stats sink and
//! orchestrator can be exercised without a MySQL server.
//! [`MySqlContainer`] runs a real server in Docker for the end-to-end tests.

pub mod container;
pub mod memory;

pub use container::MySqlContainer;
pub use memory::{MemoryDatabase, MetadataRecord};
