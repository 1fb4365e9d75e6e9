//! Persistence for servers, members, queue entries and statistics
//!
//! The engine only talks to the `Repository` trait. A reconciliation pass
//! collects its mutations into a `Changeset` and commits them in one step.

pub mod file;
pub mod memory;
pub mod repository;

pub use file::JsonFileRepository;
pub use memory::InMemoryRepository;
pub use repository::{resolve_member, Changeset, Repository};
