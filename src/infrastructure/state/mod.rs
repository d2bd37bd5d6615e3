//! State store implementations

mod in_memory;
mod sweeper;

pub use in_memory::InMemoryStateStore;
pub use sweeper::spawn_sweeper;
