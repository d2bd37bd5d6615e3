//! Few-shot example stores

mod in_memory;

pub use in_memory::InMemoryFewShotStore;
