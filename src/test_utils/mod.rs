//! Test doubles for exercising the pooled proxies without a database.

pub mod memory;

pub use memory::{
    MemoryBehavior, MemoryCursor, MemoryLink, MemoryManager, MemoryPool, MemoryStatement,
    MemoryTransaction,
};
