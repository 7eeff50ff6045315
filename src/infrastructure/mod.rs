//! Infrastructure adapters: the reqwest gateway client and the in-memory
//! implementations of the storage, directory and queue ports.

pub mod gateway;
pub mod in_memory;
