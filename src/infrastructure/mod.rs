//! Adapters behind the domain ports: storage backends and notification dispatchers.

pub(crate) mod batch;
pub mod in_memory;
pub mod notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
